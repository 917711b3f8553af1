//! Fatal invariant checks.
//!
//! A violated invariant means the metadata store is corrupt. There is no
//! safe way to continue, so the check logs a diagnostic and panics. It is
//! never turned into an `Err`.

/// Panic with a logged diagnostic unless `$cond` holds.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            let msg = format!($($arg)+);
            tracing::error!(target: "chunkspace::invariant", "{msg}");
            panic!("chunkspace invariant violated: {msg}");
        }
    };
}
