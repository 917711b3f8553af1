//! Unit scaling for human-readable reports.

use std::fmt;

use chunkspace_core::BYTES_PER_WORD;

/// Unit used when printing word counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scale {
    /// Pick the largest unit that keeps the value at or above one.
    #[default]
    Dynamic,
    /// Plain bytes.
    Bytes,
    /// Plain words.
    Words,
    /// Kibibytes.
    K,
    /// Mebibytes.
    M,
    /// Gibibytes.
    G,
}

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

impl Scale {
    /// Resolve [`Scale::Dynamic`] to a concrete unit for `bytes`.
    fn resolve(self, bytes: usize) -> Scale {
        match self {
            Self::Dynamic if bytes >= GB => Self::G,
            Self::Dynamic if bytes >= MB => Self::M,
            Self::Dynamic if bytes >= KB => Self::K,
            Self::Dynamic => Self::Bytes,
            other => other,
        }
    }
}

/// Write `words` scaled to `scale`, e.g. `"1.50 KB"` or `"192 words"`.
pub fn write_scaled_words(out: &mut dyn fmt::Write, words: usize, scale: Scale) -> fmt::Result {
    let bytes = words * BYTES_PER_WORD;
    match scale.resolve(bytes) {
        Scale::Words => write!(out, "{words} words"),
        Scale::Bytes | Scale::Dynamic => write!(out, "{bytes} bytes"),
        Scale::K => write!(out, "{:.2} KB", bytes as f64 / KB as f64),
        Scale::M => write!(out, "{:.2} MB", bytes as f64 / MB as f64),
        Scale::G => write!(out, "{:.2} GB", bytes as f64 / GB as f64),
    }
}

/// Write `words` scaled to `scale`, followed by its share of `total`.
pub fn write_scaled_words_and_share(
    out: &mut dyn fmt::Write,
    words: usize,
    total: usize,
    scale: Scale,
) -> fmt::Result {
    write_scaled_words(out, words, scale)?;
    if total > 0 {
        write!(out, " ({:.1}%)", words as f64 * 100.0 / total as f64)
    } else {
        write!(out, " (  -  )")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(words: usize, scale: Scale) -> String {
        let mut s = String::new();
        write_scaled_words(&mut s, words, scale).unwrap();
        s
    }

    #[test]
    fn dynamic_picks_unit_by_magnitude() {
        assert_eq!(render(4, Scale::Dynamic), "32 bytes");
        assert_eq!(render(128, Scale::Dynamic), "1.00 KB");
        assert_eq!(render(512 * 1024, Scale::Dynamic), "4.00 MB");
    }

    #[test]
    fn fixed_units() {
        assert_eq!(render(192, Scale::Words), "192 words");
        assert_eq!(render(192, Scale::K), "1.50 KB");
        assert_eq!(render(0, Scale::M), "0.00 MB");
    }

    #[test]
    fn share_of_zero_total() {
        let mut s = String::new();
        write_scaled_words_and_share(&mut s, 0, 0, Scale::Words).unwrap();
        assert_eq!(s, "0 words (  -  )");
    }
}
