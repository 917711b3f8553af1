//! Client categories and metadata types.

use std::fmt;

/// Category of the class-loading unit an arena serves.
///
/// The category selects the chunk growth schedule: units that load few,
/// small classes start with small chunks, the boot unit starts big.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClientCategory {
    /// The boot loader: loads most of the platform, grows fast.
    Boot,
    /// A typical class loader.
    Standard,
    /// Reflection-heavy loaders that produce many tiny accessor classes.
    Reflection,
    /// Loaders holding a single hidden class.
    ClassMirrorHolder,
}

impl ClientCategory {
    /// All categories, in declaration order.
    pub const ALL: [ClientCategory; 4] = [
        ClientCategory::Boot,
        ClientCategory::Standard,
        ClientCategory::Reflection,
        ClientCategory::ClassMirrorHolder,
    ];

    /// Short lowercase name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Standard => "standard",
            Self::Reflection => "reflection",
            Self::ClassMirrorHolder => "mirror-holder",
        }
    }
}

impl fmt::Display for ClientCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which of a loader's two arenas an allocation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataType {
    /// Class structures proper (served from the class context when present).
    Class,
    /// Everything else: methods, constant pools, annotations.
    NonClass,
}

impl MetadataType {
    /// Whether this is [`MetadataType::Class`].
    pub fn is_class(self) -> bool {
        matches!(self, Self::Class)
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class => f.write_str("class"),
            Self::NonClass => f.write_str("non-class"),
        }
    }
}
