use std::fmt;

use serde::Deserialize;

/// How an archive is opened for its whole lifetime.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Strictly non-mutating
    Read,
    /// Create, or truncate an existing container
    Write,
    /// Keep existing entries and add new ones after them
    Append,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "read"),
            OpenMode::Write => write!(f, "write"),
            OpenMode::Append => write!(f, "append"),
        }
    }
}

/// Requested compression for a single write. Backends map these onto whatever
/// their codec offers; a backend without compression ignores it.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressMode {
    NoCompress,
    #[default]
    FastCompress,
    MediumCompress,
    SlowCompress,
}

impl CompressMode {
    pub fn is_compressed(self) -> bool {
        !matches!(self, CompressMode::NoCompress)
    }
}
