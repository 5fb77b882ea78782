use std::fmt;

use thiserror::Error;
use variantly::Variantly;

/// Which of the three model files a failure was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Variantly)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FileKind {
    /// The `.mdl` primary descriptor.
    Primary,
    /// The `.vvd` vertex data file.
    Vertex,
    /// The `.vtx` hardware mesh-strip file.
    Strip,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileKind::Primary => "primary",
            FileKind::Vertex => "vertex",
            FileKind::Strip => "strip",
        })
    }
}

/// A decode failure. Every failure is terminal for the decode attempt.
#[derive(Debug, Error)]
#[error("{file} file at 0x{offset:X}: {kind}")]
pub struct Error {
    pub file: FileKind,
    /// Byte offset where validation failed (for table failures, the table start).
    pub offset: usize,
    pub kind: ErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("bad magic: expected {expected:#010X}, found {found:#010X}")]
    MagicMismatch { expected: u32, found: u32 },
    #[error("unsupported version {found} (accepted {min}..={max})")]
    UnsupportedVersion { found: i32, min: i32, max: i32 },
    #[error("{table} extends beyond file (need 0x{need:X}, have 0x{have:X})")]
    OutOfBounds {
        table: &'static str,
        need: usize,
        have: usize,
    },
    #[error("checksum {found:#X} does not match primary descriptor checksum {expected:#X}")]
    ChecksumMismatch { expected: i32, found: i32 },
    #[error("bone {bone} has a cyclic or out-of-range parent chain")]
    MalformedHierarchy { bone: usize },
    #[error("topology mismatch: {detail}")]
    TopologyMismatch { detail: String },
}

impl ErrorKind {
    /// True for both a wrong id and a wrong version; the two share one failure class.
    pub fn is_magic_mismatch(&self) -> bool {
        matches!(
            self,
            ErrorKind::MagicMismatch { .. } | ErrorKind::UnsupportedVersion { .. }
        )
    }

    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, ErrorKind::OutOfBounds { .. })
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, ErrorKind::ChecksumMismatch { .. })
    }

    pub fn is_malformed_hierarchy(&self) -> bool {
        matches!(self, ErrorKind::MalformedHierarchy { .. })
    }

    pub fn is_topology_mismatch(&self) -> bool {
        matches!(self, ErrorKind::TopologyMismatch { .. })
    }
}

impl Error {
    pub fn new(file: FileKind, offset: usize, kind: ErrorKind) -> Self {
        Self { file, offset, kind }
    }

    pub fn topology(file: FileKind, offset: usize, detail: impl Into<String>) -> Self {
        Self::new(
            file,
            offset,
            ErrorKind::TopologyMismatch {
                detail: detail.into(),
            },
        )
    }
}

pub type IResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_file_and_offset() {
        let err = Error::new(
            FileKind::Vertex,
            0x40,
            ErrorKind::ChecksumMismatch {
                expected: 1,
                found: 2,
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("vertex file at 0x40"), "{msg}");
        assert!(err.kind.is_checksum_mismatch());
        assert!(err.file.is_vertex());
    }

    #[test]
    fn version_errors_share_magic_class() {
        let kind = ErrorKind::UnsupportedVersion {
            found: 3,
            min: 44,
            max: 49,
        };
        assert!(kind.is_magic_mismatch());
        assert!(!kind.is_out_of_bounds());
    }
}
