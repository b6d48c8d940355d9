//! Error taxonomy shared by the loaders, the record source and the driver.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum MiralignError {
    /// Missing or unreadable input, or a failed write.
    Io { path: PathBuf, source: io::Error },
    /// Malformed alignment or annotation file.
    Format { path: PathBuf, message: String },
    /// Structurally invalid precursor reference.
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// No placement of the read scored above the threshold.
    Alignment { read: String },
}

impl MiralignError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        MiralignError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn format(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        MiralignError::Format {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn parse(path: impl AsRef<Path>, line: usize, message: impl Into<String>) -> Self {
        MiralignError::Parse {
            path: path.as_ref().to_path_buf(),
            line,
            message: message.into(),
        }
    }

    /// Per-read failures are recovered by the driver; everything else aborts a file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MiralignError::Alignment { .. })
    }
}

impl fmt::Display for MiralignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiralignError::Io { path, source } => {
                write!(f, "IO error on '{}': {}", path.display(), source)
            }
            MiralignError::Format { path, message } => {
                write!(f, "Invalid format in '{}': {}", path.display(), message)
            }
            MiralignError::Parse {
                path,
                line,
                message,
            } => write!(
                f,
                "Failed to parse '{}' at line {}: {}",
                path.display(),
                line,
                message
            ),
            MiralignError::Alignment { read } => {
                write!(f, "No alignment above threshold for read '{}'", read)
            }
        }
    }
}

impl std::error::Error for MiralignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MiralignError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<MiralignError> for io::Error {
    fn from(e: MiralignError) -> Self {
        let kind = match &e {
            MiralignError::Io { source, .. } => source.kind(),
            MiralignError::Format { .. } | MiralignError::Parse { .. } => {
                io::ErrorKind::InvalidData
            }
            MiralignError::Alignment { .. } => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MiralignError>;
