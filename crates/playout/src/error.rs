use std::path::PathBuf;

use thiserror::Error;

/// Common error type for playout operations.
///
/// Every fatal variant names the offending path or configuration key so a
/// failed run can be diagnosed from the log line alone.
#[derive(Debug, Error)]
pub enum PlayoutError {
    #[error("invalid configuration `{key}`: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("source `{}`: {reason}", .path.display())]
    Source { path: PathBuf, reason: String },

    #[error("failed to parse playlist `{}`: {reason}", .path.display())]
    Playlist { path: PathBuf, reason: String },

    #[error("segment `{}` not found", .path.display())]
    SegmentMissing { path: PathBuf },

    #[error("I/O error on `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlayoutError {
    /// Attaches the offending path to a raw I/O error.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PlayoutError::Io {
            path: path.into(),
            source,
        }
    }
}
