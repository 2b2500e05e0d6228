//! Error taxonomy for batch runs
//!
//! Every failure names the item, job, or (image, level, format) triple it
//! belongs to. How far a failure propagates is decided by the orchestrators,
//! not here.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Fatal error raised by an orchestration step
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Bad or missing option combination, raised before any engine call
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listing file, source, container, or export target unreadable/unwritable
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checksum or structural failure on a container
    #[error("Container {path} failed validation: {reason}")]
    Validation { path: PathBuf, reason: String },

    /// Compression or transcoding engine failure
    #[error("Engine failure ({context}): {reason}")]
    Engine { context: String, reason: String },
}

impl BatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Engine {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
