//! Run diagnostics
//!
//! Each processing step reports a typed [`Outcome`]: done, a recoverable skip,
//! or fatal. Both orchestrators feed outcomes through [`Diagnostics::absorb`],
//! which logs and counts skips and turns fatal outcomes into errors. One
//! `Diagnostics` value lives for a whole invocation and is summarized once at
//! the end.

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{BatchError, BatchResult};
use crate::formats::TranscodeFormat;

/// Why a step was skipped instead of completed
#[derive(Debug)]
pub enum Skip {
    /// Level geometry not representable in the target format
    Ineligible {
        image: u32,
        level: u32,
        format: TranscodeFormat,
        width: u32,
        height: u32,
    },
    /// A job could not read one of its sources (independent mode only)
    SourceUnreadable { output: PathBuf, source: String },
    /// A container failed checksum or structural validation; always a
    /// [`BatchError::Validation`]
    InvalidContainer(BatchError),
}

impl Skip {
    /// Whether this skip counts as a failure rather than a warning
    pub fn is_failure(&self) -> bool {
        !matches!(self, Skip::Ineligible { .. })
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Ineligible {
                image,
                level,
                format,
                width,
                height,
            } => write!(
                f,
                "Will not transcode image {} level {} res {}x{} to {}: geometry not supported by format",
                image, level, width, height, format
            ),
            Skip::SourceUnreadable { output, source } => write!(
                f,
                "Job for {} failed reading source image {}; continuing with next item",
                output.display(),
                source
            ),
            Skip::InvalidContainer(err) => write!(f, "Skipping file: {}", err),
        }
    }
}

/// Result of one processing step
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Skipped(Skip),
    Fatal(BatchError),
}

/// Invocation-wide warning and failure counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Levels skipped because the target format rejects their geometry
    pub ineligible_warnings: u32,
    /// Block buffers that decoded with invalid data
    pub unpack_warnings: u32,
    /// Items skipped after a tolerated failure
    pub failures: u32,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a step outcome: count and log skips, propagate fatal errors.
    pub fn absorb<T>(&mut self, outcome: Outcome<T>) -> BatchResult<Option<T>> {
        match outcome {
            Outcome::Done(v) => Ok(Some(v)),
            Outcome::Skipped(skip) => {
                warn!("{}", skip);
                if skip.is_failure() {
                    self.failures += 1;
                } else {
                    self.ineligible_warnings += 1;
                }
                Ok(None)
            }
            Outcome::Fatal(e) => Err(e),
        }
    }

    pub fn record_unpack_warning(&mut self, format: TranscodeFormat, image: u32, level: u32) {
        warn!(
            "Failed unpacking GPU texture data ({} image {} level {}). Unpacking as much as possible.",
            format, image, level
        );
        self.unpack_warnings += 1;
    }

    pub fn is_clean(&self) -> bool {
        self.ineligible_warnings == 0 && self.unpack_warnings == 0 && self.failures == 0
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "Success");
        }

        let mut lines = Vec::new();
        if self.ineligible_warnings > 0 {
            lines.push(format!(
                "Warning: {} image levels could not be transcoded because the target format does not support their dimensions",
                self.ineligible_warnings
            ));
        }
        if self.unpack_warnings > 0 {
            lines.push(format!(
                "ATTENTION: {} total images had invalid GPU texture data!",
                self.unpack_warnings
            ));
        }
        if self.failures > 0 {
            lines.push(format!("{} items failed and were skipped", self.failures));
        }
        write!(f, "{}", lines.join("\n"))
    }
}
