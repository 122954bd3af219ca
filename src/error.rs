//! Error types for the segmentation pipeline.
//!
//! Record-level problems (`Parse`, `EmptyWindow`, `AlignmentGap`) are
//! recoverable: callers log them and drop the offending unit. Dataset-level
//! problems (`InsufficientData`, `NoData`) are fatal and propagate.

use crate::config::ConfigError;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// Convenient `Result` alias for pipeline-level functions.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Which textual encoding a timestamp was expected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `<device>_<id>_<timestamp>_<random>.csv`
    ChunkFilename,
    /// `<start>_<end>[_suffix].csv`
    StreamFilename,
    /// `YYYY/MM/DD HH:MM` in the activity-log zone
    ActivityLog,
    /// ISO-8601 with fractional seconds and an offset
    SampleTimestamp,
}

impl std::fmt::Display for TimeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeFormat::ChunkFilename => "chunk filename",
            TimeFormat::StreamFilename => "stream filename",
            TimeFormat::ActivityLog => "activity log",
            TimeFormat::SampleTimestamp => "sample timestamp",
        };
        f.write_str(name)
    }
}

/// A malformed timestamp or filename.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {format} '{input}': {reason}")]
pub struct ParseError {
    pub format: TimeFormat,
    pub input: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(format: TimeFormat, input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            format,
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// No samples fall inside a window or slice.
    #[error("no samples between {start} and {end}")]
    EmptyWindow {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },

    /// No logged activity overlaps a slice.
    #[error("no activity overlaps {start} .. {end}")]
    AlignmentGap {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },

    /// A stratified split cannot be performed.
    #[error("cannot stratify: {reason}")]
    InsufficientData { reason: String },

    /// Nothing survived the pipeline.
    #[error("no data: {0}")]
    NoData(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the error only concerns a single record, file or window.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Parse(_)
                | PipelineError::EmptyWindow { .. }
                | PipelineError::AlignmentGap { .. }
        )
    }
}
