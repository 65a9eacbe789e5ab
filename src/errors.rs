//! Error types for the scan engine.
//!
//! Each concern gets its own enum so callers can match on exactly the failures
//! an operation can produce. `DetectorError` never leaves the orchestrator: it is
//! always recovered by switching to the fallback heuristic.

use crate::core_modules::scan_session::ScanStage;
use thiserror::Error;

/// Failures of the image ingestor.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Only `image/jpeg` and `image/png` are accepted.
    #[error("unsupported image format: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    /// The bytes claimed a supported format but could not be decoded.
    #[error("failed to decode image")]
    Decode(#[source] image::ImageError),

    /// A raw RGBA buffer whose length disagrees with its dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Failures of the region extractor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("invalid selection: {reason}")]
    InvalidSelection { reason: String },
}

/// Failures reported by an external detector implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("detector initialization failed: {0}")]
    Initialization(String),

    #[error("detector inference failed: {0}")]
    Inference(String),
}

/// Unexpected failures after a scan has begun. The `Display` text is the
/// message surfaced to the caller with the terminal `Error` stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("damage analysis failed: {0}")]
    Region(#[from] RegionError),

    #[error("damage analysis failed: no image is loaded")]
    MissingImage,
}

/// Reasons a new scan is refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("a scan is already in progress ({stage})")]
    Busy { stage: ScanStage },

    #[error("the claim has been approved; scanning is locked")]
    Approved,

    #[error("no image has been loaded")]
    NoImage,
}

/// Errors that can occur while loading or validating a `PipelineConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}
