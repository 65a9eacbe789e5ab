// THEORY:
// This file is the main entry point for the `damage_scan` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (the UI collaborator that shows
// scan progress and the final estimate).
//
// The primary goal is to export the `ScanPipeline` and its associated data
// structures (`PipelineConfig`, `ScanReport`, `ScanEvent`, etc.) as the high-level
// interface for the scan engine. The leaf components (`core_modules`) are public
// as well, because each of them is a pure, synchronous computation that callers
// may want to run on their own: decoding, region extraction, severity scoring,
// fallback detection and estimation.

pub mod core_modules;
pub mod errors;
pub mod pipeline;

pub use errors::{
    ConfigError, DetectorError, IngestError, PipelineError, RegionError, ScanError,
};
pub use pipeline::{
    PipelineConfig, ScanEvent, ScanOutcome, ScanPipeline, ScanReport, ScanSnapshot, StepDelays,
};
