//! Failure classes raised by the pipeline.
//!
//! Stage code works in `anyhow::Result` and raises these typed errors into it,
//! so the orchestrator (and tests) can `downcast_ref` to tell a bad
//! configuration from a backend or encoder failure.

use std::path::PathBuf;
use thiserror::Error;

/// Rejected user input, caught before any job is started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no supported video file selected")]
    NoFiles,
    #[error("{field} must be a number, got '{value}'")]
    NotANumber { field: &'static str, value: String },
    #[error("{field} must be a value > 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("frame generation factor must be 2, 4 or 8, got {0}")]
    UnsupportedFactor(u32),
    #[error("unknown {kind} '{value}'")]
    Unknown { kind: &'static str, value: String },
}

/// Failure of the pairwise inference call or of its tensor contract.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("frames differ in shape: {left:?} vs {right:?}")]
    ShapeMismatch { left: (u32, u32, usize), right: (u32, u32, usize) },
    #[error("backend returned shape {got:?}, expected {expected:?}")]
    BadOutputShape { got: Vec<usize>, expected: [usize; 4] },
    #[error("inference backend failed: {0}")]
    Backend(String),
}

/// The external encoder exited unsuccessfully.
#[derive(Debug, Error)]
#[error("{stage} failed for {}: {detail}", output.display())]
pub struct EncodingError {
    pub stage: &'static str,
    pub output: PathBuf,
    pub detail: String,
}

/// A source video could not be probed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not probe {}: {detail}", path.display())]
    Probe { path: PathBuf, detail: String },
}
