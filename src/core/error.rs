//! Transcodio Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

use super::JobId;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job_id} is {state}; operation requires {required}")]
    InvalidJobState {
        job_id: JobId,
        state: String,
        required: String,
    },

    #[error("Input file not found: {0}")]
    InputNotFound(String),

    // =========================================================================
    // Encoder Errors
    // =========================================================================
    #[error("Encoder process failed: {0}")]
    ProcessFailure(String),

    #[error("Hardware encoder unavailable ({accel}): {reason}")]
    HardwareUnavailable { accel: String, reason: String },

    #[error("Media probe failed: {0}")]
    ProbeFailure(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl From<crate::core::ffmpeg::FfmpegError> for CoreError {
    fn from(err: crate::core::ffmpeg::FfmpegError) -> Self {
        use crate::core::ffmpeg::FfmpegError;
        match err {
            FfmpegError::ProbeError(msg) => CoreError::ProbeFailure(msg),
            // Parse errors only arise from probe output.
            FfmpegError::ParseError(msg) => CoreError::ProbeFailure(msg),
            FfmpegError::InvalidInput(msg) => CoreError::Validation(msg),
            FfmpegError::NotFound => CoreError::Resource(err.to_string()),
            FfmpegError::Timeout => CoreError::Timeout(err.to_string()),
            other => CoreError::ProcessFailure(other.to_string()),
        }
    }
}
