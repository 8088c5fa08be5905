//! Encoder Integration Module
//!
//! Provides the FFmpeg-facing half of the engine:
//! - Binary detection (configured path, common locations, `PATH`)
//! - Media probing via ffprobe
//! - Structured progress parsing from `-progress pipe:1` output
//! - Encoder process lifecycle (spawn, progress/end/error events, graceful stop)

mod detection;
mod probe;
mod process;
mod progress;

pub use detection::{detect_encoder, EncoderPaths};
pub use probe::{probe_media, AudioStreamInfo, MediaInfo, VideoStreamInfo};
pub use process::{is_termination_message, EncoderProcess, ProcessEvent, TerminateHandle};
pub use progress::{ProgressParser, ProgressSample};

/// Encoder-related error types
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("FFmpeg not found. Install FFmpeg or set an explicit path in the configuration.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

pub type FfmpegResult<T> = Result<T, FfmpegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_error_display() {
        let err = FfmpegError::NotFound;
        assert!(err.to_string().contains("FFmpeg not found"));

        let err = FfmpegError::ExecutionFailed("exit code 1".to_string());
        assert!(err.to_string().contains("exit code 1"));
    }
}
