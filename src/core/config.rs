//! Orchestrator Configuration
//!
//! Runtime configuration for the engine. All fields have sensible defaults
//! so an embedder can start with `OrchestratorConfig::default()` and only
//! override what it needs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Engine configuration supplied by the embedder at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Explicit path to the encoder binary. When `None` the engine searches
    /// common install locations and `PATH`.
    pub ffmpeg_path: Option<PathBuf>,

    /// Explicit path to the probe binary. Same search rules as `ffmpeg_path`.
    pub ffprobe_path: Option<PathBuf>,

    /// Directory for transcoded outputs. Defaults to the input file's
    /// directory when `None`.
    pub output_dir: Option<PathBuf>,

    /// Directory for the durable engine log. Defaults to the platform
    /// local-data directory when `None`.
    pub log_dir: Option<PathBuf>,

    /// Maximum in-memory log entries retained for report export.
    pub log_retention: usize,

    /// Timeout for capability probing and media probing, in milliseconds.
    pub probe_timeout_ms: u64,

    /// Delay between cancelling a job and deleting its partial output.
    /// Gives the encoder process time to release file handles.
    pub cancel_grace_ms: u64,

    /// How long to wait after a graceful stop request before killing the
    /// encoder process outright.
    pub terminate_kill_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            output_dir: None,
            log_dir: None,
            log_retention: 2000,
            probe_timeout_ms: 10_000,
            cancel_grace_ms: 500,
            terminate_kill_grace_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.log_retention, 2000);
        assert_eq!(config.probe_timeout_ms, 10_000);
        assert!(config.ffmpeg_path.is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let config = OrchestratorConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")),
            cancel_grace_ms: 100,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("ffmpegPath"));
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cancel_grace_ms, 100);
    }
}
