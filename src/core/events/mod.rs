//! Event Delivery Module
//!
//! Outbound notification surface for the presentation layer. Notifications
//! fan out over a tokio broadcast channel; delivery is best effort and a
//! slow or absent consumer never blocks the engine. Every notification is
//! also recorded in the durable log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::hwaccel::HardwareAccel;
use crate::core::logging::{LogEntry, LogLevel, LogStore};
use crate::core::JobId;

/// Notification sent to the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// Periodic progress for a running job
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: JobId,
        percent: f64,
        timemark: f64,
        fps: f64,
        bitrate_kbps: Option<f64>,
        output_bytes: Option<u64>,
        hardware_accel: HardwareAccel,
    },
    /// Job finished and the output file is final
    #[serde(rename_all = "camelCase")]
    Completed {
        job_id: JobId,
        output_path: String,
        duration_ms: u64,
        input_bytes: u64,
        output_bytes: u64,
        /// output size / input size
        compression_ratio: f64,
    },
    /// Job failed; it is back in the retryable pending state
    #[serde(rename_all = "camelCase")]
    Failed { job_id: JobId, error: String },
    /// A hardware encode failed and a software successor job was created
    #[serde(rename_all = "camelCase")]
    HardwareFallback {
        job_id: JobId,
        original_accel: HardwareAccel,
        error: String,
        successor_job_id: JobId,
    },
    /// A job transitioned between lifecycle states
    #[serde(rename_all = "camelCase")]
    StateChanged {
        job_id: JobId,
        state: String,
    },
}

impl Notification {
    fn job_id(&self) -> &str {
        match self {
            Notification::Progress { job_id, .. }
            | Notification::Completed { job_id, .. }
            | Notification::Failed { job_id, .. }
            | Notification::HardwareFallback { job_id, .. }
            | Notification::StateChanged { job_id, .. } => job_id,
        }
    }

    fn log_entry(&self) -> Option<LogEntry> {
        // Progress is too chatty for the durable log.
        let (level, message) = match self {
            Notification::Progress { .. } => return None,
            Notification::Completed { output_path, .. } => {
                (LogLevel::Info, format!("job completed: {output_path}"))
            }
            Notification::Failed { error, .. } => {
                (LogLevel::Error, format!("job failed: {error}"))
            }
            Notification::HardwareFallback {
                original_accel,
                successor_job_id,
                ..
            } => (
                LogLevel::Warn,
                format!(
                    "hardware encode on {original_accel} failed; retrying in software as {successor_job_id}"
                ),
            ),
            Notification::StateChanged { state, .. } => {
                (LogLevel::Info, format!("state changed to {state}"))
            }
        };

        Some(LogEntry::new(level, "jobs", &message).with_job(self.job_id()))
    }
}

/// Broadcasts notifications to subscribers and mirrors them into the
/// durable log.
pub struct EventSink {
    log: Arc<LogStore>,
    tx: broadcast::Sender<Notification>,
}

impl EventSink {
    pub fn new(log: Arc<LogStore>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { log, tx }
    }

    /// Subscribe to the notification stream. A subscriber that falls more
    /// than the channel capacity behind observes a `Lagged` error and
    /// continues from the newest messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Emit a notification. Never fails: with no subscribers the broadcast
    /// send errors and is ignored, and the durable log swallows disk errors.
    pub fn emit(&self, notification: Notification) {
        if let Some(entry) = notification.log_entry() {
            self.log.append(entry);
        }

        debug!(job_id = notification.job_id(), "emit notification");
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink(dir: &TempDir) -> EventSink {
        let store = LogStore::open(dir.path().to_path_buf(), 100).unwrap();
        EventSink::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        let mut rx = sink.subscribe();

        sink.emit(Notification::StateChanged {
            job_id: "job_01".to_string(),
            state: "running".to_string(),
        });

        match rx.recv().await.unwrap() {
            Notification::StateChanged { job_id, state } => {
                assert_eq!(job_id, "job_01");
                assert_eq!(state, "running");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.emit(Notification::Failed {
            job_id: "job_02".to_string(),
            error: "boom".to_string(),
        });
        // Recorded durably even with nobody listening.
        assert_eq!(sink.log.recent().len(), 1);
    }

    #[test]
    fn test_progress_not_written_to_durable_log() {
        let notification = Notification::Progress {
            job_id: "job_03".to_string(),
            percent: 42.0,
            timemark: 4.2,
            fps: 60.0,
            bitrate_kbps: None,
            output_bytes: None,
            hardware_accel: HardwareAccel::None,
        };
        assert!(notification.log_entry().is_none());
    }

    #[test]
    fn test_wire_format_is_tagged_camel_case() {
        let notification = Notification::Completed {
            job_id: "job_04".to_string(),
            output_path: "/tmp/out.mp4".to_string(),
            duration_ms: 1500,
            input_bytes: 2000,
            output_bytes: 1000,
            compression_ratio: 0.5,
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["jobId"], "job_04");
        assert_eq!(json["compressionRatio"], 0.5);
    }
}
