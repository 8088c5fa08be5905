//! Transcodio Core Library
//!
//! Transcode job orchestration engine. Wraps an external FFmpeg-style
//! encoder binary, drives each job through its lifecycle
//! (pending → running → paused/cancelled → completed/failed), reconciles
//! progress events against current job state, recovers from hardware
//! encoder failures by transparent software fallback, and keeps on-disk
//! output consistent across interruption.
//!
//! The presentation layer is an external collaborator: it calls the
//! [`core::jobs::JobOrchestrator`] command surface and consumes the
//! notification stream from [`core::events::EventSink`].

pub mod core;

use std::path::Path;
use std::sync::OnceLock;

pub use crate::core::config::OrchestratorConfig;
pub use crate::core::events::Notification;
pub use crate::core::jobs::{Job, JobOrchestrator, JobState};
pub use crate::core::options::TranscodeOptions;
pub use crate::core::{CoreError, CoreResult};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize tracing with stdout + daily rolling file output.
///
/// Safe to call multiple times; only the first call installs the global
/// subscriber. The durable per-job log (see [`core::logging`]) is separate
/// from this diagnostic log.
pub fn init_logging(log_dir: Option<&Path>) {
    let log_dir = log_dir
        .map(|p| p.to_path_buf())
        .or_else(|| dirs::data_local_dir().map(|d| d.join("transcodio").join("logs")))
        .unwrap_or_else(|| std::path::PathBuf::from(".logs"));

    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "transcodio.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, embedder re-entry).
    let _ = tracing::subscriber::set_global_default(subscriber);
}
