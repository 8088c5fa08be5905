//! Job System Module
//!
//! The job record, its lifecycle state machine, and the orchestrator that
//! drives encoder runs through it.

mod orchestrator;
mod plan;

pub use orchestrator::JobOrchestrator;
pub use plan::{muxer_for_format, InvocationPlan};

use serde::{Deserialize, Serialize};

use crate::core::logging::LogEntry;
use crate::core::options::TranscodeOptions;
use crate::core::JobId;

/// Maximum retained run-log entries per job
const RUN_LOG_CAP: usize = 100;

// =============================================================================
// Job Types
// =============================================================================

/// Job lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Not running; eligible for (re)start. Freshly submitted, failed and
    /// cancelled jobs all land here.
    #[default]
    Pending,
    /// Encoder process active
    Running,
    /// Stopped by the user with progress retained for display
    Paused,
    /// Finished; output file is final
    Completed,
    /// Failed without retry. Run failures normally re-enter `Pending` with
    /// `lastError` set; this state is reserved for jobs an embedder marks
    /// as given up, and stays in the wire model for report round-trips.
    Failed,
    /// Superseded by a software fallback successor
    Cancelled,
}

impl JobState {
    /// Terminal states accept no further commands.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Outcome statistics for a completed run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Wall-clock encode time
    pub duration_ms: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// output size / input size
    pub compression_ratio: f64,
}

/// One transcode job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID (ULID)
    pub id: JobId,
    /// Source media path
    pub input_path: String,
    /// Destination path, collision-adjusted at submit time
    pub output_path: String,
    /// Normalized transcode settings
    pub options: TranscodeOptions,
    /// Whether this job remuxes with `-c copy` instead of encoding
    pub stream_copy: bool,
    /// Current lifecycle state
    pub state: JobState,
    /// Last reported progress (0.0 - 100.0)
    pub progress_percent: f64,
    /// Creation timestamp
    pub created_at: String,
    /// When the current (or last) run started
    pub started_at: Option<String>,
    /// When the job reached a terminal state
    pub ended_at: Option<String>,
    /// Most recent failure message, cleared on restart
    pub last_error: Option<String>,
    /// Software fallback successor, when this job was superseded
    pub superseded_by: Option<JobId>,
    /// Outcome statistics, set on completion
    pub stats: Option<RunStats>,
    /// Ordered run-scoped log entries, oldest first, bounded
    #[serde(default)]
    pub run_log: Vec<LogEntry>,
}

impl Job {
    /// Creates a new pending job
    pub fn new(input_path: &str, output_path: &str, options: TranscodeOptions) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            input_path: input_path.to_string(),
            output_path: output_path.to_string(),
            options,
            stream_copy: false,
            state: JobState::Pending,
            progress_percent: 0.0,
            created_at: crate::core::now_rfc3339(),
            started_at: None,
            ended_at: None,
            last_error: None,
            superseded_by: None,
            stats: None,
            run_log: Vec::new(),
        }
    }

    /// Checks if the encoder is (or should be) active for this job
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Append a run-scoped log entry, evicting the oldest past the cap.
    pub fn push_log(&mut self, entry: LogEntry) {
        if self.run_log.len() >= RUN_LOG_CAP {
            self.run_log.remove(0);
        }
        self.run_log.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_creation() {
        let job = Job::new("/in/a.mov", "/out/a.mp4", TranscodeOptions::default());
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.progress_percent, 0.0);
        assert!(job.started_at.is_none());
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Failed.is_terminal());
        assert!(!JobState::Paused.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_run_log_is_bounded() {
        use crate::core::logging::LogLevel;

        let mut job = Job::new("/in/a.mov", "/out/a.mp4", TranscodeOptions::default());
        for i in 0..150 {
            job.push_log(LogEntry::new(LogLevel::Info, "jobs", &format!("entry {i}")));
        }
        assert_eq!(job.run_log.len(), RUN_LOG_CAP);
        assert_eq!(job.run_log[0].message, "entry 50");
        assert_eq!(job.run_log.last().unwrap().message, "entry 149");
    }

    #[test]
    fn test_wire_format() {
        let job = Job::new("/in/a.mov", "/out/a.mp4", TranscodeOptions::default());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["inputPath"], "/in/a.mov");
        assert!(json["supersededBy"].is_null());
    }
}
