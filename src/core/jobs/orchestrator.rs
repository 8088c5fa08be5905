//! Job Orchestrator Module
//!
//! Owns the job table and drives the state machine. All job mutation goes
//! through here: caller commands (submit/pause/resume/cancel/delete) and
//! encoder process events both funnel into the same table behind one lock.
//!
//! Every run carries a token. A job's token advances when a new run starts
//! for it, so terminal events from a superseded run (for example the old
//! process winding down after a resume) are recognized as stale and dropped
//! instead of corrupting the current run's state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::config::OrchestratorConfig;
use crate::core::events::{EventSink, Notification};
use crate::core::ffmpeg::{
    detect_encoder, is_termination_message, probe_media, EncoderPaths, EncoderProcess, MediaInfo,
    ProcessEvent, ProgressParser, TerminateHandle,
};
use crate::core::hwaccel::{
    is_hardware_failure, list_hardware_options, EncoderCapabilityProbe, FfmpegCapabilityProbe,
    HardwareAccel, HardwareEncoderValidator, HardwareOption,
};
use crate::core::logging::{LogEntry, LogLevel, LogStore};
use crate::core::options::{validate, TranscodeOptions, ValidatedOptions};
use crate::core::{now_rfc3339, CoreError, CoreResult, JobId};

use super::plan::build_plan;
use super::{Job, JobState, RunStats};

struct JobTable {
    jobs: HashMap<JobId, Job>,
    /// Live process handles, keyed by job
    handles: HashMap<JobId, TerminateHandle>,
    /// Current run token per job; events from older runs are stale
    tokens: HashMap<JobId, u64>,
    /// Output paths promised to not-yet-finished jobs, so collision
    /// adjustment accounts for files that do not exist on disk yet
    reserved_outputs: HashSet<PathBuf>,
    next_token: u64,
}

impl JobTable {
    fn advance_token(&mut self, job_id: &str) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.tokens.insert(job_id.to_string(), token);
        token
    }

    fn token_current(&self, job_id: &str, token: u64) -> bool {
        self.tokens.get(job_id) == Some(&token)
    }
}

struct Inner {
    config: OrchestratorConfig,
    encoder: EncoderPaths,
    validator: HardwareEncoderValidator,
    sink: EventSink,
    log: Arc<LogStore>,
    table: Mutex<JobTable>,
}

/// The engine's command surface. Cheap to clone; all clones share the same
/// job table.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    /// Create an orchestrator, detecting the encoder binaries from the
    /// configuration.
    pub async fn new(config: OrchestratorConfig) -> CoreResult<Self> {
        let encoder = detect_encoder(&config)?;
        let probe: Arc<dyn EncoderCapabilityProbe> =
            Arc::new(FfmpegCapabilityProbe::new(&encoder));
        Self::with_encoder(config, encoder, probe)
    }

    /// Create an orchestrator with pre-resolved binaries and an injected
    /// capability probe. This is the seam tests use to fake hardware.
    pub fn with_encoder(
        config: OrchestratorConfig,
        encoder: EncoderPaths,
        probe: Arc<dyn EncoderCapabilityProbe>,
    ) -> CoreResult<Self> {
        let log_dir = config
            .log_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("transcodio").join("engine")))
            .unwrap_or_else(|| PathBuf::from(".transcodio"));

        let log = Arc::new(LogStore::open(log_dir, config.log_retention)?);
        let sink = EventSink::new(Arc::clone(&log));
        let validator = HardwareEncoderValidator::new(
            probe,
            Duration::from_millis(config.probe_timeout_ms),
        );

        info!(version = %encoder.version, "encoder resolved");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                encoder,
                validator,
                sink,
                log,
                table: Mutex::new(JobTable {
                    jobs: HashMap::new(),
                    handles: HashMap::new(),
                    tokens: HashMap::new(),
                    reserved_outputs: HashSet::new(),
                    next_token: 0,
                }),
            }),
        })
    }

    /// Subscribe to the notification stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.inner.sink.subscribe()
    }

    /// The resolved encoder version string.
    pub fn encoder_version(&self) -> &str {
        &self.inner.encoder.version
    }

    /// Submit a transcode job. Validates the input and options, reserves a
    /// collision-free output path, and starts the run concurrently. Returns
    /// the job id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, input_path: &str, options: &TranscodeOptions) -> CoreResult<JobId> {
        let (job_id, token) = self.inner.insert_job(input_path, options)?;
        Inner::spawn_run(Arc::clone(&self.inner), job_id.clone(), token);
        Ok(job_id)
    }

    /// Pause a running job. The encoder stops gracefully; progress is kept
    /// for display. Returns `false` when the job is not running.
    pub async fn pause(&self, job_id: &str) -> CoreResult<bool> {
        let handle = {
            let mut table = self.inner.table.lock().unwrap();
            let job = table
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

            if job.state != JobState::Running {
                return Ok(false);
            }
            // State first: the process error event that follows the stop
            // must find the job already Paused to be suppressed.
            job.state = JobState::Paused;
            self.inner.log_run(job, LogLevel::Info, "paused");
            table.handles.get(job_id).cloned()
        };

        self.inner.emit_state_changed(job_id, JobState::Paused);
        if let Some(handle) = handle {
            handle.terminate().await;
        }
        info!(job_id, "job paused");
        Ok(true)
    }

    /// Resume a paused job. The partial output is discarded and the encode
    /// restarts from the beginning of the input; progress resets to zero.
    /// Returns `false` when the job is not paused.
    pub async fn resume(&self, job_id: &str) -> CoreResult<bool> {
        let (token, output_path) = {
            let mut table = self.inner.table.lock().unwrap();
            let job = table
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

            if job.state != JobState::Paused {
                return Ok(false);
            }
            job.state = JobState::Pending;
            job.progress_percent = 0.0;
            job.last_error = None;
            self.inner
                .log_run(job, LogLevel::Info, "resumed; restarting from the beginning");
            let output_path = job.output_path.clone();
            let token = table.advance_token(job_id);
            (token, output_path)
        };

        // The paused run's output is incomplete by definition.
        remove_file_best_effort(&output_path);

        Inner::spawn_run(Arc::clone(&self.inner), job_id.to_string(), token);
        info!(job_id, "job resumed (full restart)");
        Ok(true)
    }

    /// Cancel a running or paused job. The job returns to `Pending` with
    /// zero progress so it can be resubmitted, and the partial output is
    /// deleted after a short grace delay. Returns `false` when the job is
    /// in neither state.
    pub async fn cancel(&self, job_id: &str) -> CoreResult<bool> {
        let (handle, output_path) = {
            let mut table = self.inner.table.lock().unwrap();
            let job = table
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

            if !matches!(job.state, JobState::Running | JobState::Paused) {
                return Ok(false);
            }
            job.state = JobState::Pending;
            job.progress_percent = 0.0;
            self.inner
                .log_run(job, LogLevel::Info, "cancelled; partial output scheduled for deletion");
            let output_path = job.output_path.clone();
            (table.handles.get(job_id).cloned(), output_path)
        };

        self.inner.emit_state_changed(job_id, JobState::Pending);
        if let Some(handle) = handle {
            handle.terminate().await;
        }

        // Delayed so the child can release the file handle first.
        let grace = Duration::from_millis(self.inner.config.cancel_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            remove_file_best_effort(&output_path);
        });

        info!(job_id, "job cancelled");
        Ok(true)
    }

    /// Remove a job from the table. Refused while its encoder is live.
    pub fn delete_job(&self, job_id: &str) -> CoreResult<()> {
        let mut table = self.inner.table.lock().unwrap();
        let job = table
            .jobs
            .get(job_id)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

        if job.is_running() {
            return Err(CoreError::InvalidJobState {
                job_id: job_id.to_string(),
                state: job.state.to_string(),
                required: "not running".to_string(),
            });
        }

        let output = PathBuf::from(&job.output_path);
        table.jobs.remove(job_id);
        table.tokens.remove(job_id);
        table.handles.remove(job_id);
        table.reserved_outputs.remove(&output);
        Ok(())
    }

    /// Snapshot of one job.
    pub fn get_job(&self, job_id: &str) -> CoreResult<Job> {
        self.inner
            .table
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Snapshot of all jobs, newest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let table = self.inner.table.lock().unwrap();
        let mut jobs: Vec<Job> = table.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Probe an input file without creating a job.
    pub async fn probe_input(&self, input_path: &str) -> CoreResult<MediaInfo> {
        let info = probe_media(
            &self.inner.encoder,
            Path::new(input_path),
            Duration::from_millis(self.inner.config.probe_timeout_ms),
        )
        .await?;
        Ok(info)
    }

    /// The static acceleration catalog, for display and selection.
    pub fn list_hardware_options(&self) -> Vec<HardwareOption> {
        list_hardware_options()
    }

    /// Pre-flight check for one acceleration/codec pairing.
    pub async fn validate_hardware(
        &self,
        accel: HardwareAccel,
        codec: &str,
    ) -> crate::core::hwaccel::HwValidation {
        self.inner.validator.validate(accel, codec).await
    }

    /// Diagnostic report: system facts, job snapshots, recent log tail.
    pub fn export_report(&self) -> CoreResult<serde_json::Value> {
        let jobs = serde_json::to_value(self.list_jobs())?;
        Ok(self.inner.log.export_report(jobs))
    }
}

impl Inner {
    /// Validate and insert a new pending job, reserving its output path.
    fn insert_job(&self, input_path: &str, options: &TranscodeOptions) -> CoreResult<(JobId, u64)> {
        let input = Path::new(input_path);
        if !input.is_file() {
            return Err(CoreError::InputNotFound(input_path.to_string()));
        }

        let validated = validate(options)?;

        let mut table = self.table.lock().unwrap();
        let output_path = self.derive_output_path(input, &validated, &table.reserved_outputs)?;

        let mut job = Job::new(input_path, &output_path.to_string_lossy(), validated.options);
        job.stream_copy = validated.stream_copy;
        let job_id = job.id.clone();

        // Submission and any option downgrades go to the job's own run log
        // and, tagged with its id, to the durable log.
        let mut entries = vec![
            LogEntry::new(LogLevel::Info, "jobs", &format!("submitted {input_path}"))
                .with_job(&job_id),
        ];
        for adjustment in &validated.adjustments {
            entries.push(LogEntry::new(LogLevel::Warn, "options", adjustment).with_job(&job_id));
        }
        for entry in &entries {
            job.push_log(entry.clone());
        }

        table.reserved_outputs.insert(output_path);
        table.jobs.insert(job_id.clone(), job);
        let token = table.advance_token(&job_id);
        drop(table);

        for entry in entries {
            self.log.append(entry);
        }
        Ok((job_id, token))
    }

    /// Record a run-scoped fact on the job and mirror it to the durable log.
    fn log_run(&self, job: &mut Job, level: LogLevel, message: &str) {
        let entry = LogEntry::new(level, "jobs", message).with_job(&job.id);
        job.push_log(entry.clone());
        self.log.append(entry);
    }

    /// Choose an output path that collides with neither the filesystem nor
    /// another job's reservation, appending " (n)" to the stem as needed.
    fn derive_output_path(
        &self,
        input: &Path,
        validated: &ValidatedOptions,
        reserved: &HashSet<PathBuf>,
    ) -> CoreResult<PathBuf> {
        let dir = match &self.config.output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let ext = &validated.options.output_format;

        let mut candidate = dir.join(format!("{stem}.{ext}"));
        let mut counter = 1;
        while candidate.exists() || reserved.contains(&candidate) || candidate == input {
            candidate = dir.join(format!("{stem} ({counter}).{ext}"));
            counter += 1;
        }
        Ok(candidate)
    }

    fn spawn_run(inner: Arc<Inner>, job_id: JobId, token: u64) {
        tokio::spawn(async move {
            inner.run(job_id, token).await;
        });
    }

    fn emit_state_changed(&self, job_id: &str, state: JobState) {
        self.sink.emit(Notification::StateChanged {
            job_id: job_id.to_string(),
            state: state.to_string(),
        });
    }

    /// One encoder run for a job, from pre-flight to terminal event.
    async fn run(self: Arc<Self>, job_id: JobId, token: u64) {
        let (input_path, output_path, options, stream_copy) = {
            let table = self.table.lock().unwrap();
            match table.jobs.get(&job_id) {
                Some(job) if table.token_current(&job_id, token) => (
                    job.input_path.clone(),
                    job.output_path.clone(),
                    job.options.clone(),
                    job.stream_copy,
                ),
                _ => return,
            }
        };

        let validated = match validate(&options) {
            Ok(validated) => validated,
            Err(e) => {
                self.finish_with_error(&job_id, token, &e.to_string());
                return;
            }
        };

        // Pre-flight hardware check; an unusable accelerator fails over to
        // software before any encoding starts.
        let accel = options.hardware_accel;
        let needs_video_encode = !stream_copy
            && !validated.audio_only
            && validated.options.video_codec.as_deref() != Some("copy");

        if accel.is_hardware() && needs_video_encode {
            let codec = validated.options.video_codec.clone().unwrap_or_default();
            let check = self.validator.validate(accel, &codec).await;
            if !check.is_valid {
                let reason = check
                    .error
                    .unwrap_or_else(|| "hardware encoder unavailable".to_string());
                if let Some((successor_id, successor_token)) =
                    self.fall_back_to_software(&job_id, token, accel, &reason)
                {
                    Inner::spawn_run(Arc::clone(&self), successor_id, successor_token);
                }
                return;
            }
        }

        // Advisory probe; a failure only costs percent-based progress.
        let media = probe_media(
            &self.encoder,
            Path::new(&input_path),
            Duration::from_millis(self.config.probe_timeout_ms),
        )
        .await
        .map_err(|e| debug!(job_id, error = %e, "input probe failed"))
        .ok();

        let plan = match build_plan(
            Path::new(&input_path),
            Path::new(&output_path),
            &validated,
            accel,
            media.as_ref(),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                self.finish_with_error(&job_id, token, &e.to_string());
                return;
            }
        };

        let kill_grace = Duration::from_millis(self.config.terminate_kill_grace_ms);
        let mut process =
            match EncoderProcess::spawn(&self.encoder.ffmpeg_path, &plan.args, kill_grace) {
                Ok(process) => process,
                Err(e) => {
                    self.finish_with_error(&job_id, token, &e.to_string());
                    return;
                }
            };

        let superseded = {
            let mut table = self.table.lock().unwrap();
            if table.token_current(&job_id, token) {
                table
                    .handles
                    .insert(job_id.clone(), process.terminate_handle());
                if let Some(job) = table.jobs.get_mut(&job_id) {
                    job.state = JobState::Running;
                    job.started_at = Some(now_rfc3339());
                    job.last_error = None;
                    self.log_run(job, LogLevel::Info, "encoder started");
                }
                false
            } else {
                true
            }
        };
        if superseded {
            // Superseded while spawning; stop the orphan process.
            process.terminate().await;
            return;
        }
        self.emit_state_changed(&job_id, JobState::Running);
        debug!(job_id, encoder = ?plan.video_encoder, "encoder started");

        let started = std::time::Instant::now();
        let mut parser = ProgressParser::new(media.as_ref().map(|m| m.duration_sec));

        while let Some(event) = process.recv().await {
            match event {
                ProcessEvent::Progress(line) => {
                    if let Some(sample) = parser.push_line(&line) {
                        self.on_progress(&job_id, token, accel, sample);
                    }
                }
                ProcessEvent::End => {
                    self.on_end(&job_id, token, started.elapsed(), &input_path, &output_path);
                }
                ProcessEvent::Error(message) => {
                    if let Some((successor_id, successor_token)) =
                        self.on_error(&job_id, token, accel, &message, &output_path)
                    {
                        Inner::spawn_run(Arc::clone(&self), successor_id, successor_token);
                    }
                }
            }
        }

        let mut table = self.table.lock().unwrap();
        if table.token_current(&job_id, token) {
            table.handles.remove(&job_id);
        }
    }

    fn on_progress(
        &self,
        job_id: &str,
        token: u64,
        accel: HardwareAccel,
        sample: crate::core::ffmpeg::ProgressSample,
    ) {
        {
            let mut table = self.table.lock().unwrap();
            if !table.token_current(job_id, token) {
                return;
            }
            match table.jobs.get_mut(job_id) {
                // A paused or cancelled job must not have its displayed
                // progress overwritten by the draining process.
                Some(job) if job.state == JobState::Running => {
                    job.progress_percent = sample.percent;
                }
                _ => return,
            }
        }

        self.sink.emit(Notification::Progress {
            job_id: job_id.to_string(),
            percent: sample.percent,
            timemark: sample.timemark,
            fps: sample.fps,
            bitrate_kbps: sample.bitrate_kbps,
            output_bytes: sample.output_bytes,
            hardware_accel: accel,
        });
    }

    /// Process exited cleanly. Completion only counts for a job still in
    /// `Running`; a clean exit after pause or cancel is the encoder
    /// finalizing on the stop request and is ignored.
    fn on_end(
        &self,
        job_id: &str,
        token: u64,
        elapsed: Duration,
        input_path: &str,
        output_path: &str,
    ) {
        let stats = {
            let mut table = self.table.lock().unwrap();
            if !table.token_current(job_id, token) {
                return;
            }
            let Some(job) = table.jobs.get_mut(job_id) else {
                return;
            };
            if job.state != JobState::Running {
                debug!(job_id, state = %job.state, "clean exit after stop request; ignored");
                return;
            }

            let input_bytes = file_size(input_path);
            let output_bytes = file_size(output_path);
            let stats = RunStats {
                duration_ms: elapsed.as_millis() as u64,
                input_bytes,
                output_bytes,
                compression_ratio: if input_bytes > 0 {
                    output_bytes as f64 / input_bytes as f64
                } else {
                    0.0
                },
            };

            job.state = JobState::Completed;
            job.progress_percent = 100.0;
            job.ended_at = Some(now_rfc3339());
            job.stats = Some(stats.clone());
            self.log_run(job, LogLevel::Info, "completed");
            stats
        };

        self.emit_state_changed(job_id, JobState::Completed);
        self.sink.emit(Notification::Completed {
            job_id: job_id.to_string(),
            output_path: output_path.to_string(),
            duration_ms: stats.duration_ms,
            input_bytes: stats.input_bytes,
            output_bytes: stats.output_bytes,
            compression_ratio: stats.compression_ratio,
        });
        info!(job_id, duration_ms = stats.duration_ms, "job completed");
    }

    /// Process exited abnormally. Disambiguation happens against the job's
    /// current state, never the exit status alone. Returns a software
    /// fallback successor run for the caller to spawn, when one was created.
    fn on_error(
        &self,
        job_id: &str,
        token: u64,
        accel: HardwareAccel,
        message: &str,
        output_path: &str,
    ) -> Option<(JobId, u64)> {
        let state = {
            let table = self.table.lock().unwrap();
            if !table.token_current(job_id, token) {
                return None;
            }
            table.jobs.get(job_id)?.state
        };

        match state {
            // Pause already moved the job; this is the stop's side effect.
            JobState::Paused => {
                debug!(job_id, "process error after pause; suppressed");
                None
            }
            // Cancel already moved the job; a termination-shaped message
            // confirms the stop we requested.
            JobState::Pending if is_termination_message(message) => {
                debug!(job_id, "process error after cancel; suppressed");
                None
            }
            JobState::Running if accel.is_hardware() && is_hardware_failure(message) => {
                remove_file_best_effort(output_path);
                self.fall_back_to_software(job_id, token, accel, message)
            }
            JobState::Running | JobState::Pending => {
                remove_file_best_effort(output_path);
                self.finish_with_error(job_id, token, message);
                None
            }
            // Terminal states never move.
            JobState::Completed | JobState::Failed | JobState::Cancelled => {
                warn!(job_id, state = %state, "process error for settled job; ignored");
                None
            }
        }
    }

    /// Ordinary failure: back to `Pending` for retry, progress reset,
    /// error preserved.
    fn finish_with_error(&self, job_id: &str, token: u64, message: &str) {
        {
            let mut table = self.table.lock().unwrap();
            if !table.token_current(job_id, token) {
                return;
            }
            let Some(job) = table.jobs.get_mut(job_id) else {
                return;
            };
            job.state = JobState::Pending;
            job.progress_percent = 0.0;
            job.last_error = Some(message.to_string());
            self.log_run(job, LogLevel::Error, &format!("failed: {message}"));
        }

        self.emit_state_changed(job_id, JobState::Pending);
        self.sink.emit(Notification::Failed {
            job_id: job_id.to_string(),
            error: message.to_string(),
        });
        warn!(job_id, error = message, "job failed; back to pending");
    }

    /// Hardware failure: create a software successor job for the same
    /// input, cancel the original in its favor, and notify. At most one
    /// fallback happens per job because the successor runs with
    /// acceleration `None`, which can never take this path again. Returns
    /// the successor run for the caller to spawn.
    fn fall_back_to_software(
        &self,
        job_id: &str,
        token: u64,
        accel: HardwareAccel,
        message: &str,
    ) -> Option<(JobId, u64)> {
        let (input_path, mut options) = {
            let table = self.table.lock().unwrap();
            if !table.token_current(job_id, token) {
                return None;
            }
            let job = table.jobs.get(job_id)?;
            (job.input_path.clone(), job.options.clone())
        };
        options.hardware_accel = HardwareAccel::None;

        match self.insert_job(&input_path, &options) {
            Ok((successor_id, successor_token)) => {
                {
                    let mut table = self.table.lock().unwrap();
                    if let Some(job) = table.jobs.get_mut(job_id) {
                        job.state = JobState::Cancelled;
                        job.ended_at = Some(now_rfc3339());
                        job.last_error = Some(message.to_string());
                        job.superseded_by = Some(successor_id.clone());
                        self.log_run(
                            job,
                            LogLevel::Warn,
                            &format!("hardware encode failed; superseded by {successor_id}"),
                        );
                    }
                }
                self.emit_state_changed(job_id, JobState::Cancelled);
                self.sink.emit(Notification::HardwareFallback {
                    job_id: job_id.to_string(),
                    original_accel: accel,
                    error: message.to_string(),
                    successor_job_id: successor_id.clone(),
                });
                warn!(
                    job_id,
                    successor = successor_id.as_str(),
                    accel = %accel,
                    "hardware encode failed; software fallback started"
                );
                Some((successor_id, successor_token))
            }
            Err(e) => {
                let combined = format!("{message}; software fallback submission failed: {e}");
                self.finish_with_error(job_id, token, &combined);
                None
            }
        }
    }
}

fn file_size(path: &str) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn remove_file_best_effort<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to delete partial output");
        }
    }
}
