//! Encoder Process Module
//!
//! Owns one running ffmpeg child process. The spawned task reads stdout line
//! by line and forwards raw progress lines plus a single terminal event over
//! a channel. Graceful termination writes `q` to the encoder's stdin, which
//! makes ffmpeg finalize the container before exiting; a kill timer backs
//! that up in case the encoder ignores the request.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{FfmpegError, FfmpegResult};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Event stream from a running encoder process.
///
/// Exactly one of `End` or `Error` arrives after the last `Progress` event,
/// then the channel closes.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// One raw line of `-progress pipe:1` output
    Progress(String),
    /// Process exited successfully
    End,
    /// Process exited abnormally; carries a bounded stderr excerpt
    Error(String),
}

enum Control {
    Terminate,
}

/// Handle to a spawned encoder process.
pub struct EncoderProcess {
    events: mpsc::Receiver<ProcessEvent>,
    control: mpsc::Sender<Control>,
}

/// Cloneable handle that can request a graceful stop without owning the
/// event stream.
#[derive(Clone)]
pub struct TerminateHandle {
    control: mpsc::Sender<Control>,
}

impl TerminateHandle {
    /// Request a graceful stop. Idempotent; a no-op once the process has
    /// already exited.
    pub async fn terminate(&self) {
        let _ = self.control.send(Control::Terminate).await;
    }
}

impl EncoderProcess {
    /// Spawn the encoder with the given arguments.
    ///
    /// `kill_grace` bounds how long a graceful stop may take before the
    /// process is killed outright.
    pub fn spawn(
        ffmpeg_path: &PathBuf,
        args: &[String],
        kill_grace: Duration,
    ) -> FfmpegResult<Self> {
        let mut cmd = tokio::process::Command::new(ffmpeg_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(FfmpegError::ProcessError)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FfmpegError::ExecutionFailed("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FfmpegError::ExecutionFailed("Failed to capture stderr".to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<ProcessEvent>(64);
        let (control_tx, control_rx) = mpsc::channel::<Control>(4);

        tokio::spawn(drive_process(
            child, stdin, stdout, stderr, event_tx, control_rx, kill_grace,
        ));

        Ok(Self {
            events: event_rx,
            control: control_tx,
        })
    }

    /// Receive the next event. `None` after the terminal event.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Request a graceful stop. Idempotent; the driving task kills the
    /// process if it has not exited within the grace period.
    pub async fn terminate(&self) {
        let _ = self.control.send(Control::Terminate).await;
    }

    /// A detached handle for stop requests.
    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            control: self.control.clone(),
        }
    }
}

async fn drive_process(
    mut child: tokio::process::Child,
    stdin: Option<tokio::process::ChildStdin>,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    event_tx: mpsc::Sender<ProcessEvent>,
    mut control_rx: mpsc::Receiver<Control>,
    kill_grace: Duration,
) {
    // Collect a bounded stderr tail for error reporting.
    let stderr_task = tokio::spawn(async move {
        let mut tail: Vec<String> = Vec::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() >= 20 {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail.join("\n")
    });

    let mut stdin = stdin;
    let mut lines = BufReader::new(stdout).lines();

    // Kill timer; armed on the first terminate request.
    let kill_deadline = tokio::time::sleep(Duration::MAX);
    tokio::pin!(kill_deadline);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if event_tx.send(ProcessEvent::Progress(line)).await.is_err() {
                            // Receiver dropped; stop the encoder.
                            let _ = child.start_kill();
                            break;
                        }
                    }
                    // EOF or read error; the process is winding down.
                    Ok(None) | Err(_) => break,
                }
            }
            Some(Control::Terminate) = control_rx.recv() => {
                if !stop_requested {
                    stop_requested = true;
                    if let Some(stdin) = stdin.as_mut() {
                        let _ = stdin.write_all(b"q\n").await;
                        let _ = stdin.flush().await;
                    }
                    kill_deadline.as_mut().reset(tokio::time::Instant::now() + kill_grace);
                }
            }
            _ = &mut kill_deadline, if stop_requested => {
                let _ = child.start_kill();
            }
        }
    }

    // stdin must be dropped so the child sees EOF if it reads further.
    drop(stdin);

    let status = match tokio::time::timeout(kill_grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(_)) => None,
        Err(_) => {
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    let event = match status {
        Some(status) if status.success() => ProcessEvent::End,
        Some(status) => {
            #[cfg(unix)]
            let detail = {
                use std::os::unix::process::ExitStatusExt;
                match status.signal() {
                    Some(signal) => format!("encoder terminated by signal {signal}"),
                    None => exit_detail(status.code(), &stderr_tail),
                }
            };
            #[cfg(not(unix))]
            let detail = exit_detail(status.code(), &stderr_tail);

            ProcessEvent::Error(detail)
        }
        None => ProcessEvent::Error("encoder process could not be reaped".to_string()),
    };

    let _ = event_tx.send(event).await;
}

fn exit_detail(code: Option<i32>, stderr_tail: &str) -> String {
    let code_str = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
    if stderr_tail.is_empty() {
        format!("encoder exited with status {code_str}")
    } else {
        format!("encoder exited with status {code_str}: {stderr_tail}")
    }
}

/// Whether an error message describes an intentional stop rather than a
/// genuine failure. A graceful `q` makes ffmpeg exit with status 255, and a
/// killed process reports the signal; neither should surface as a job error
/// when the engine itself requested the stop.
pub fn is_termination_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    const BENIGN: [&str; 5] = [
        "terminated by signal",
        "sigterm",
        "sigkill",
        "exiting normally",
        "exited with status 255",
    ];
    BENIGN.iter().any(|sig| lower.contains(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_messages_recognized() {
        assert!(is_termination_message("encoder terminated by signal 9"));
        assert!(is_termination_message("encoder exited with status 255"));
        assert!(is_termination_message(
            "Exiting normally, received signal 15."
        ));
        assert!(!is_termination_message(
            "encoder exited with status 1: No such file or directory"
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn successful_run_emits_progress_then_end() {
            let dir = tempfile::TempDir::new().unwrap();
            let script = write_script(
                dir.path(),
                "fake_encoder.sh",
                "#!/bin/sh\necho 'out_time_ms=1000000'\necho 'progress=end'\nexit 0\n",
            );

            let mut process =
                EncoderProcess::spawn(&script, &[], Duration::from_millis(500)).unwrap();

            let mut saw_progress = false;
            let mut terminal = None;
            while let Some(event) = process.recv().await {
                match event {
                    ProcessEvent::Progress(_) => saw_progress = true,
                    other => terminal = Some(other),
                }
            }

            assert!(saw_progress);
            assert!(matches!(terminal, Some(ProcessEvent::End)));
        }

        #[tokio::test]
        async fn failing_run_carries_stderr_tail() {
            let dir = tempfile::TempDir::new().unwrap();
            let script = write_script(
                dir.path(),
                "fake_encoder.sh",
                "#!/bin/sh\necho 'Unknown encoder h264_nvenc' >&2\nexit 1\n",
            );

            let mut process =
                EncoderProcess::spawn(&script, &[], Duration::from_millis(500)).unwrap();

            let mut terminal = None;
            while let Some(event) = process.recv().await {
                if !matches!(event, ProcessEvent::Progress(_)) {
                    terminal = Some(event);
                }
            }

            match terminal {
                Some(ProcessEvent::Error(msg)) => {
                    assert!(msg.contains("status 1"));
                    assert!(msg.contains("Unknown encoder h264_nvenc"));
                }
                other => panic!("expected Error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn terminate_stops_a_long_run() {
            let dir = tempfile::TempDir::new().unwrap();
            // Exits 0 when it reads 'q' from stdin, like ffmpeg's quit key.
            let script = write_script(
                dir.path(),
                "fake_encoder.sh",
                "#!/bin/sh\nwhile read -r key; do\n  [ \"$key\" = q ] && exit 0\ndone\nsleep 30\n",
            );

            let mut process =
                EncoderProcess::spawn(&script, &[], Duration::from_millis(500)).unwrap();
            process.terminate().await;

            let mut terminal = None;
            while let Some(event) = process.recv().await {
                if !matches!(event, ProcessEvent::Progress(_)) {
                    terminal = Some(event);
                }
            }

            assert!(matches!(terminal, Some(ProcessEvent::End)));
        }

        #[tokio::test]
        async fn unresponsive_process_is_killed_after_grace() {
            let dir = tempfile::TempDir::new().unwrap();
            let script = write_script(
                dir.path(),
                "fake_encoder.sh",
                "#!/bin/sh\ntrap '' TERM\nsleep 30\n",
            );

            let mut process =
                EncoderProcess::spawn(&script, &[], Duration::from_millis(200)).unwrap();
            process.terminate().await;

            let mut terminal = None;
            while let Some(event) = process.recv().await {
                if !matches!(event, ProcessEvent::Progress(_)) {
                    terminal = Some(event);
                }
            }

            match terminal {
                Some(ProcessEvent::Error(msg)) => {
                    assert!(is_termination_message(&msg), "message was: {msg}");
                }
                other => panic!("expected Error, got {other:?}"),
            }
        }
    }
}
