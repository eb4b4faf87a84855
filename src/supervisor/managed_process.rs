//! Managed Process - direct process spawning with stdio capture
//!
//! One `ManagedProcess` wraps one OS process:
//! - stdin command injection through a writer task
//! - stdout and stderr merged into a single line channel
//! - liveness read from the OS on every call (`try_wait`), never cached
//! - an end-of-output signal set once the reader has drained the channel
//! - terminate / kill escalation helpers

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, watch};

use super::console::LogSource;
use crate::utils::{current_timestamp, lock};

const OUTPUT_CHANNEL: usize = 1024;
const STDIN_CHANNEL: usize = 256;

/// One line of merged process output
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub source: LogSource,
    pub content: String,
}

/// A server process spawned and owned by the supervisor.
pub struct ManagedProcess {
    pub pid: u32,
    /// Unix timestamp (seconds) of the spawn
    pub started_at: u64,
    child: Mutex<Child>,
    stdin_tx: mpsc::Sender<String>,
    drained: watch::Sender<bool>,
}

impl ManagedProcess {
    /// Spawn `program args...` in `working_dir`.
    ///
    /// Returns the handle and the receiving end of the merged output channel.
    /// The channel closes once both stdout and stderr reach end-of-stream.
    pub fn spawn(
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<(Self, mpsc::Receiver<OutputLine>)> {
        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn process '{}'", program))?;

        let pid = child.id().context("Failed to get PID of spawned process")?;

        let (out_tx, out_rx) = mpsc::channel::<OutputLine>(OUTPUT_CHANNEL);
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(STDIN_CHANNEL);

        // ── stdout / stderr readers ──────────────────────────
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, LogSource::Stdout, out_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, LogSource::Stderr, out_tx));
        }

        // ── stdin writer ─────────────────────────────────────
        if let Some(mut stdin_handle) = child.stdin.take() {
            let mut rx = stdin_rx;
            tokio::spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    let data = if cmd.ends_with('\n') { cmd } else { format!("{}\n", cmd) };
                    if stdin_handle.write_all(data.as_bytes()).await.is_err() {
                        break;
                    }
                    if stdin_handle.flush().await.is_err() {
                        break;
                    }
                }
            });
        }

        tracing::info!("Process started with PID {}", pid);

        Ok((
            Self {
                pid,
                started_at: current_timestamp(),
                child: Mutex::new(child),
                stdin_tx,
                drained: watch::channel(false).0,
            },
            out_rx,
        ))
    }

    /// Queue one line for stdin. False if the process is not running or the
    /// writer has gone away.
    pub fn send_command(&self, command: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.stdin_tx.try_send(command.to_string()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to queue command for PID {}: {}", self.pid, e);
                false
            }
        }
    }

    /// Whether the OS process is still alive.
    pub fn is_running(&self) -> bool {
        match lock(&self.child, "child").try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                tracing::warn!("Failed to poll PID {}: {}", self.pid, e);
                false
            }
        }
    }

    /// Record that every output line of this process has been consumed.
    pub fn mark_drained(&self) {
        self.drained.send_replace(true);
    }

    /// Wait up to `timeout` for [`mark_drained`](Self::mark_drained).
    /// Returns whether the output was drained in time.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let mut rx = self.drained.subscribe();
        let drained = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|drained| *drained)).await,
            Ok(Ok(_))
        );
        drained
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        lock(&self.child, "child").try_wait().ok().flatten()
    }

    /// Ask the OS to terminate the process (SIGTERM on unix).
    pub fn terminate(&self) {
        if !self.is_running() {
            return;
        }
        tracing::info!("Sending TERM to PID {}", self.pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Err(e) = signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                tracing::warn!("Failed to send TERM to PID {}: {}", self.pid, e);
            }
        }

        // No soft terminate on Windows; the ladder's next step kills.
        #[cfg(not(unix))]
        {
            tracing::debug!("TERM unsupported on this platform for PID {}", self.pid);
        }
    }

    /// Forcefully kill the process if it is still alive.
    pub fn kill(&self) {
        let mut child = lock(&self.child, "child");
        if matches!(child.try_wait(), Ok(None)) {
            tracing::info!("Killing PID {}", self.pid);
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill PID {}: {}", self.pid, e);
            }
        }
    }
}

/// Forward lines from one stream to the merged channel. Invalid UTF-8 is
/// replaced rather than ending the stream.
async fn forward_lines<R>(stream: R, source: LogSource, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let content = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(OutputLine { source, content }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Output stream {:?} read error: {}", source, e);
                break;
            }
        }
    }
}
