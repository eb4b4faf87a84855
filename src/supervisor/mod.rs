pub mod console;
pub mod error;
pub mod managed_process;
pub mod monitor;
pub mod roster;
pub mod stop_ladder;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::GlobalConfig;
use crate::coordinator::archive::{Archiver, ZipArchiver};
use crate::coordinator::{tasks, Task, TaskLock, TaskReport, TaskState};
use crate::parser::{EventParser, LogEvent};
use crate::utils::lock;
use console::{ChatLog, LogBuffer, LogLine, LogSource};
use error::SupervisorError;
use managed_process::{ManagedProcess, OutputLine};
use roster::PlayerRoster;
use stop_ladder::{StopPhase, StopTarget};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Snapshot returned by [`Supervisor::status`]
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<u64>,
    pub current_task: Option<TaskState>,
    pub last_task: Option<TaskReport>,
}

/// Owns the server process and all state derived from its output.
///
/// Constructed once at startup and shared as `Arc<Supervisor>` with the
/// background loops and the IPC layer.
pub struct Supervisor {
    pub config: GlobalConfig,
    pub tasks: Arc<TaskLock>,
    parser: EventParser,
    process: Mutex<Option<Arc<ManagedProcess>>>,
    /// Output id of the first line of the current process instance
    session_start: Mutex<u64>,
    /// PID an operator stop or kill was issued against
    operator_stop: Mutex<Option<u32>>,
    chat: Mutex<ChatLog>,
    roster: Mutex<PlayerRoster>,
    output: Mutex<LogBuffer>,
    last_report: Mutex<Option<TaskReport>>,
    archiver: Arc<dyn Archiver>,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: GlobalConfig) -> Self {
        Self::with_archiver(config, Arc::new(ZipArchiver))
    }

    pub fn with_archiver(config: GlobalConfig, archiver: Arc<dyn Archiver>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            parser: EventParser::new(Some(&config.update.notice_pattern)),
            chat: Mutex::new(ChatLog::with_capacity(config.console.chat_capacity)),
            roster: Mutex::new(PlayerRoster::new(&config.roster.guest_prefix)),
            output: Mutex::new(LogBuffer::with_capacity(config.console.output_capacity)),
            tasks: Arc::new(TaskLock::new()),
            process: Mutex::new(None),
            session_start: Mutex::new(0),
            operator_stop: Mutex::new(None),
            last_report: Mutex::new(None),
            archiver,
            http,
            config,
        }
    }

    // ─── Process lifecycle ───────────────────────────────────

    /// Start the server unless it is running or a task other than `restart`
    /// holds the lock. Returns whether a process was spawned.
    pub fn start(self: &Arc<Self>) -> Result<bool, SupervisorError> {
        if let Some(task) = self.tasks.current() {
            if task.name != Task::Restart.name() {
                tracing::info!("Start skipped: task '{}' is in flight", task.name);
                return Ok(false);
            }
        }
        self.launch()
    }

    /// Spawn the server if it is not running, without consulting the task
    /// lock. Used by task bodies, which already hold it.
    pub(crate) fn launch(self: &Arc<Self>) -> Result<bool, SupervisorError> {
        let mut slot = lock(&self.process, "process");
        if slot.as_ref().is_some_and(|p| p.is_running()) {
            return Ok(false);
        }

        let (program, args) = self.config.command_line()?;
        tracing::info!("Launching server: {} {}", program, args.join(" "));
        let (process, rx) = ManagedProcess::spawn(&program, &args, &self.config.server.dir)?;
        let process = Arc::new(process);

        let first = self.push_system(format!("Server started with PID {}", process.pid));
        *lock(&self.session_start, "session") = first.id;
        *lock(&self.operator_stop, "operator stop") = None;
        *slot = Some(process.clone());
        drop(slot);

        tokio::spawn(self.clone().reader_loop(process, rx));
        Ok(true)
    }

    /// Reader loop for one process instance; ends at end-of-stream.
    async fn reader_loop(self: Arc<Self>, process: Arc<ManagedProcess>, mut rx: mpsc::Receiver<OutputLine>) {
        while let Some(line) = rx.recv().await {
            if self.ingest_line(line.source, line.content) && self.config.update.enabled {
                match self.trigger_task(Task::AutoUpdate) {
                    Ok(_) => tracing::info!("Update notice seen, auto-update scheduled"),
                    Err(e) => tracing::warn!("Update notice seen but not applied: {}", e),
                }
            }
        }
        process.mark_drained();
        tracing::info!("Output stream closed for PID {}", process.pid);
    }

    /// Record one output line and apply its event. Returns whether the line
    /// is an update notice.
    pub fn ingest_line(&self, source: LogSource, content: String) -> bool {
        if content.trim().is_empty() {
            return false;
        }
        tracing::debug!(target: "server", "{}", content);

        lock(&self.output, "output").push(source, content.clone());
        let update = self.parser.is_update_notice(&content);

        match self.parser.parse_line(&content) {
            LogEvent::ChatMessage { user, text } => {
                lock(&self.chat, "chat").push(format!("<{}> {}", user, text));
            }
            LogEvent::PlayerJoined { user } => {
                lock(&self.roster, "roster").join(&user);
                lock(&self.chat, "chat").push(format!("{} joined the game", user));
                if let Some(template) = &self.config.server.join_command {
                    let command = template.replace("{player}", &user);
                    if !self.send_command(&command) {
                        tracing::debug!("Join command for {} not delivered", user);
                    }
                }
            }
            LogEvent::PlayerLeft { user } => {
                lock(&self.roster, "roster").leave(&user);
                lock(&self.chat, "chat").push(format!("{} left the game", user));
            }
            LogEvent::UpdateAvailable | LogEvent::Other => {
                if let Some(players) = self.parser.parse_player_list(&content) {
                    lock(&self.roster, "roster").reconcile(players);
                }
            }
        }
        update
    }

    pub fn current_process(&self) -> Option<Arc<ManagedProcess>> {
        lock(&self.process, "process").clone()
    }

    pub fn is_running(&self) -> bool {
        self.current_process().is_some_and(|p| p.is_running())
    }

    /// Write one line to the server's stdin. False if it is not running.
    pub fn send_command(&self, text: &str) -> bool {
        match self.current_process() {
            Some(process) => process.send_command(text),
            None => false,
        }
    }

    /// Kill the server immediately. Returns whether it was running.
    pub fn force_kill(&self) -> bool {
        match self.current_process() {
            Some(process) if process.is_running() => {
                process.kill();
                self.push_system(format!("Server PID {} killed", process.pid));
                true
            }
            _ => false,
        }
    }

    /// Quiesce the server with the stop → terminate → kill ladder.
    pub async fn stop_gracefully(&self) -> StopPhase {
        let Some(process) = self.current_process() else {
            return StopPhase::Exited;
        };
        let target = StopHandle {
            process: &process,
            stop_command: &self.config.server.stop_command,
        };
        match stop_ladder::run(&target, &self.config.stop).await {
            Ok(phase) => phase,
            Err(e) => {
                tracing::error!("Stop ladder error: {}", e);
                process.kill();
                StopPhase::ForceKilled
            }
        }
    }

    /// Remember that the running process is being stopped on purpose, so its
    /// exit is never treated as a crash.
    pub fn note_operator_stop(&self) {
        if let Some(process) = self.current_process() {
            *lock(&self.operator_stop, "operator stop") = Some(process.pid);
        }
    }

    /// Consume the operator-stop mark if it was set for `pid`.
    pub fn take_operator_stop(&self, pid: u32) -> bool {
        let mut mark = lock(&self.operator_stop, "operator stop");
        if *mark == Some(pid) {
            *mark = None;
            true
        } else {
            false
        }
    }

    /// Drop the process handle if that process has exited.
    pub fn discard_exited(&self) -> Option<Arc<ManagedProcess>> {
        let mut slot = lock(&self.process, "process");
        if slot.as_ref().is_some_and(|p| !p.is_running()) {
            slot.take()
        } else {
            None
        }
    }

    // ─── Tasks ───────────────────────────────────────────────

    /// Acquire the task lock for `task` and run it in the background.
    ///
    /// Fails with [`SupervisorError::TaskAlreadyRunning`] if another task is in
    /// flight. The lock is released when the returned task finishes. A restore
    /// archive is resolved inside the upload dir before the lock is taken.
    pub fn trigger_task(self: &Arc<Self>, task: Task) -> Result<JoinHandle<TaskReport>, SupervisorError> {
        let task = match task {
            Task::Restore { archive } => Task::Restore {
                archive: self.config.resolve_upload(&archive)?,
            },
            other => other,
        };

        let guard = self.tasks.guard(task.name())?;
        let span = tracing::info_span!("task", name = task.name(), id = %guard.state().id);
        let sup = self.clone();

        Ok(tokio::spawn(
            async move {
                tracing::info!("Task started");
                let result = tasks::execute(&sup, &task).await;
                let report = TaskReport::new(guard.state(), &result);
                match &result {
                    Ok(msg) => tracing::info!("Task finished: {}", msg),
                    Err(e) => tracing::error!("Task failed: {}", e),
                }
                *lock(&sup.last_report, "report") = Some(report.clone());
                drop(guard);
                report
            }
            .instrument(span),
        ))
    }

    pub fn archiver(&self) -> Arc<dyn Archiver> {
        self.archiver.clone()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ─── Chat relay ──────────────────────────────────────────

    /// Relay a web visitor's message into the game and the chat log.
    /// Blank messages are ignored (`Ok(false)`).
    pub fn send_web_chat(&self, guest: &str, text: &str) -> Result<bool, SupervisorError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let payload = serde_json::json!({ "text": format!("<{}> {}", guest, text) });
        if !self.send_command(&format!("tellraw @a {}", payload)) {
            return Err(SupervisorError::ProcessUnavailable);
        }
        lock(&self.chat, "chat").push(format!("<{}> {}", guest, text));
        lock(&self.roster, "roster").join(guest);
        Ok(true)
    }

    // ─── Read side ───────────────────────────────────────────

    pub fn status(&self) -> Status {
        let process = self.current_process();
        let running = process.as_ref().is_some_and(|p| p.is_running());
        Status {
            running,
            pid: process.as_ref().filter(|_| running).map(|p| p.pid),
            started_at: process.as_ref().filter(|_| running).map(|p| p.started_at),
            current_task: self.tasks.current(),
            last_task: lock(&self.last_report, "report").clone(),
        }
    }

    pub fn chat_snapshot(&self, limit: usize) -> Vec<String> {
        lock(&self.chat, "chat").snapshot(limit)
    }

    pub fn players(&self) -> Vec<String> {
        lock(&self.roster, "roster").snapshot()
    }

    pub fn raw_log_snapshot(&self, limit: usize) -> Vec<LogLine> {
        lock(&self.output, "output").get_recent(limit)
    }

    pub fn raw_log_since(&self, since_id: u64) -> Vec<LogLine> {
        lock(&self.output, "output").get_since(since_id)
    }

    /// Trailing raw lines of the current (or last) process instance only.
    pub fn session_tail(&self, count: usize) -> Vec<String> {
        let start = *lock(&self.session_start, "session");
        lock(&self.output, "output").tail_since(start, count)
    }

    pub fn push_system(&self, message: String) -> LogLine {
        tracing::info!("{}", message);
        lock(&self.output, "output").push(LogSource::System, message)
    }

    /// Stop the server on daemon shutdown.
    pub async fn shutdown(&self) {
        if self.is_running() {
            tracing::info!("Stopping server before exit");
            let phase = self.stop_gracefully().await;
            tracing::info!("Server stopped ({:?})", phase);
        }
    }
}

/// Ladder target bound to one process instance.
struct StopHandle<'a> {
    process: &'a ManagedProcess,
    stop_command: &'a str,
}

impl StopTarget for StopHandle<'_> {
    fn is_running(&self) -> bool {
        self.process.is_running()
    }

    fn request_stop(&self) -> bool {
        self.process.send_command(self.stop_command)
    }

    fn terminate(&self) {
        self.process.terminate();
    }

    fn kill(&self) {
        self.process.kill();
    }
}
