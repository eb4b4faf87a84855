//! Background loops tied to the process lifecycle: exit detection with crash
//! recovery, and the periodic roster poll.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Supervisor;
use crate::coordinator::{Task, TaskReport};
use crate::crash;

/// Edge detector over observed liveness.
///
/// `observe` reports the running → stopped transition exactly once per exit.
#[derive(Debug, Default)]
pub struct ExitDetector {
    was_running: bool,
}

impl ExitDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, running: bool) -> bool {
        let exited = self.was_running && !running;
        self.was_running = running;
        exited
    }
}

/// What the monitor did about one exit
#[derive(Debug)]
pub enum ExitAction {
    /// Clean stop; the server stays down.
    Stopped,
    /// A task holds the lock and owns the process lifecycle.
    Busy,
    /// Crash detected; recovery backup running.
    Backup(JoinHandle<TaskReport>),
}

/// React to a freshly observed exit.
///
/// Exits requested by an operator stop or kill are never classified. Before
/// classifying, waits (bounded by `monitor.drain_millis`) for the reader
/// loop to consume the last output of the exited process.
pub async fn on_exit(sup: &Arc<Supervisor>) -> ExitAction {
    let exited = sup.discard_exited();
    if let Some(process) = &exited {
        tracing::info!("Server PID {} exited", process.pid);
        if sup.take_operator_stop(process.pid) {
            tracing::info!("Server stopped by operator, not restarting");
            return ExitAction::Stopped;
        }
    }

    if let Some(task) = sup.tasks.current() {
        tracing::debug!("Exit during task '{}', leaving it to the task", task.name);
        return ExitAction::Busy;
    }

    if let Some(process) = &exited {
        if !process.wait_drained(sup.config.monitor.drain_timeout()).await {
            tracing::warn!("Output of PID {} not drained in time, classifying what was read", process.pid);
        }
    }

    let window = sup.config.monitor.crash_window;
    let tail = sup.session_tail(window);
    if !crash::classify_window(&tail, window) {
        tracing::info!("Server stopped normally, not restarting");
        return ExitAction::Stopped;
    }

    let marker = tail.iter().rev().find_map(|l| crash::matched_marker(l));
    tracing::warn!("Crash detected (marker {:?}), running recovery backup", marker);
    match sup.trigger_task(Task::Backup) {
        Ok(handle) => ExitAction::Backup(handle),
        // lost the race against another trigger
        Err(e) => {
            tracing::warn!("Recovery backup not started: {}", e);
            ExitAction::Busy
        }
    }
}

/// Poll liveness until cancelled.
pub async fn run_exit_monitor(sup: Arc<Supervisor>, token: CancellationToken) {
    let interval = Duration::from_secs(sup.config.monitor.interval_secs.max(1));
    let mut detector = ExitDetector::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if detector.observe(sup.is_running()) {
            on_exit(&sup).await;
        }
    }
    tracing::debug!("Exit monitor stopped");
}

/// Ask the server for its player list; the reader loop reconciles the reply.
pub async fn run_roster_poll(sup: Arc<Supervisor>, token: CancellationToken) {
    let interval = Duration::from_secs(sup.config.roster.poll_secs.max(1));

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if sup.is_running() && !sup.send_command(&sup.config.server.list_command) {
            tracing::debug!("Roster poll not delivered");
        }
    }
    tracing::debug!("Roster poll stopped");
}
