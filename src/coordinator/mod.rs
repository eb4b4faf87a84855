//! Task coordinator: single-flight lock shared by every maintenance task.
//!
//! At most one [`TaskState`] exists at any instant. Task bodies hold a
//! [`TaskGuard`], which releases the lock when dropped, including when the
//! body panics.

pub mod archive;
pub mod tasks;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::supervisor::error::SupervisorError;
use crate::utils::lock;

/// The task currently in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TaskLock {
    state: Mutex<Option<TaskState>>,
}

impl TaskLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `name`. False (state untouched) if a task is held.
    pub fn acquire(&self, name: &str) -> bool {
        self.try_acquire(name).is_some()
    }

    fn try_acquire(&self, name: &str) -> Option<TaskState> {
        let mut state = lock(&self.state, "task");
        if state.is_some() {
            return None;
        }
        let task = TaskState {
            id: Uuid::new_v4(),
            name: name.to_string(),
            started_at: Utc::now(),
        };
        *state = Some(task.clone());
        Some(task)
    }

    /// Clear the lock unconditionally.
    pub fn release(&self) {
        *lock(&self.state, "task") = None;
    }

    /// Clear the lock only if it is still held by `id`.
    fn release_owned(&self, id: Uuid) {
        let mut state = lock(&self.state, "task");
        if state.as_ref().map(|t| t.id) == Some(id) {
            *state = None;
        }
    }

    pub fn current(&self) -> Option<TaskState> {
        lock(&self.state, "task").clone()
    }

    pub fn is_held(&self) -> bool {
        lock(&self.state, "task").is_some()
    }

    /// Acquire `name` and return a guard that releases on drop.
    pub fn guard(self: &Arc<Self>, name: &str) -> Result<TaskGuard, SupervisorError> {
        match self.try_acquire(name) {
            Some(state) => Ok(TaskGuard {
                lock: Arc::clone(self),
                state,
            }),
            None => {
                let current = self
                    .current()
                    .map(|t| t.name)
                    .unwrap_or_else(|| "unknown".to_string());
                Err(SupervisorError::TaskAlreadyRunning(current))
            }
        }
    }
}

/// Holds the single-flight lock for one task.
pub struct TaskGuard {
    lock: Arc<TaskLock>,
    state: TaskState,
}

impl TaskGuard {
    pub fn state(&self) -> &TaskState {
        &self.state
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.lock.release_owned(self.state.id);
        tracing::debug!("Released task lock '{}' ({})", self.state.name, self.state.id);
    }
}

/// Named maintenance operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Backup,
    /// Restore the world from an already-uploaded archive; the archive is
    /// deleted when the task ends.
    Restore { archive: PathBuf },
    Restart,
    Stop,
    Kill,
    AutoUpdate,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Backup => "backup",
            Task::Restore { .. } => "restore",
            Task::Restart => "restart",
            Task::Stop => "stop",
            Task::Kill => "kill",
            Task::AutoUpdate => "auto-update",
        }
    }

    pub fn from_name(name: &str, archive: Option<PathBuf>) -> Result<Self, SupervisorError> {
        match name {
            "backup" => Ok(Task::Backup),
            "restore" => archive
                .map(|archive| Task::Restore { archive })
                .ok_or_else(|| SupervisorError::InvalidConfig("restore requires an archive".into())),
            "restart" => Ok(Task::Restart),
            "stop" => Ok(Task::Stop),
            "kill" => Ok(Task::Kill),
            "update" | "auto-update" => Ok(Task::AutoUpdate),
            other => Err(SupervisorError::UnknownTask(other.to_string())),
        }
    }

    /// Whether the body is bracketed by stop ... restart.
    pub fn restarts_server(&self) -> bool {
        !matches!(self, Task::Stop | Task::Kill)
    }
}

/// Outcome of one finished task
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
}

impl TaskReport {
    pub fn new(state: &TaskState, result: &Result<String, SupervisorError>) -> Self {
        let (success, message) = match result {
            Ok(msg) => (true, msg.clone()),
            Err(e) => (false, e.to_string()),
        };
        Self {
            id: state.id,
            name: state.name.clone(),
            started_at: state.started_at,
            finished_at: Utc::now(),
            success,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_rejection() {
        let lock = TaskLock::new();
        assert!(lock.acquire("backup"));
        let held = lock.current().unwrap();

        assert!(!lock.acquire("restart"));
        // the held task is untouched
        assert_eq!(lock.current().unwrap(), held);

        lock.release();
        assert!(lock.acquire("restart"));
        assert_eq!(lock.current().unwrap().name, "restart");
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = Arc::new(TaskLock::new());
        {
            let guard = lock.guard("backup").unwrap();
            assert_eq!(guard.state().name, "backup");
            assert!(matches!(
                lock.guard("restore"),
                Err(SupervisorError::TaskAlreadyRunning(name)) if name == "backup"
            ));
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let lock = Arc::new(TaskLock::new());
        let cloned = lock.clone();
        let result = std::thread::spawn(move || {
            let _guard = cloned.guard("restore").unwrap();
            panic!("task body blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(!lock.is_held());
        assert!(lock.acquire("backup"));
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_task() {
        let lock = Arc::new(TaskLock::new());
        let stale = lock.guard("backup").unwrap();
        lock.release();
        assert!(lock.acquire("restart"));
        drop(stale);
        assert_eq!(lock.current().unwrap().name, "restart");
    }

    #[test]
    fn test_task_names() {
        assert_eq!(Task::from_name("backup", None).unwrap(), Task::Backup);
        assert_eq!(Task::from_name("update", None).unwrap(), Task::AutoUpdate);
        assert_eq!(
            Task::from_name("restore", Some(PathBuf::from("up.zip"))).unwrap(),
            Task::Restore { archive: PathBuf::from("up.zip") }
        );
        assert!(matches!(
            Task::from_name("restore", None),
            Err(SupervisorError::InvalidConfig(_))
        ));
        assert!(matches!(
            Task::from_name("format-disk", None),
            Err(SupervisorError::UnknownTask(_))
        ));
        assert!(!Task::Stop.restarts_server());
        assert!(Task::AutoUpdate.restarts_server());
    }
}
