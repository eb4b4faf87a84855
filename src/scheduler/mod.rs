//! Weekly maintenance backup.
//!
//! The scheduler polls the wall clock and fires once per weekly window. A
//! window missed because a task was in flight is not caught up later.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, LocalResult, NaiveDateTime, TimeZone, Weekday,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::GlobalConfig;
use crate::coordinator::Task;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::Supervisor;

/// Longest DST gap searched past when resolving a window start
const DST_GAP_LIMIT_MINUTES: i64 = 180;

/// One eligible window per week: `weekday` at `hour:minute`, lasting `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupWindow {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub length: ChronoDuration,
}

impl BackupWindow {
    pub fn from_config(config: &GlobalConfig) -> Result<Self, SupervisorError> {
        Ok(Self {
            weekday: config.schedule_weekday()?,
            hour: config.schedule.hour,
            minute: config.schedule.minute,
            length: ChronoDuration::minutes(i64::from(config.schedule.window_minutes)),
        })
    }

    /// Start of the window containing `now`, if any.
    pub fn window_start(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        // a window may start late on the previous day and run past midnight
        for days_back in 0..=1 {
            let date = now.date_naive() - ChronoDuration::days(days_back);
            if date.weekday() != self.weekday {
                continue;
            }
            let naive = date.and_hms_opt(self.hour, self.minute, 0)?;
            let start = resolve_local(naive, |t| Local.from_local_datetime(t))?;
            if start <= now && now < start + self.length {
                return Some(start);
            }
        }
        None
    }
}

/// Map a wall-clock time to an instant. An ambiguous time (DST fall-back)
/// takes the first occurrence; a time skipped by a spring-forward gap moves
/// to the first valid minute after the gap.
fn resolve_local<T, F>(naive: NaiveDateTime, resolve: F) -> Option<T>
where
    F: Fn(&NaiveDateTime) -> LocalResult<T>,
{
    (0..=DST_GAP_LIMIT_MINUTES).find_map(|m| resolve(&(naive + ChronoDuration::minutes(m))).earliest())
}

#[derive(Debug)]
pub struct Scheduler {
    window: BackupWindow,
    /// When the scheduled backup last fired
    mark: Option<DateTime<Local>>,
}

impl Scheduler {
    pub fn new(window: BackupWindow) -> Self {
        Self { window, mark: None }
    }

    /// Whether `now` is inside a window that has not fired yet.
    pub fn due(&self, now: DateTime<Local>) -> bool {
        match self.window.window_start(now) {
            Some(start) => !self.mark.is_some_and(|mark| mark >= start),
            None => false,
        }
    }

    /// Run `fire` if due. The mark only moves when `fire` reports success,
    /// so a busy poll can retry later in the same window.
    pub fn tick<F>(&mut self, now: DateTime<Local>, fire: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if !self.due(now) || !fire() {
            return false;
        }
        self.mark = Some(now);
        true
    }

    pub fn last_fired(&self) -> Option<DateTime<Local>> {
        self.mark
    }
}

/// Poll until cancelled, triggering the weekly backup.
pub async fn run(sup: Arc<Supervisor>, token: CancellationToken) -> Result<(), SupervisorError> {
    let window = BackupWindow::from_config(&sup.config)?;
    let interval = Duration::from_secs(sup.config.schedule.poll_secs.max(1));
    let mut scheduler = Scheduler::new(window);
    tracing::info!(
        "Weekly backup scheduled for {:?} {:02}:{:02}",
        window.weekday,
        window.hour,
        window.minute
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let fired = scheduler.tick(Local::now(), || {
            if sup.tasks.is_held() {
                return false;
            }
            match sup.trigger_task(Task::Backup) {
                Ok(_) => true,
                Err(e) => {
                    tracing::info!("Scheduled backup deferred: {}", e);
                    false
                }
            }
        });
        if fired {
            tracing::info!("Scheduled backup started");
        }
    }
    Ok(())
}
