//! Graceful-stop ladder: stop command → grace wait → terminate → kill, with a
//! bounded wait at every step.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::StopConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    Running,
    StopRequested,
    GraceWait,
    Terminated,
    ForceKilled,
    Exited,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(StopPhase, StopPhase),
}

pub struct StopLadder {
    pub phase: StopPhase,
}

impl Default for StopLadder {
    fn default() -> Self {
        Self { phase: StopPhase::Running }
    }
}

impl StopLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &StopPhase) -> bool {
        use StopPhase::*;
        matches!(
            (&self.phase, to),
            (Running, StopRequested)
                | (Running, Exited)
                | (StopRequested, GraceWait)
                | (StopRequested, Terminated)
                | (GraceWait, Exited)
                | (GraceWait, Terminated)
                | (Terminated, Exited)
                | (Terminated, ForceKilled)
                | (ForceKilled, Exited)
        )
    }

    pub fn transition(&mut self, to: StopPhase) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("Stop ladder: {:?} -> {:?}", self.phase, to);
            self.phase = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.phase, to))
        }
    }
}

/// The process side of the ladder.
pub trait StopTarget {
    fn is_running(&self) -> bool;
    /// Write the stop command; false if it could not be delivered.
    fn request_stop(&self) -> bool;
    fn terminate(&self);
    fn kill(&self);
}

/// Drive the ladder until the target exits or every step is exhausted.
///
/// Returns [`StopPhase::Exited`] once the target is gone, or
/// [`StopPhase::ForceKilled`] if it is still alive after the kill wait.
pub async fn run<T: StopTarget + ?Sized>(
    target: &T,
    cfg: &StopConfig,
) -> Result<StopPhase, TransitionError> {
    let mut ladder = StopLadder::new();
    if !target.is_running() {
        ladder.transition(StopPhase::Exited)?;
        return Ok(ladder.phase);
    }

    ladder.transition(StopPhase::StopRequested)?;
    if target.request_stop() {
        ladder.transition(StopPhase::GraceWait)?;
        if wait_for_exit(target, cfg.grace(), cfg.poll_interval()).await {
            ladder.transition(StopPhase::Exited)?;
            return Ok(ladder.phase);
        }
        tracing::warn!("Server did not stop within {:?}, terminating", cfg.grace());
    } else {
        tracing::warn!("Stop command could not be delivered, terminating");
    }

    ladder.transition(StopPhase::Terminated)?;
    target.terminate();
    if wait_for_exit(target, cfg.terminate_wait(), cfg.poll_interval()).await {
        ladder.transition(StopPhase::Exited)?;
        return Ok(ladder.phase);
    }

    tracing::warn!("Server survived terminate, killing");
    ladder.transition(StopPhase::ForceKilled)?;
    target.kill();
    if wait_for_exit(target, cfg.kill_wait(), cfg.poll_interval()).await {
        ladder.transition(StopPhase::Exited)?;
    } else {
        tracing::error!("Server is still alive after kill");
    }
    Ok(ladder.phase)
}

async fn wait_for_exit<T: StopTarget + ?Sized>(target: &T, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !target.is_running() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
