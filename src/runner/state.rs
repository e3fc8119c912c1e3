// ============================================================================
// Run Lifecycle
// ============================================================================
//
// State pattern for one run of a command sequence:
//
//   Idle ──start──> Started ──commit──> Committed ──release──> Ended
//    │                 │
//    │                 └──abort──> Aborted ──release──> Ended
//    └──start failed──────────────────────────────────────> Ended
//
// A run enters Started at most once, ends in exactly one of Committed or
// Aborted, and always finishes in Ended.
//
// ============================================================================

use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    Started,
    Committed,
    Aborted,
    Ended,
}

impl RunState {
    /// Whether the run holds an open transaction.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Started)
    }

    /// Check if the transaction outcome is decided
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Committed | RunState::Aborted | RunState::Ended
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Started)
                | (RunState::Idle, RunState::Ended)
                | (RunState::Started, RunState::Committed)
                | (RunState::Started, RunState::Aborted)
                | (RunState::Committed, RunState::Ended)
                | (RunState::Aborted, RunState::Ended)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "IDLE"),
            RunState::Started => write!(f, "STARTED"),
            RunState::Committed => write!(f, "COMMITTED"),
            RunState::Aborted => write!(f, "ABORTED"),
            RunState::Ended => write!(f, "ENDED"),
        }
    }
}

/// Tracks the state of one run and every state it passed through.
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    state: RunState,
    history: Vec<RunState>,
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RunState> {
        self.history
    }

    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DbError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(RunState::Started)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.transition(RunState::Committed)
    }

    pub fn abort(&mut self) -> Result<()> {
        self.transition(RunState::Aborted)
    }

    pub fn end(&mut self) -> Result<()> {
        self.transition(RunState::Ended)
    }
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_path() {
        let mut lifecycle = RunLifecycle::new();
        lifecycle.start().unwrap();
        assert!(lifecycle.state().is_active());
        lifecycle.commit().unwrap();
        lifecycle.end().unwrap();
        assert_eq!(
            lifecycle.history(),
            &[RunState::Idle, RunState::Started, RunState::Committed, RunState::Ended]
        );
    }

    #[test]
    fn test_failed_start_goes_straight_to_ended() {
        let mut lifecycle = RunLifecycle::new();
        lifecycle.end().unwrap();
        assert_eq!(lifecycle.state(), RunState::Ended);
        assert!(lifecycle.start().is_err());
    }

    #[test]
    fn test_commit_and_abort_are_exclusive() {
        let mut lifecycle = RunLifecycle::new();
        lifecycle.start().unwrap();
        lifecycle.abort().unwrap();
        let err = lifecycle.commit().unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Invalid run state transition: ABORTED -> COMMITTED");
    }

    #[test]
    fn test_cannot_skip_started_or_restart() {
        let mut lifecycle = RunLifecycle::new();
        assert!(lifecycle.commit().is_err());
        lifecycle.start().unwrap();
        assert!(lifecycle.start().is_err());
        assert!(lifecycle.end().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Started.is_terminal());
        assert!(RunState::Committed.is_terminal());
        assert!(RunState::Ended.is_terminal());
    }
}
