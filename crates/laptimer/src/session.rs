//! Race session state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Whether detections are turned into laps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    /// Detections are drained and discarded.
    #[default]
    Stopped,
    /// Detections produce laps.
    Running,
}

impl fmt::Display for RaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// A two-state race session. Both transitions are idempotent.
#[derive(Debug, Clone, Default)]
pub struct RaceSession {
    state: RaceState,
    started_at: Option<DateTime<Utc>>,
}

impl RaceSession {
    /// Create a stopped session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the race. Returns `true` if the state changed.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.state = RaceState::Running;
        self.started_at = Some(Utc::now());
        info!("Race started");
        true
    }

    /// Stop the race. Returns `true` if the state changed.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = RaceState::Stopped;
        self.started_at = None;
        info!("Race stopped");
        true
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RaceState {
        self.state
    }

    /// Whether the race is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == RaceState::Running
    }

    /// When the current race started, if one is running.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_stopped() {
        let session = RaceSession::new();
        assert_eq!(session.state(), RaceState::Stopped);
        assert!(session.started_at().is_none());
    }

    #[test]
    fn test_start_and_stop() {
        let mut session = RaceSession::new();
        assert!(session.start());
        assert!(session.is_running());
        assert!(session.started_at().is_some());

        assert!(session.stop());
        assert_eq!(session.state(), RaceState::Stopped);
        assert!(session.started_at().is_none());
    }

    #[test]
    fn test_transitions_are_idempotent() {
        let mut session = RaceSession::new();
        assert!(!session.stop());

        assert!(session.start());
        let started = session.started_at();
        assert!(!session.start());
        assert_eq!(session.started_at(), started);

        assert!(session.stop());
        assert!(!session.stop());
    }

    #[test]
    fn test_race_state_display() {
        assert_eq!(RaceState::Stopped.to_string(), "stopped");
        assert_eq!(RaceState::Running.to_string(), "running");
    }
}
