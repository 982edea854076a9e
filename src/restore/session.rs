//! Restore step state machine
//!
//! ```text
//! Requested -> WaitingForMedium -> Available -> Extracted
//!     |               |                |
//!     +---------------+----------------+-----> Skipped
//!     (any non-terminal state)  -------------> Aborted
//! ```
//!
//! A volume that is already attached goes straight from `Requested` to
//! `Available`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Requested,
    WaitingForMedium,
    Available,
    Extracted,
    Skipped,
    Aborted,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Requested => "requested",
            StepState::WaitingForMedium => "waiting_for_medium",
            StepState::Available => "available",
            StepState::Extracted => "extracted",
            StepState::Skipped => "skipped",
            StepState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Extracted | StepState::Skipped | StepState::Aborted)
    }

    fn allows(&self, next: StepState) -> bool {
        use StepState::*;
        match (self, next) {
            (_, Aborted) => !self.is_terminal(),
            (Requested, WaitingForMedium | Available | Skipped) => true,
            (WaitingForMedium, Available | Skipped) => true,
            (Available, Extracted | Skipped) => true,
            _ => false,
        }
    }
}

/// One volume's progress through a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreStep {
    pub label: String,
    pub state: StepState,
    /// Paths this volume was asked to supply
    pub paths: usize,
    /// Paths it actually supplied
    pub restored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RestoreStep {
    pub fn new(label: &str, paths: usize) -> Self {
        Self {
            label: label.to_string(),
            state: StepState::Requested,
            paths,
            restored: 0,
            reason: None,
        }
    }

    /// Move to `next`; returns false and stays put if the machine has no
    /// such transition
    pub fn advance(&mut self, next: StepState) -> bool {
        if !self.state.allows(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> bool {
        let moved = self.advance(StepState::Skipped);
        if moved {
            self.reason = Some(reason.into());
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut step = RestoreStep::new("KQ7MZA", 3);
        assert!(step.advance(StepState::WaitingForMedium));
        assert!(step.advance(StepState::Available));
        assert!(step.advance(StepState::Extracted));
        assert!(step.state.is_terminal());
    }

    #[test]
    fn test_attached_volume_skips_waiting() {
        let mut step = RestoreStep::new("KQ7MZA", 1);
        assert!(step.advance(StepState::Available));
        assert_eq!(step.state, StepState::Available);
    }

    #[test]
    fn test_abort_from_any_open_state() {
        for path in [
            vec![],
            vec![StepState::WaitingForMedium],
            vec![StepState::Available],
        ] {
            let mut step = RestoreStep::new("KQ7MZA", 1);
            for state in path {
                assert!(step.advance(state));
            }
            assert!(step.advance(StepState::Aborted));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut step = RestoreStep::new("KQ7MZA", 1);
        assert!(step.skip("timed out"));
        assert!(!step.advance(StepState::Aborted));
        assert!(!step.advance(StepState::Available));
        assert_eq!(step.reason.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_extraction_requires_availability() {
        let mut step = RestoreStep::new("KQ7MZA", 1);
        assert!(step.advance(StepState::WaitingForMedium));
        assert!(!step.advance(StepState::Extracted));
    }
}
