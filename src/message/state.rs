//! Completion states shared by every piece of information on the bus.
//!
//! ```text
//! NEW → ENQUEUED → DISPATCHED → DELIVERED → {SUCCESSFUL | FAILED | CANCELLED}
//! ```
//! States only move forward. Skipping ahead is allowed (a local request that
//! never touches the queue goes straight from NEW to a terminal state).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InformationState {
    New,
    Enqueued,
    Dispatched,
    Delivered,
    Successful,
    Failed,
    Cancelled,
}

impl InformationState {
    fn rank(self) -> u8 {
        match self {
            InformationState::New => 0,
            InformationState::Enqueued => 1,
            InformationState::Dispatched => 2,
            InformationState::Delivered => 3,
            InformationState::Successful
            | InformationState::Failed
            | InformationState::Cancelled => 4,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    /// Check if transition is valid (strictly forward).
    pub fn can_transition_to(self, to: InformationState) -> bool {
        to.rank() > self.rank()
    }

    pub(crate) fn check_transition(self, to: InformationState) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::state_violation(format!(
                "illegal information state change {} -> {}",
                self, to
            )))
        }
    }
}

impl fmt::Display for InformationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InformationState::New => "NEW",
            InformationState::Enqueued => "ENQUEUED",
            InformationState::Dispatched => "DISPATCHED",
            InformationState::Delivered => "DELIVERED",
            InformationState::Successful => "SUCCESSFUL",
            InformationState::Failed => "FAILED",
            InformationState::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// How a request ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    Successful,
    Failed(Error),
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> InformationState {
        match self {
            Outcome::Successful => InformationState::Successful,
            Outcome::Failed(_) => InformationState::Failed,
            Outcome::Cancelled => InformationState::Cancelled,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Outcome::Successful)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Collapse into a `Result`; cancellation becomes `Error::Cancelled`.
    pub fn into_result(self) -> Result<()> {
        match self {
            Outcome::Successful => Ok(()),
            Outcome::Failed(cause) => Err(cause),
            Outcome::Cancelled => Err(Error::cancelled("request cancelled")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        use InformationState::*;
        assert!(New.can_transition_to(Enqueued));
        assert!(Enqueued.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Delivered));
        assert!(New.can_transition_to(Successful));
        assert!(Delivered.can_transition_to(Cancelled));

        assert!(!Dispatched.can_transition_to(Enqueued));
        assert!(!Enqueued.can_transition_to(Enqueued));
        assert!(!Successful.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(New));
    }

    #[test]
    fn test_check_transition_reports_violation() {
        let err = InformationState::Delivered
            .check_transition(InformationState::Enqueued)
            .unwrap_err();
        assert!(matches!(err, Error::StateViolation(_)));
        assert!(err.to_string().contains("DELIVERED -> ENQUEUED"));
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(Outcome::Successful.into_result().is_ok());
        assert!(matches!(
            Outcome::Cancelled.into_result(),
            Err(Error::Cancelled(_))
        ));
        assert!(matches!(
            Outcome::Failed(Error::failed("boom")).into_result(),
            Err(Error::Failed(_))
        ));
    }
}
