//! Single-step state transitions.

use std::fmt;
use std::sync::Arc;

use crate::message::Request;
use crate::types::Result;

/// Work performed by a transition. `Ok(Some(request))` means the step is only
/// complete once `request` succeeds.
pub type Action = Arc<dyn Fn() -> Result<Option<Request>> + Send + Sync>;

/// Immutable (initial, terminal) pair plus the action that performs the step.
#[derive(Clone)]
pub struct StateTransition<S> {
    initial: S,
    terminal: S,
    action: Action,
}

impl<S: Copy> StateTransition<S> {
    pub fn new<F>(initial: S, terminal: S, action: F) -> Self
    where
        F: Fn() -> Result<Option<Request>> + Send + Sync + 'static,
    {
        Self {
            initial,
            terminal,
            action: Arc::new(action),
        }
    }

    /// A transition with nothing to do.
    pub fn noop(initial: S, terminal: S) -> Self {
        Self::new(initial, terminal, || Ok(None))
    }

    pub fn initial(&self) -> S {
        self.initial
    }

    pub fn terminal(&self) -> S {
        self.terminal
    }

    pub(crate) fn execute(&self) -> Result<Option<Request>> {
        (self.action)()
    }
}

impl<S: fmt::Debug> fmt::Debug for StateTransition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateTransition({:?} -> {:?})", self.initial, self.terminal)
    }
}
