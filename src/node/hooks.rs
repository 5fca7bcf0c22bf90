//! Named lifecycle hook slots.
//!
//! A hook is keyed by the state a step enters: the hook for `ATTACHING` is the
//! pre-attach check, the hook for `ATTACHED` the post-attach action. Hooks run
//! after the node kind's built-in behavior for the same step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::actor::Node;
use super::state::NodeState;
use crate::message::Request;
use crate::types::Result;

/// Hook body. Returning a request makes the step wait for it.
pub type Hook = Arc<dyn Fn(&Node) -> Result<Option<Request>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct NodeHooks {
    slots: HashMap<NodeState, Hook>,
}

impl NodeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hook run when a step enters `state`.
    pub fn on<F>(mut self, state: NodeState, hook: F) -> Self
    where
        F: Fn(&Node) -> Result<Option<Request>> + Send + Sync + 'static,
    {
        self.slots.insert(state, Arc::new(hook));
        self
    }

    pub fn get(&self, state: NodeState) -> Option<Hook> {
        self.slots.get(&state).cloned()
    }
}

impl fmt::Debug for NodeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut states: Vec<String> = self.slots.keys().map(|s| s.to_string()).collect();
        states.sort_unstable();
        f.debug_struct("NodeHooks").field("slots", &states).finish()
    }
}
