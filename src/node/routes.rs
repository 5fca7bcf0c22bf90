//! Per-node route tables keyed by message type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::actor::Node;
use crate::message::{Envelope, MessageType};
use crate::types::Result;

/// Handles one envelope on behalf of a node.
pub type Handler = Arc<dyn Fn(&Node, &Envelope) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RouteTable {
    handlers: HashMap<MessageType, Handler>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `message_type`, replacing any previous one.
    pub fn insert(&mut self, message_type: MessageType, handler: Handler) -> Option<Handler> {
        self.handlers.insert(message_type, handler)
    }

    pub fn get(&self, message_type: &MessageType) -> Option<Handler> {
        self.handlers.get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(MessageType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("RouteTable").field("types", &types).finish()
    }
}
