//! Messages, letters and envelopes.
//!
//! A [`Message`] is information with a sender and a set of unique recipients.
//! A [`Letter`] is what the message says; an [`Envelope`] binds the two
//! together with the recipient handles the queue delivers to. When a letter
//! carries a request, the message shares that request's information core so
//! queueing and delivery move the request's own state.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::information::Information;
use super::request::Request;
use super::session::Session;
use super::state::InformationState;
use super::voucher::Voucher;
use crate::address::BusPath;
use crate::node::invitation::Invitation;
use crate::types::{InformationId, NodeId, Result};

/// Route key of a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(String);

impl MessageType {
    pub const INVITATION: &'static str = "bus.invitation";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn invitation() -> Self {
        Self::new(Self::INVITATION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Anything the queue can deliver to.
pub trait Recipient: Send + Sync + fmt::Debug {
    fn recipient_id(&self) -> NodeId;

    /// Handle one envelope. Errors fail the carried request, if any.
    fn receive(&self, envelope: &Envelope) -> Result<()>;
}

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone)]
pub struct Message {
    info: Information,
    sender: BusPath,
    recipients: Vec<NodeId>,
}

impl Message {
    pub fn new<I>(sender: BusPath, recipients: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let info = Information::new(Some(sender.clone()));
        Self::carrying(info, sender, recipients)
    }

    /// Message sharing an existing information core.
    pub fn carrying<I>(info: Information, sender: BusPath, recipients: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut unique: Vec<NodeId> = Vec::new();
        for id in recipients {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self {
            info,
            sender,
            recipients: unique,
        }
    }

    pub fn id(&self) -> &InformationId {
        self.info.id()
    }

    pub fn information(&self) -> &Information {
        &self.info
    }

    pub fn state(&self) -> InformationState {
        self.info.state()
    }

    pub fn sender(&self) -> &BusPath {
        &self.sender
    }

    pub fn recipients(&self) -> &[NodeId] {
        &self.recipients
    }

    /// NEW → ENQUEUED; arms one pending delivery per recipient.
    pub fn enqueue(&self) -> Result<()> {
        self.info.enqueue(&self.recipients)
    }

    /// ENQUEUED → DISPATCHED.
    pub fn dispatch(&self) -> Result<()> {
        self.info.advance(InformationState::Dispatched)
    }

    /// Acknowledge delivery to one recipient; returns deliveries outstanding.
    pub fn deliver(&self, recipient: &NodeId) -> Result<usize> {
        self.info.deliver(recipient)
    }

    pub fn remaining_deliveries(&self) -> usize {
        self.info.remaining_deliveries()
    }
}

// =============================================================================
// Letters
// =============================================================================

/// A named, session-bound request for work; the voucher carries the reply.
#[derive(Debug, Clone)]
pub struct Command {
    pub session: Session,
    pub name: String,
    pub args: Value,
    pub voucher: Voucher<Value>,
}

impl Command {
    pub fn new(session: Session, name: impl Into<String>, args: Value) -> Self {
        Self {
            session,
            name: name.into(),
            args,
            voucher: Voucher::new(),
        }
    }
}

/// A named, session-bound notification without completion.
#[derive(Debug, Clone)]
pub struct Event {
    pub session: Session,
    pub name: String,
    pub data: Value,
}

impl Event {
    pub fn new(session: Session, name: impl Into<String>, data: Value) -> Self {
        Self {
            session,
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Letter {
    Invitation(Invitation),
    Command(Command),
    Event(Event),
}

impl Letter {
    pub fn message_type(&self) -> MessageType {
        match self {
            Letter::Invitation(_) => MessageType::invitation(),
            Letter::Command(command) => MessageType::new(command.name.clone()),
            Letter::Event(event) => MessageType::new(event.name.clone()),
        }
    }

    pub fn session(&self) -> &Session {
        match self {
            Letter::Invitation(invitation) => &invitation.session,
            Letter::Command(command) => &command.session,
            Letter::Event(event) => &event.session,
        }
    }

    /// The request whose completion this letter tracks.
    pub fn carried_request(&self) -> Option<&Request> {
        match self {
            Letter::Invitation(invitation) => Some(invitation.voucher.request()),
            Letter::Command(command) => Some(command.voucher.request()),
            Letter::Event(_) => None,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone)]
pub struct Envelope {
    message: Message,
    letter: Letter,
    recipients: Vec<Arc<dyn Recipient>>,
}

impl Envelope {
    pub fn new(sender: BusPath, recipients: Vec<Arc<dyn Recipient>>, letter: Letter) -> Self {
        let mut unique: Vec<Arc<dyn Recipient>> = Vec::new();
        for recipient in recipients {
            let id = recipient.recipient_id();
            if !unique.iter().any(|r| r.recipient_id() == id) {
                unique.push(recipient);
            }
        }
        let info = letter
            .carried_request()
            .map(|request| request.information().clone())
            .unwrap_or_else(|| Information::new(Some(sender.clone())));
        let message = Message::carrying(
            info,
            sender,
            unique.iter().map(|r| r.recipient_id()),
        );
        Self {
            message,
            letter,
            recipients: unique,
        }
    }

    pub fn to(sender: BusPath, recipient: Arc<dyn Recipient>, letter: Letter) -> Self {
        Self::new(sender, vec![recipient], letter)
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn letter(&self) -> &Letter {
        &self.letter
    }

    pub fn recipients(&self) -> &[Arc<dyn Recipient>] {
        &self.recipients
    }

    pub fn message_type(&self) -> MessageType {
        self.letter.message_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_recipients_collapse() {
        let a = NodeId::new();
        let b = NodeId::new();
        let message = Message::new(
            BusPath::root(),
            vec![a.clone(), b.clone(), a.clone()],
        );
        assert_eq!(message.recipients(), &[a, b]);
    }

    #[test]
    fn test_n_recipients_need_n_deliveries() {
        let ids: Vec<NodeId> = (0..4).map(|_| NodeId::new()).collect();
        let message = Message::new(BusPath::root(), ids.clone());
        message.enqueue().unwrap();

        for id in &ids[..3] {
            message.deliver(id).unwrap();
        }
        assert_eq!(message.state(), InformationState::Enqueued);
        assert_eq!(message.remaining_deliveries(), 1);

        message.deliver(&ids[3]).unwrap();
        assert_eq!(message.state(), InformationState::Delivered);
    }

    #[test]
    fn test_deliver_requires_enqueue() {
        let id = NodeId::new();
        let message = Message::new(BusPath::root(), vec![id.clone()]);
        assert!(message.deliver(&id).is_err());
    }

    #[test]
    fn test_command_message_shares_request_state() {
        let command = Command::new(Session::new(), "echo", Value::Null);
        let message = Message::carrying(
            command.voucher.request().information().clone(),
            BusPath::root(),
            vec![NodeId::new()],
        );
        message.enqueue().unwrap();
        assert_eq!(command.voucher.state(), InformationState::Enqueued);
    }
}
