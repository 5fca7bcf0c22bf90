//! The attach protocol: invitations, contexts and member handles.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::actor::{Node, WeakNode};
use super::hub::BusHub;
use crate::address::BusPath;
use crate::message::{Request, Session, Voucher};
use crate::types::NodeId;

/// Where a node is attached.
#[derive(Clone, Default)]
pub enum BusContext {
    /// Not attached; the node carries an auto-generated name.
    #[default]
    Offline,
    /// Attached as the application's root hub.
    Root,
    /// Attached as a member of a hub.
    Hub(WeakNode),
}

impl BusContext {
    pub fn hub_of(hub: &BusHub) -> Self {
        BusContext::Hub(hub.node().downgrade())
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, BusContext::Offline)
    }

    /// The containing hub, if it is still alive.
    pub fn hub(&self) -> Option<BusHub> {
        match self {
            BusContext::Hub(weak) => weak.upgrade().and_then(BusHub::from_node),
            _ => None,
        }
    }
}

impl fmt::Debug for BusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusContext::Offline => f.write_str("Offline"),
            BusContext::Root => f.write_str("Root"),
            BusContext::Hub(weak) => write!(f, "Hub({:?})", weak),
        }
    }
}

/// Offer of membership under `name` in `context`. The voucher resolves with
/// the [`Member`] handle once the recipient reaches its ready state.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub session: Session,
    pub context: BusContext,
    pub name: String,
    pub sender: BusPath,
    pub recipient: NodeId,
    pub voucher: Voucher<Member>,
    /// Filled when the recipient attaches; taken when setup completes.
    pub(crate) member: Arc<Mutex<Option<Member>>>,
}

impl Invitation {
    pub fn new(
        session: Session,
        context: BusContext,
        name: impl Into<String>,
        sender: BusPath,
        recipient: NodeId,
    ) -> Self {
        Self {
            session,
            context,
            name: name.into(),
            sender,
            recipient,
            voucher: Voucher::new(),
            member: Arc::new(Mutex::new(None)),
        }
    }
}

/// Handle on an attached node, as seen by whoever invited it.
#[derive(Debug, Clone)]
pub struct Member {
    name: String,
    node: Node,
}

impl Member {
    pub(crate) fn new(name: impl Into<String>, node: Node) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn path(&self) -> BusPath {
        self.node.path()
    }

    /// Drive the member's node through its shutdown trajectory.
    pub fn dismiss(&self) -> Request {
        tracing::debug!(member = %self.name, "dismissing");
        self.node.shutdown()
    }
}
