//! Hubs: nodes that contain named members.
//!
//! Locking: `joins` guards the candidate list and join mode together, so the
//! switch from queued to immediate joins at LOADED is atomic with draining the
//! queue. `members` guards the name → node map; a name is claimed under that
//! lock before the invitation is sent, so of two concurrent joins under the
//! same name exactly one wins.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::actor::{Extension, Node, NodeBuilder};
use super::invitation::{BusContext, Invitation, Member};
use super::service::BusService;
use super::state::NodeState;
use super::trajectory::NodeKind;
use crate::address::BusPath;
use crate::message::{MultiRequest, Outcome, Request, Session, Voucher};
use crate::types::{Error, NodeId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinMode {
    /// Before LOADED: joins wait in the candidate list.
    Queue,
    /// LOADED: joins are admitted as they arrive.
    Immediate,
    /// UNLOADING and after: joins are refused.
    Closed,
}

struct Candidate {
    node: Node,
    invitation: Invitation,
}

struct Joins {
    mode: JoinMode,
    candidates: Vec<Candidate>,
}

pub(crate) struct HubCore {
    joins: Mutex<Joins>,
    members: Mutex<IndexMap<String, Node>>,
    services: Mutex<IndexMap<String, Arc<dyn BusService>>>,
}

impl HubCore {
    fn new() -> Self {
        Self {
            joins: Mutex::new(Joins {
                mode: JoinMode::Queue,
                candidates: Vec::new(),
            }),
            members: Mutex::new(IndexMap::new()),
            services: Mutex::new(IndexMap::new()),
        }
    }
}

/// A node containing named members.
#[derive(Clone)]
pub struct BusHub {
    node: Node,
}

impl NodeBuilder {
    pub fn build_hub(self) -> BusHub {
        BusHub {
            node: Node::construct(self, NodeKind::Hub, Extension::Hub(HubCore::new())),
        }
    }
}

impl BusHub {
    pub fn new(app: &super::AppContext) -> Self {
        NodeBuilder::new(app).build_hub()
    }

    /// View `node` as a hub, if it is one.
    pub fn from_node(node: Node) -> Option<Self> {
        let is_hub = matches!(node.inner().extension, Extension::Hub(_));
        is_hub.then_some(Self { node })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn core(&self) -> &HubCore {
        match &self.node.inner().extension {
            Extension::Hub(core) => core,
            _ => unreachable!("BusHub wraps a non-hub node"),
        }
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Invite `node` to join under `name`. Before the hub is LOADED the join
    /// is queued; afterwards it is admitted immediately. The voucher resolves
    /// with the member handle once the node reaches its ready state.
    pub fn join(&self, node: &Node, name: impl Into<String>) -> Voucher<Member> {
        let name = name.into();
        let invitation = Invitation::new(
            Session::new(),
            BusContext::hub_of(self),
            name.clone(),
            self.path(),
            node.id().clone(),
        );
        let voucher = invitation.voucher.clone();

        if let Err(err) = BusPath::root().child(name.as_str()) {
            voucher.request().try_complete(Outcome::Failed(err));
            return voucher;
        }

        let candidate = Candidate {
            node: node.clone(),
            invitation,
        };
        let admit_now = {
            let mut joins = self.core().joins.lock();
            match joins.mode {
                JoinMode::Queue => {
                    joins.candidates.push(candidate);
                    None
                }
                JoinMode::Immediate => Some(Ok(candidate)),
                JoinMode::Closed => Some(Err(candidate)),
            }
        };
        match admit_now {
            None => tracing::debug!(hub = %self.path(), %name, "join queued"),
            Some(Ok(candidate)) => {
                self.admit(candidate);
            }
            Some(Err(_)) => {
                voucher.request().try_complete(Outcome::Failed(Error::state_violation(
                    format!("{} is not accepting members", self.path()),
                )));
            }
        }
        voucher
    }

    /// Claim the name and send the invitation. Returns the join's request.
    fn admit(&self, candidate: Candidate) -> Request {
        let Candidate { node, invitation } = candidate;
        let name = invitation.name.clone();
        let request = invitation.voucher.request().clone();
        {
            let mut members = self.core().members.lock();
            if members.contains_key(&name) {
                drop(members);
                let err = Error::name_collision(format!(
                    "{} already has a member named {}",
                    self.path(),
                    name
                ));
                tracing::warn!("{}", err);
                request.try_complete(Outcome::Failed(err));
                return request;
            }
            members.insert(name.clone(), node.clone());
        }

        let hub = self.clone();
        let node_id = node.id().clone();
        request.on_completion(move |outcome| {
            if !outcome.is_successful() {
                hub.forget(&name, &node_id);
            }
        });
        node.post_invitation(invitation);
        request
    }

    /// Drop the entry for `name` if it still belongs to `node`.
    pub(crate) fn forget(&self, name: &str, node: &NodeId) {
        let mut members = self.core().members.lock();
        if members.get(name).map(|n| n.id() == node).unwrap_or(false) {
            members.shift_remove(name);
            tracing::debug!(hub = %self.path(), %name, "member removed");
        }
    }

    pub fn member(&self, name: &str) -> Option<Member> {
        self.core()
            .members
            .lock()
            .get(name)
            .map(|node| Member::new(name, node.clone()))
    }

    /// Members in the order they joined.
    pub fn members(&self) -> Vec<Member> {
        self.core()
            .members
            .lock()
            .iter()
            .map(|(name, node)| Member::new(name.as_str(), node.clone()))
            .collect()
    }

    pub fn member_count(&self) -> usize {
        self.core().members.lock().len()
    }

    pub fn pending_joins(&self) -> usize {
        self.core().joins.lock().candidates.len()
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Register `service` on this hub and let it attach its routes.
    pub fn provide(&self, service: Arc<dyn BusService>) -> Result<()> {
        let name = service.service_name().to_string();
        if self.core().services.lock().contains_key(&name) {
            return Err(Error::name_collision(format!(
                "{} already provides service {}",
                self.path(),
                name
            )));
        }
        service.attach(self)?;
        self.core().services.lock().insert(name.clone(), service);
        tracing::info!(hub = %self.path(), service = %name, "service provided");
        Ok(())
    }

    /// Find a service on this hub or the nearest enclosing hub providing it.
    pub fn service(&self, name: &str) -> Option<Arc<dyn BusService>> {
        if let Some(service) = self.core().services.lock().get(name).cloned() {
            return Some(service);
        }
        self.node.context().hub().and_then(|parent| parent.service(name))
    }

    // =========================================================================
    // Lifecycle steps
    // =========================================================================

    pub(crate) fn step(&self, to: NodeState) -> Option<Request> {
        match to {
            NodeState::Loaded => Some(self.load()),
            NodeState::Unloading => {
                self.core().joins.lock().mode = JoinMode::Closed;
                None
            }
            NodeState::Unloaded => Some(self.unload()),
            NodeState::Detached => {
                let mut joins = self.core().joins.lock();
                joins.mode = JoinMode::Queue;
                joins.candidates.clear();
                None
            }
            _ => None,
        }
    }

    /// Switch to immediate joins and admit every queued candidate. The step
    /// waits for each join to settle; a failed join only fails its own
    /// voucher.
    fn load(&self) -> Request {
        let candidates = {
            let mut joins = self.core().joins.lock();
            joins.mode = JoinMode::Immediate;
            std::mem::take(&mut joins.candidates)
        };
        tracing::info!(hub = %self.path(), queued = candidates.len(), "admitting queued joins");
        MultiRequest::all(
            candidates
                .into_iter()
                .map(|candidate| settled(self.admit(candidate))),
        )
    }

    /// Dismiss every member, in join order.
    fn unload(&self) -> Request {
        let members = self.members();
        tracing::info!(hub = %self.path(), members = members.len(), "dismissing members");
        MultiRequest::all(members.iter().map(Member::dismiss).collect::<Vec<_>>())
    }
}

/// Succeeds once `request` completes, whatever its outcome.
fn settled(request: Request) -> Request {
    let done = Request::new();
    let target = done.clone();
    request.on_completion(move |outcome| {
        if let Outcome::Failed(err) = outcome {
            tracing::debug!("queued join failed: {}", err);
        }
        target.try_complete(Outcome::Successful);
    });
    done
}

impl Deref for BusHub {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl fmt::Debug for BusHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.core().members.lock().keys().cloned().collect();
        f.debug_struct("BusHub")
            .field("node", &self.node)
            .field("members", &members)
            .finish()
    }
}
