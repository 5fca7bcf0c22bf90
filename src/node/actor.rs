//! The bus node actor.
//!
//! A [`Node`] is an addressable actor: a lifecycle [`StateMachine`] driven
//! along its kind's trajectory, a binding (name + context) that determines its
//! path, and a route table that handles envelopes delivered by the queue.
//! Hubs and processes are nodes with a kind-specific extension.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use super::context::AppContext;
use super::hooks::NodeHooks;
use super::hub::{BusHub, HubCore};
use super::invitation::{BusContext, Invitation, Member};
use super::process::{BusProcess, ProcessCore};
use super::routes::{Handler, RouteTable};
use super::state::{MetaState, NodeState};
use super::trajectory::{NodeKind, Trajectory};
use crate::address::BusPath;
use crate::machine::{StateMachine, StateTransition};
use crate::message::{
    Command, Envelope, Event, Letter, MessageType, Outcome, Recipient, Request, Session, Voucher,
};
use crate::types::{Error, NodeId, Result};

pub(crate) enum Extension {
    Plain,
    Hub(HubCore),
    Process(ProcessCore),
}

struct Binding {
    name: String,
    context: BusContext,
}

pub(crate) struct NodeInner {
    id: NodeId,
    kind: NodeKind,
    app: AppContext,
    binding: Mutex<Binding>,
    machine: StateMachine<NodeState>,
    hooks: NodeHooks,
    routes: RwLock<RouteTable>,
    /// Invitation being served by the current setup drive.
    pending: Mutex<Option<Invitation>>,
    state_tx: watch::Sender<NodeState>,
    pub(crate) extension: Extension,
}

/// Shared handle on a node. Cloning shares the actor.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Non-owning node handle, used for back references (member → hub).
#[derive(Clone, Default)]
pub struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }

    pub(crate) fn points_to(&self, node: &Node) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&node.inner))
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({})", node.path()),
            None => f.write_str("WeakNode(<dropped>)"),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects hooks and routes before a node is constructed.
#[derive(Debug)]
pub struct NodeBuilder {
    pub(crate) app: AppContext,
    hooks: NodeHooks,
    routes: RouteTable,
}

impl NodeBuilder {
    pub fn new(app: &AppContext) -> Self {
        Self {
            app: app.clone(),
            hooks: NodeHooks::new(),
            routes: RouteTable::new(),
        }
    }

    /// Run `hook` whenever a step enters `state`.
    pub fn hook<F>(mut self, state: NodeState, hook: F) -> Self
    where
        F: Fn(&Node) -> Result<Option<Request>> + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on(state, hook);
        self
    }

    pub fn hooks(mut self, hooks: NodeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn route<F>(mut self, message_type: impl Into<MessageType>, handler: F) -> Self
    where
        F: Fn(&Node, &Envelope) -> Result<()> + Send + Sync + 'static,
    {
        self.routes.insert(message_type.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Node {
        Node::construct(self, NodeKind::Node, Extension::Plain)
    }
}

// =============================================================================
// Node
// =============================================================================

impl Node {
    pub fn new(app: &AppContext) -> Self {
        NodeBuilder::new(app).build()
    }

    pub fn builder(app: &AppContext) -> NodeBuilder {
        NodeBuilder::new(app)
    }

    pub(crate) fn construct(builder: NodeBuilder, kind: NodeKind, extension: Extension) -> Self {
        let NodeBuilder {
            app,
            hooks,
            mut routes,
        } = builder;
        let invitation_route: Handler = Arc::new(|node: &Node, envelope: &Envelope| {
            match envelope.letter() {
                Letter::Invitation(invitation) => node.accept_invitation(invitation),
                other => Err(Error::validation(format!(
                    "{} routed as invitation",
                    other.message_type()
                ))),
            }
        });
        routes.insert(MessageType::invitation(), invitation_route);

        let id = NodeId::new();
        let name = app.offline_name();
        let (state_tx, _) = watch::channel(NodeState::Unattached);
        let machine = StateMachine::new(format!("{:?}:{}", kind, id), NodeState::Unattached);

        let inner = Arc::new(NodeInner {
            id,
            kind,
            app,
            binding: Mutex::new(Binding {
                name,
                context: BusContext::Offline,
            }),
            machine,
            hooks,
            routes: RwLock::new(routes),
            pending: Mutex::new(None),
            state_tx,
            extension,
        });

        let weak = Arc::downgrade(&inner);
        inner.machine.set_listener(move |from, to| {
            if let Some(inner) = weak.upgrade() {
                Node { inner }.on_transition(from, to);
            }
        });
        Node { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<NodeInner> {
        &self.inner
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.inner))
    }

    pub fn same_node(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    pub fn app(&self) -> &AppContext {
        &self.inner.app
    }

    pub fn name(&self) -> String {
        self.inner.binding.lock().name.clone()
    }

    pub fn context(&self) -> BusContext {
        self.inner.binding.lock().context.clone()
    }

    /// Offline nodes live at `corabus://{name}`; attached nodes below their
    /// hub; the root hub at the application root path.
    pub fn path(&self) -> BusPath {
        let (name, context) = {
            let binding = self.inner.binding.lock();
            (binding.name.clone(), binding.context.clone())
        };
        let parent = match context {
            BusContext::Root => return self.inner.app.root_path().clone(),
            BusContext::Hub(_) => match context.hub() {
                Some(hub) => hub.path(),
                None => BusPath::root(),
            },
            BusContext::Offline => BusPath::root(),
        };
        parent.child(name).unwrap_or(parent)
    }

    pub fn state(&self) -> NodeState {
        self.inner.machine.current_state()
    }

    pub fn meta_state(&self) -> MetaState {
        self.state().meta()
    }

    /// The error that left the node short of its target state, if any.
    pub fn fault(&self) -> Option<Error> {
        self.inner.machine.fault()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.machine.is_in_flight()
    }

    /// Lifecycle trajectory of this node's kind.
    pub fn trajectory(&self) -> Trajectory {
        Trajectory::for_kind(self.inner.kind)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NodeState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolve once the node has entered `state`.
    pub async fn wait_for_state(&self, state: NodeState) {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    pub fn add_route<F>(&self, message_type: impl Into<MessageType>, handler: F)
    where
        F: Fn(&Node, &Envelope) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .routes
            .write()
            .insert(message_type.into(), Arc::new(handler));
    }

    pub fn has_route(&self, message_type: &MessageType) -> bool {
        self.inner.routes.read().contains(message_type)
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Enqueue `letter` from this node to `recipients`.
    pub fn send(&self, recipients: &[Node], letter: Letter) -> Result<()> {
        let recipients: Vec<Arc<dyn Recipient>> = recipients
            .iter()
            .map(|node| Arc::new(node.clone()) as Arc<dyn Recipient>)
            .collect();
        self.inner
            .app
            .post(Envelope::new(self.path(), recipients, letter))
    }

    /// Send a command to `target`; the voucher carries its reply.
    pub fn command(
        &self,
        target: &Node,
        session: Session,
        name: impl Into<String>,
        args: Value,
    ) -> Voucher<Value> {
        let command = Command::new(session, name, args);
        let voucher = command.voucher.clone();
        if let Err(err) = self.send(std::slice::from_ref(target), Letter::Command(command)) {
            voucher.request().try_complete(Outcome::Failed(err));
        }
        voucher
    }

    pub fn publish(
        &self,
        targets: &[Node],
        session: Session,
        name: impl Into<String>,
        data: Value,
    ) -> Result<()> {
        self.send(targets, Letter::Event(Event::new(session, name, data)))
    }

    /// Enqueue `invitation` for this node.
    pub(crate) fn post_invitation(&self, invitation: Invitation) -> Voucher<Member> {
        let voucher = invitation.voucher.clone();
        let envelope = Envelope::to(
            invitation.sender.clone(),
            Arc::new(self.clone()),
            Letter::Invitation(invitation),
        );
        if let Err(err) = self.inner.app.post(envelope) {
            voucher.request().try_complete(Outcome::Failed(err));
        }
        voucher
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drive the node's machine toward `target` along registered steps.
    pub(crate) fn drive_to(&self, target: NodeState) -> Request {
        self.inner.machine.drive_to(target)
    }

    /// Drive the node down to DETACHED. Nodes that never attached, or are
    /// already detached, succeed immediately.
    pub fn shutdown(&self) -> Request {
        match self.state() {
            NodeState::Unattached | NodeState::Detached => Request::succeeded(),
            _ => self.inner.machine.drive_to(NodeState::Detached),
        }
    }

    /// Serve an invitation: register the trajectory, drive to the ready state
    /// and report the outcome to the invitation's voucher.
    pub(crate) fn accept_invitation(&self, invitation: &Invitation) -> Result<()> {
        if invitation.recipient != self.inner.id {
            return Err(Error::validation(format!(
                "invitation for {} delivered to {}",
                invitation.recipient, self.inner.id
            )));
        }
        self.check_attachable()?;
        match self.state() {
            NodeState::Unattached => {}
            NodeState::Detached => {
                self.inner.machine.initialize(NodeState::Unattached)?;
                self.inner.state_tx.send_replace(NodeState::Unattached);
            }
            other => {
                return Err(Error::state_violation(format!(
                    "{} cannot accept an invitation in {}",
                    self.path(),
                    other
                )))
            }
        }
        {
            let mut pending = self.inner.pending.lock();
            if pending.is_some() {
                return Err(Error::state_violation(format!(
                    "{} is already serving an invitation",
                    self.path()
                )));
            }
            *pending = Some(invitation.clone());
        }

        tracing::debug!(
            node = %self.path(),
            name = %invitation.name,
            sender = %invitation.sender,
            "invitation accepted"
        );
        self.register_trajectory();
        let drive = self.inner.machine.drive_to(self.trajectory().ready);

        let node = self.clone();
        let voucher = invitation.voucher.clone();
        let member_slot = invitation.member.clone();
        drive.on_completion(move |outcome| {
            node.inner.pending.lock().take();
            let member = member_slot.lock().take();
            match (outcome, member) {
                (Outcome::Successful, Some(member)) => {
                    if let Err(err) = voucher.resolve(member) {
                        tracing::warn!("invitation outcome dropped: {}", err);
                    }
                }
                (Outcome::Successful, None) => {
                    voucher.request().try_complete(Outcome::Failed(Error::internal(
                        "setup finished without attaching",
                    )));
                }
                (other, _) => {
                    voucher.request().try_complete(other.clone());
                }
            }
        });
        Ok(())
    }

    fn register_trajectory(&self) {
        let transitions: Vec<StateTransition<NodeState>> = self
            .trajectory()
            .edges()
            .map(|(from, to)| {
                let weak = self.downgrade();
                StateTransition::new(from, to, move || match weak.upgrade() {
                    Some(node) => node.step(to),
                    None => Err(Error::internal("node dropped mid-transition")),
                })
            })
            .collect();
        self.inner.machine.add_transitions(transitions);
    }

    /// Built-in behavior of the step entering `to`, then the user hook.
    fn step(&self, to: NodeState) -> Result<Option<Request>> {
        match to {
            NodeState::Attaching => self.check_attachable()?,
            NodeState::Attached => self.attach()?,
            NodeState::Detached => self.detach(),
            _ => {}
        }
        let builtin = match &self.inner.extension {
            Extension::Plain => None,
            Extension::Hub(_) => BusHub::from_node(self.clone()).and_then(|hub| hub.step(to)),
            Extension::Process(_) => match BusProcess::from_node(self.clone()) {
                Some(process) => process.step(to)?,
                None => None,
            },
        };

        let Some(hook) = self.inner.hooks.get(to) else {
            return Ok(builtin);
        };
        match builtin {
            None => hook(self),
            Some(pending) => {
                let node = self.clone();
                Ok(Some(pending.and_then(move || match hook(&node) {
                    Ok(Some(request)) => request,
                    Ok(None) => Request::succeeded(),
                    Err(err) => Request::failed(err),
                })))
            }
        }
    }

    /// Pre-attach check: a node attached anywhere cannot be invited again.
    fn check_attachable(&self) -> Result<()> {
        let binding = self.inner.binding.lock();
        if binding.context.is_offline() {
            return Ok(());
        }
        Err(Error::state_violation(format!(
            "{} is already attached to {:?}",
            binding.name, binding.context
        )))
    }

    /// Take the pending invitation's name and context, and create the member
    /// handle handed back to the inviter.
    fn attach(&self) -> Result<()> {
        let invitation = self
            .inner
            .pending
            .lock()
            .clone()
            .ok_or_else(|| Error::state_violation("attach without a pending invitation"))?;
        {
            let mut binding = self.inner.binding.lock();
            binding.name = invitation.name.clone();
            binding.context = invitation.context.clone();
        }
        *invitation.member.lock() = Some(Member::new(invitation.name.clone(), self.clone()));
        tracing::info!(node = %self.path(), "attached");
        Ok(())
    }

    /// Leave the hub and fall back to an offline binding.
    fn detach(&self) {
        let fresh = Binding {
            name: self.inner.app.offline_name(),
            context: BusContext::Offline,
        };
        let previous = std::mem::replace(&mut *self.inner.binding.lock(), fresh);
        match &previous.context {
            BusContext::Hub(_) => {
                if let Some(hub) = previous.context.hub() {
                    hub.forget(&previous.name, &self.inner.id);
                }
            }
            BusContext::Root => self.inner.app.release_root(self),
            BusContext::Offline => {}
        }
        tracing::info!(node = %previous.name, offline = %self.name(), "detached");
    }

    fn on_transition(&self, from: NodeState, to: NodeState) {
        self.inner.state_tx.send_replace(to);
        if from.meta() != to.meta() {
            tracing::info!(node = %self.path(), state = %to, meta = %to.meta(), "lifecycle");
        } else {
            tracing::debug!(node = %self.path(), %from, %to, "lifecycle step");
        }
    }
}

impl Recipient for Node {
    fn recipient_id(&self) -> NodeId {
        self.inner.id.clone()
    }

    fn receive(&self, envelope: &Envelope) -> Result<()> {
        let message_type = envelope.message_type();
        let handler = self.inner.routes.read().get(&message_type);
        match handler {
            Some(handler) => handler(self, envelope),
            None => Err(Error::not_found(format!(
                "{} has no route for {}",
                self.path(),
                message_type
            ))),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Config;
    use std::time::Duration;

    async fn app_with_root() -> (AppContext, BusHub) {
        let app = AppContext::new(Config::default()).unwrap();
        let root = BusHub::new(&app);
        let outcome = app.install_root(&root).standby().await;
        assert!(outcome.is_successful(), "{:?}", outcome);
        (app, root)
    }

    #[tokio::test]
    async fn test_new_node_is_offline_and_down() {
        let app = AppContext::new(Config::default()).unwrap();
        let node = Node::new(&app);
        assert_eq!(node.state(), NodeState::Unattached);
        assert_eq!(node.meta_state(), MetaState::Down);
        assert!(node.context().is_offline());
        assert_eq!(node.path().segments(), &[node.name()]);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (app, root) = app_with_root().await;
        let node = Node::new(&app);
        let voucher = root.command(&node, Session::new(), "nope", Value::Null);
        let outcome = voucher.standby().await;
        assert!(matches!(outcome, Outcome::Failed(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_send_to_nobody_fails_carried_command() {
        let (_app, root) = app_with_root().await;
        let command = Command::new(Session::new(), "echo", Value::Null);
        let voucher = command.voucher.clone();
        assert!(matches!(
            root.node().send(&[], Letter::Command(command)),
            Err(Error::NotFound(_))
        ));
        let outcome = voucher.standby_timeout(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_join_attaches_under_hub_path() {
        let (app, root) = app_with_root().await;
        let node = Node::new(&app);
        let member = root.join(&node, "worker");
        assert!(member.standby().await.is_successful());

        assert_eq!(node.state(), NodeState::Initialized);
        assert_eq!(node.meta_state(), MetaState::Up);
        assert_eq!(node.path().to_uri(), "corabus://localhost/corabus/worker");
        assert_eq!(member.value().unwrap().name(), "worker");
    }

    #[tokio::test]
    async fn test_attached_node_rejects_second_invitation() {
        let (app, root) = app_with_root().await;
        let node = Node::new(&app);
        assert!(root.join(&node, "a").standby().await.is_successful());

        let outcome = root.join(&node, "b").standby().await;
        assert!(matches!(outcome, Outcome::Failed(Error::StateViolation(_))));
        assert_eq!(node.name(), "a");
        assert!(root.member("b").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_of_unattached_node_succeeds() {
        let app = AppContext::new(Config::default()).unwrap();
        let node = Node::new(&app);
        assert!(node.shutdown().is_successful());
    }

    #[tokio::test]
    async fn test_failing_hook_faults_node_and_invitation() {
        let (app, root) = app_with_root().await;
        let node = Node::builder(&app)
            .hook(NodeState::Initializing, |_| Err(Error::failed("no config")))
            .build();
        let outcome = root.join(&node, "broken").standby().await;

        assert!(matches!(outcome, Outcome::Failed(Error::Failed(_))));
        assert_eq!(node.state(), NodeState::Attached);
        assert!(node.fault().is_some());
        assert!(root.member("broken").is_none());
    }

    #[tokio::test]
    async fn test_hook_request_delays_step() {
        let (app, root) = app_with_root().await;
        let gate = Request::new();
        let pending = gate.clone();
        let node = Node::builder(&app)
            .hook(NodeState::Initialized, move |_| Ok(Some(pending.clone())))
            .build();
        let member = root.join(&node, "slow");

        tokio::time::timeout(Duration::from_secs(1), node.wait_for_state(NodeState::Initializing))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!member.is_done());

        gate.succeed().unwrap();
        assert!(member.standby().await.is_successful());
        assert_eq!(node.state(), NodeState::Initialized);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_and_allows_rejoin() {
        let (app, root) = app_with_root().await;
        let node = Node::new(&app);
        let member = root.join(&node, "temp");
        assert!(member.standby().await.is_successful());

        assert!(member.value().unwrap().dismiss().standby().await.is_successful());
        assert_eq!(node.state(), NodeState::Detached);
        assert!(node.context().is_offline());
        assert!(root.member("temp").is_none());

        assert!(root.join(&node, "again").standby().await.is_successful());
        assert_eq!(node.state(), NodeState::Initialized);
    }

    #[tokio::test]
    async fn test_command_route_resolves_voucher() {
        let (app, root) = app_with_root().await;
        let node = Node::builder(&app)
            .route("double", |_, envelope| match envelope.letter() {
                Letter::Command(command) => {
                    let n = command.args.as_i64().unwrap_or(0);
                    command.voucher.resolve(Value::from(n * 2))
                }
                _ => Ok(()),
            })
            .build();
        assert!(root.join(&node, "math").standby().await.is_successful());

        let voucher = root.command(&node, Session::new(), "double", Value::from(21));
        assert!(voucher.standby().await.is_successful());
        assert_eq!(voucher.value().unwrap(), Value::from(42));
    }
}
