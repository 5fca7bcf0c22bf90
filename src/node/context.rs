//! Application context: the explicit replacement for process-wide singletons.
//!
//! Every node is constructed with an [`AppContext`]. It owns the configuration,
//! the offline-name generator, the message queue and a weak handle on the root
//! hub used for path resolution.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::actor::{Node, WeakNode};
use super::hub::BusHub;
use super::invitation::{BusContext, Invitation};
use crate::address::BusPath;
use crate::message::{Envelope, MessageQueue, Request, Session};
use crate::types::{Config, Error, Result};

struct AppInner {
    config: Config,
    root_path: BusPath,
    queue: MessageQueue,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    offline_counter: AtomicU64,
    root: RwLock<WeakNode>,
}

/// Shared application context. Cloning shares it.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<AppInner>,
}

impl AppContext {
    /// Build the context and start its message queue. Must be called within a
    /// tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let root_path = BusPath::from_segments([
            config.bus.machine.clone(),
            config.bus.application.clone(),
        ])?;
        let (queue, dispatcher) = MessageQueue::start();
        tracing::info!(root = %root_path, "application context created");
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                root_path,
                queue,
                dispatcher: Mutex::new(Some(dispatcher)),
                offline_counter: AtomicU64::new(0),
                root: RwLock::new(WeakNode::default()),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// `corabus://{machine}/{application}`
    pub fn root_path(&self) -> &BusPath {
        &self.inner.root_path
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    /// Enqueue an envelope on the bus queue.
    pub fn post(&self, envelope: Envelope) -> Result<()> {
        self.inner.queue.enqueue(envelope)
    }

    /// Next auto-generated name for a node outside any hub.
    pub fn offline_name(&self) -> String {
        let n = self.inner.offline_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.inner.config.bus.offline_prefix, n)
    }

    /// Attach `hub` as the application's root hub and bring it up.
    pub fn install_root(&self, hub: &BusHub) -> Request {
        {
            let mut root = self.inner.root.write();
            if root.upgrade().is_some() {
                return Request::failed(Error::state_violation(format!(
                    "{} already has a root hub",
                    self.inner.root_path
                )));
            }
            *root = hub.node().downgrade();
        }
        let invitation = Invitation::new(
            Session::new(),
            BusContext::Root,
            self.inner.config.bus.application.clone(),
            self.inner.root_path.clone(),
            hub.node().id().clone(),
        );
        let request = hub.node().post_invitation(invitation).request().clone();
        let app = self.clone();
        let node = hub.node().clone();
        request.on_completion(move |outcome| {
            if !outcome.is_successful() {
                app.release_root(&node);
            }
        });
        request
    }

    /// Forget `node` as root hub, if it is the root hub.
    pub(crate) fn release_root(&self, node: &Node) {
        let mut root = self.inner.root.write();
        if root.points_to(node) {
            *root = WeakNode::default();
        }
    }

    pub fn root(&self) -> Option<BusHub> {
        self.inner.root.read().upgrade().and_then(BusHub::from_node)
    }

    /// Find the node reachable under `path`, walking down from the root hub.
    pub fn resolve(&self, path: &BusPath) -> Option<Node> {
        let below = path.strip_prefix(&self.inner.root_path)?;
        let mut node = self.root()?.node().clone();
        for segment in below {
            let hub = BusHub::from_node(node)?;
            node = hub.member(segment)?.node().clone();
        }
        Some(node)
    }

    /// Stop the message dispatcher. Pending envelopes are dropped.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("root_path", &self.inner.root_path)
            .field("queue", &self.inner.queue.stats())
            .finish()
    }
}
