//! Processes: nodes that run a worker task while STARTED.
//!
//! The worker is an async function of a [`ProcessContext`]. Suspension is
//! cooperative: SUSPENDED holds the single permit of the process gate, and the
//! worker blocks in [`ProcessContext::check_suspend`] until it is released.
//! Stopping cancels the worker's token and releases the gate.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::actor::{Extension, Node, NodeBuilder};
use super::state::NodeState;
use super::trajectory::NodeKind;
use super::AppContext;
use crate::address::BusPath;
use crate::message::{Outcome, Request};
use crate::types::{Error, Result};

/// The body of a process.
pub type Worker = Arc<dyn Fn(ProcessContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Run {
    token: CancellationToken,
    exited: Request,
}

pub(crate) struct ProcessCore {
    worker: Worker,
    gate: Arc<Semaphore>,
    /// Held while SUSPENDED.
    held: Mutex<Option<OwnedSemaphorePermit>>,
    run: Mutex<Option<Run>>,
}

/// What a running worker sees of its process.
#[derive(Clone)]
pub struct ProcessContext {
    path: BusPath,
    token: CancellationToken,
    gate: Arc<Semaphore>,
}

impl ProcessContext {
    pub fn path(&self) -> &BusPath {
        &self.path
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the process is asked to stop.
    pub async fn interrupted(&self) {
        self.token.cancelled().await
    }

    /// Wait while the process is suspended. Fails with `Interrupted` once the
    /// process is stopping.
    pub async fn check_suspend(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::interrupted(format!("{} stopping", self.path)));
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                Err(Error::interrupted(format!("{} stopping", self.path)))
            }
            permit = self.gate.acquire() => match permit {
                Ok(_permit) => Ok(()),
                Err(_) => Err(Error::interrupted(format!("{} gate closed", self.path))),
            },
        }
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("path", &self.path)
            .field("interrupted", &self.token.is_cancelled())
            .finish()
    }
}

/// A node running a worker task.
///
/// The state machine does not wait for the worker. `Starting → Started`
/// completes once the worker is spawned, and the node stays at `Started`
/// while it runs so `suspend`, `resume` and `shutdown` can be driven
/// meanwhile. The worker's exit is observed through [`BusProcess::join`]; a
/// worker that returns on its own leaves the node at `Started` until it is
/// shut down.
#[derive(Clone)]
pub struct BusProcess {
    node: Node,
}

impl NodeBuilder {
    pub fn build_process<F, Fut>(self, worker: F) -> BusProcess
    where
        F: Fn(ProcessContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let worker: Worker = Arc::new(move |ctx| worker(ctx).boxed());
        let core = ProcessCore {
            worker,
            gate: Arc::new(Semaphore::new(1)),
            held: Mutex::new(None),
            run: Mutex::new(None),
        };
        BusProcess {
            node: Node::construct(self, NodeKind::Process, Extension::Process(core)),
        }
    }
}

impl BusProcess {
    pub fn new<F, Fut>(app: &AppContext, worker: F) -> Self
    where
        F: Fn(ProcessContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        NodeBuilder::new(app).build_process(worker)
    }

    pub fn from_node(node: Node) -> Option<Self> {
        let is_process = matches!(node.inner().extension, Extension::Process(_));
        is_process.then_some(Self { node })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn core(&self) -> &ProcessCore {
        match &self.node.inner().extension {
            Extension::Process(core) => core,
            _ => unreachable!("BusProcess wraps a non-process node"),
        }
    }

    /// Completes when the current worker exits: success when it returns
    /// `Ok`, cancelled when it was interrupted, failed otherwise. Succeeds
    /// immediately if no worker was ever started.
    pub fn join(&self) -> Request {
        match self.core().run.lock().as_ref() {
            Some(run) => run.exited.clone(),
            None => Request::succeeded(),
        }
    }

    pub fn suspend(&self) -> Request {
        self.node.drive_to(NodeState::Suspended)
    }

    pub fn resume(&self) -> Request {
        self.node.drive_to(NodeState::Resumed)
    }

    /// Interrupt the worker and wait for it, stopping at STOPPED.
    pub fn stop(&self) -> Request {
        self.node.drive_to(NodeState::Stopped)
    }

    pub fn is_suspended(&self) -> bool {
        self.core().held.lock().is_some()
    }

    // =========================================================================
    // Lifecycle steps
    // =========================================================================

    pub(crate) fn step(&self, to: NodeState) -> Result<Option<Request>> {
        match to {
            NodeState::Started => self.spawn_worker().map(|_| None),
            NodeState::Suspended => Ok(Some(self.close_gate())),
            NodeState::Resumed => {
                self.open_gate();
                Ok(None)
            }
            NodeState::Stopping => {
                self.interrupt();
                Ok(None)
            }
            NodeState::Stopped => Ok(Some(self.worker_exit())),
            _ => Ok(None),
        }
    }

    fn spawn_worker(&self) -> Result<()> {
        let mut run = self.core().run.lock();
        if let Some(current) = run.as_ref() {
            if !current.exited.is_done() {
                return Err(Error::state_violation(format!(
                    "{} worker is still running",
                    self.node.path()
                )));
            }
        }

        let path = self.node.path();
        let token = CancellationToken::new();
        let exited = Request::new();
        let ctx = ProcessContext {
            path: path.clone(),
            token: token.clone(),
            gate: self.core().gate.clone(),
        };
        let work = (self.core().worker)(ctx);
        let done = exited.clone();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => Outcome::Successful,
                Ok(Err(err)) if err.is_interrupted() => Outcome::Cancelled,
                Ok(Err(err)) => Outcome::Failed(err),
                Err(_) => Outcome::Failed(Error::failed(format!("{} worker panicked", path))),
            };
            match &outcome {
                Outcome::Failed(err) => tracing::error!(process = %path, "worker failed: {}", err),
                _ => tracing::info!(process = %path, state = %outcome.state(), "worker exited"),
            }
            done.try_complete(outcome);
        });
        *run = Some(Run { token, exited });
        tracing::info!(process = %self.node.path(), "worker started");
        Ok(())
    }

    /// Take the gate permit; completes once the worker is outside
    /// `check_suspend`.
    fn close_gate(&self) -> Request {
        let request = Request::new();
        let completion = request.clone();
        let gate = self.core().gate.clone();
        let process = self.clone();
        tokio::spawn(async move {
            match gate.acquire_owned().await {
                Ok(permit) => {
                    *process.core().held.lock() = Some(permit);
                    completion.try_complete(Outcome::Successful);
                }
                Err(_) => {
                    completion.try_complete(Outcome::Failed(Error::internal(
                        "process gate closed",
                    )));
                }
            }
        });
        request
    }

    fn open_gate(&self) {
        self.core().held.lock().take();
    }

    fn interrupt(&self) {
        if let Some(run) = self.core().run.lock().as_ref() {
            run.token.cancel();
        }
        self.open_gate();
    }

    /// Succeeds once the worker has exited, however it exited.
    fn worker_exit(&self) -> Request {
        let exited = self.join();
        let done = Request::new();
        let target = done.clone();
        exited.on_completion(move |_| {
            target.try_complete(Outcome::Successful);
        });
        done
    }
}

impl Deref for BusProcess {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl fmt::Debug for BusProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusProcess")
            .field("node", &self.node)
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BusHub;
    use crate::types::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn app_with_root() -> (AppContext, BusHub) {
        let app = AppContext::new(Config::default()).unwrap();
        let root = BusHub::new(&app);
        assert!(app.install_root(&root).standby().await.is_successful());
        (app, root)
    }

    fn ticking(app: &AppContext, ticks: Arc<AtomicUsize>) -> BusProcess {
        BusProcess::new(app, move |ctx| {
            let ticks = ticks.clone();
            async move {
                while !ctx.is_interrupted() {
                    ctx.check_suspend().await?;
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_join_starts_worker() {
        let (app, root) = app_with_root().await;
        let ticks = Arc::new(AtomicUsize::new(0));
        let process = ticking(&app, ticks.clone());

        assert!(root.join(process.node(), "ticker").standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Started);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_suspend_blocks_worker_until_resume() {
        let (app, root) = app_with_root().await;
        let ticks = Arc::new(AtomicUsize::new(0));
        let process = ticking(&app, ticks.clone());
        assert!(root.join(process.node(), "ticker").standby().await.is_successful());

        assert!(process.suspend().standby().await.is_successful());
        assert!(process.is_suspended());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let frozen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        assert!(process.resume().standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Resumed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ticks.load(Ordering::SeqCst) > frozen);
    }

    #[tokio::test]
    async fn test_stop_while_suspended_interrupts_worker() {
        let (app, root) = app_with_root().await;
        let process = ticking(&app, Arc::new(AtomicUsize::new(0)));
        assert!(root.join(process.node(), "ticker").standby().await.is_successful());
        assert!(process.suspend().standby().await.is_successful());

        assert!(process.stop().standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Stopped);
        assert!(process.join().is_cancelled());
    }

    #[tokio::test]
    async fn test_worker_failure_reported_by_join() {
        let (app, root) = app_with_root().await;
        let process = BusProcess::new(&app, |_ctx| async { Err(Error::failed("crashed")) });
        assert!(root.join(process.node(), "fragile").standby().await.is_successful());

        let outcome = process.join().standby().await;
        assert!(matches!(outcome, Outcome::Failed(Error::Failed(_))));
        assert!(process.shutdown().standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Detached);
    }

    #[tokio::test]
    async fn test_finished_worker_leaves_node_started() {
        let (app, root) = app_with_root().await;
        let process = BusProcess::new(&app, |_ctx| async { Ok(()) });
        assert!(root.join(process.node(), "oneshot").standby().await.is_successful());

        assert!(process.join().standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Started);
        assert!(process.shutdown().standby().await.is_successful());
        assert_eq!(process.state(), NodeState::Detached);
    }
}
