//! Lifecycle integration tests: nodes, hubs and processes driven through
//! their trajectories by joins and shutdowns.

use corabus::message::Outcome;
use corabus::node::{AppContext, BusHub, BusProcess, MetaState, Node, NodeHooks, NodeState};
use corabus::types::Config;
use corabus::Error;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn start_app() -> (AppContext, BusHub) {
    let app = AppContext::new(Config::default()).unwrap();
    let root = BusHub::new(&app);
    assert!(app.install_root(&root).standby().await.is_successful());
    (app, root)
}

/// Hooks recording every state a step enters.
fn recording_hooks(log: &Arc<Mutex<Vec<NodeState>>>) -> NodeHooks {
    use NodeState::*;
    let mut hooks = NodeHooks::new();
    for state in [
        Attaching,
        Attached,
        Initializing,
        Initialized,
        Terminating,
        Terminated,
        Detaching,
        Detached,
    ] {
        let log = log.clone();
        hooks = hooks.on(state, move |_| {
            log.lock().push(state);
            Ok(None)
        });
    }
    hooks
}

#[tokio::test]
async fn test_node_walks_whole_trajectory() {
    use NodeState::*;
    let (app, root) = start_app().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let node = Node::builder(&app).hooks(recording_hooks(&log)).build();
    assert_eq!(node.meta_state(), MetaState::Down);

    let member = root.join(&node, "walker");
    assert!(member.standby().await.is_successful());
    assert_eq!(
        member.value().unwrap().path().to_uri(),
        "corabus://localhost/corabus/walker"
    );
    assert_eq!(node.meta_state(), MetaState::Up);

    assert!(node.shutdown().standby().await.is_successful());
    assert_eq!(node.meta_state(), MetaState::Down);
    assert!(root.member("walker").is_none());

    let entered = log.lock().clone();
    assert_eq!(
        entered,
        vec![
            Attaching,
            Attached,
            Initializing,
            Initialized,
            Terminating,
            Terminated,
            Detaching,
            Detached
        ]
    );
    let mut metas: Vec<MetaState> = entered.iter().map(|s| s.meta()).collect();
    metas.dedup();
    assert_eq!(
        metas,
        vec![
            MetaState::ComingUp,
            MetaState::Up,
            MetaState::GoingDown,
            MetaState::Down
        ]
    );
}

#[tokio::test]
async fn test_concurrent_joins_under_one_name_have_one_winner() {
    let (app, root) = start_app().await;
    let nodes: Vec<Node> = (0..8).map(|_| Node::new(&app)).collect();
    let vouchers: Vec<_> = nodes.iter().map(|node| root.join(node, "twin")).collect();

    let mut winners = 0;
    let mut collisions = 0;
    for voucher in &vouchers {
        match voucher.standby().await {
            Outcome::Successful => winners += 1,
            Outcome::Failed(Error::NameCollision(_)) => collisions += 1,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!((winners, collisions), (1, 7));
    assert_eq!(root.member_count(), 1);
    let up = nodes
        .iter()
        .filter(|node| node.meta_state() == MetaState::Up)
        .count();
    assert_eq!(up, 1);
}

#[tokio::test]
async fn test_root_shutdown_stops_nested_processes() {
    let (app, root) = start_app().await;
    let services = BusHub::new(&app);
    assert!(root.join(services.node(), "services").standby().await.is_successful());

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let worker = BusProcess::new(&app, move |ctx| {
        let flag = flag.clone();
        async move {
            ctx.interrupted().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    assert!(services.join(worker.node(), "worker").standby().await.is_successful());
    assert_eq!(
        app.resolve(&"corabus://localhost/corabus/services/worker".parse().unwrap())
            .map(|node| node.same_node(worker.node())),
        Some(true)
    );

    let down = root.shutdown();
    let outcome = down.standby_timeout(Duration::from_secs(2)).await.unwrap();
    assert!(outcome.is_successful(), "{:?}", outcome);
    assert!(interrupted.load(Ordering::SeqCst));
    assert_eq!(worker.state(), NodeState::Detached);
    assert_eq!(services.state(), NodeState::Detached);
    assert!(app.root().is_none());
}

#[tokio::test]
async fn test_node_moves_between_hubs() {
    let (app, root) = start_app().await;
    let left = BusHub::new(&app);
    let right = BusHub::new(&app);
    assert!(root.join(left.node(), "left").standby().await.is_successful());
    assert!(root.join(right.node(), "right").standby().await.is_successful());

    let node = Node::new(&app);
    assert!(left.join(&node, "nomad").standby().await.is_successful());
    assert_eq!(node.path().to_uri(), "corabus://localhost/corabus/left/nomad");

    // Attached nodes refuse a second hub.
    let refused = right.join(&node, "nomad").standby().await;
    assert!(matches!(refused, Outcome::Failed(Error::StateViolation(_))));

    assert!(node.shutdown().standby().await.is_successful());
    assert!(node.context().is_offline());
    assert!(right.join(&node, "nomad").standby().await.is_successful());
    assert_eq!(node.path().to_uri(), "corabus://localhost/corabus/right/nomad");
    assert!(left.member("nomad").is_none());
}
