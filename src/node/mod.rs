//! Bus actors: nodes, hubs and processes.
//!
//! Every actor is a [`Node`] with a lifecycle state machine. Hubs contain
//! named members and processes run a worker task; both are nodes with a
//! kind-specific extension and a longer trajectory.

pub mod actor;
pub mod context;
pub mod hooks;
pub mod hub;
pub mod invitation;
pub mod process;
pub mod routes;
pub mod service;
pub mod state;
pub mod trajectory;

pub use actor::{Node, NodeBuilder, WeakNode};
pub use context::AppContext;
pub use hooks::{Hook, NodeHooks};
pub use hub::BusHub;
pub use invitation::{BusContext, Invitation, Member};
pub use process::{BusProcess, ProcessContext, Worker};
pub use routes::{Handler, RouteTable};
pub use service::{BusService, EchoService};
pub use state::{MetaState, NodeState};
pub use trajectory::{NodeKind, Trajectory};
