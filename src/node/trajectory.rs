//! Lifecycle trajectories per node kind, as data.
//!
//! Each kind lists its single-step edges explicitly; the engine never invents
//! an edge that is not listed here.

use super::state::NodeState;
use NodeState::*;

/// What kind of actor a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Node,
    Hub,
    Process,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trajectory {
    /// Edges from UNATTACHED up to the ready state, in order.
    pub setup: Vec<(NodeState, NodeState)>,
    /// Edges away from the ready state that return to it (suspend/resume).
    pub cycles: Vec<(NodeState, NodeState)>,
    /// Edges from the ready state (or a cycle state) down to DETACHED.
    pub shutdown: Vec<(NodeState, NodeState)>,
    /// The stable state reached after setup.
    pub ready: NodeState,
}

const NODE_SETUP: [(NodeState, NodeState); 4] = [
    (Unattached, Attaching),
    (Attaching, Attached),
    (Attached, Initializing),
    (Initializing, Initialized),
];

// The entry edge into TERMINATING is added per kind.
const NODE_TEARDOWN: [(NodeState, NodeState); 3] = [
    (Terminating, Terminated),
    (Terminated, Detaching),
    (Detaching, Detached),
];

impl Trajectory {
    pub fn for_kind(kind: NodeKind) -> Self {
        let mut setup = NODE_SETUP.to_vec();
        let mut cycles = Vec::new();
        let mut shutdown = Vec::new();
        let ready = match kind {
            NodeKind::Node => {
                shutdown.push((Initialized, Terminating));
                Initialized
            }
            NodeKind::Hub => {
                setup.extend([(Initialized, Loading), (Loading, Loaded)]);
                shutdown.extend([
                    (Loaded, Unloading),
                    (Unloading, Unloaded),
                    (Unloaded, Terminating),
                ]);
                Loaded
            }
            NodeKind::Process => {
                setup.extend([(Initialized, Starting), (Starting, Started)]);
                cycles.extend([
                    (Started, Suspending),
                    (Resumed, Suspending),
                    (Suspending, Suspended),
                    (Suspended, Resuming),
                    (Resuming, Resumed),
                ]);
                shutdown.extend([
                    (Started, Stopping),
                    (Resumed, Stopping),
                    (Suspended, Stopping),
                    (Stopping, Stopped),
                    (Stopped, Terminating),
                ]);
                Started
            }
        };
        shutdown.extend(NODE_TEARDOWN);
        Self {
            setup,
            cycles,
            shutdown,
            ready,
        }
    }

    /// Every edge, setup first.
    pub fn edges(&self) -> impl Iterator<Item = (NodeState, NodeState)> + '_ {
        self.setup
            .iter()
            .chain(self.cycles.iter())
            .chain(self.shutdown.iter())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaches(trajectory: &Trajectory, from: NodeState, to: NodeState) -> bool {
        let mut state = from;
        for _ in 0..32 {
            if state == to {
                return true;
            }
            match trajectory.edges().find(|(f, _)| *f == state) {
                Some((_, next)) => state = next,
                None => return false,
            }
        }
        false
    }

    #[test]
    fn test_ready_states() {
        assert_eq!(Trajectory::for_kind(NodeKind::Node).ready, Initialized);
        assert_eq!(Trajectory::for_kind(NodeKind::Hub).ready, Loaded);
        assert_eq!(Trajectory::for_kind(NodeKind::Process).ready, Started);
    }

    #[test]
    fn test_setup_is_a_chain_ending_at_ready() {
        for kind in [NodeKind::Node, NodeKind::Hub, NodeKind::Process] {
            let trajectory = Trajectory::for_kind(kind);
            for pair in trajectory.setup.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
            }
            assert_eq!(trajectory.setup.last().unwrap().1, trajectory.ready);
        }
    }

    #[test]
    fn test_every_kind_can_detach() {
        for kind in [NodeKind::Node, NodeKind::Hub] {
            let trajectory = Trajectory::for_kind(kind);
            assert!(reaches(&trajectory, trajectory.ready, Detached));
        }
    }

    #[test]
    fn test_no_self_loops() {
        for kind in [NodeKind::Node, NodeKind::Hub, NodeKind::Process] {
            assert!(Trajectory::for_kind(kind).edges().all(|(f, t)| f != t));
        }
    }
}
