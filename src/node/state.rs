//! Node lifecycle states and their coarse projection.
//!
//! ```text
//! UNATTACHED → ATTACHING → ATTACHED → INITIALIZING → INITIALIZED
//!     hub:     → LOADING → LOADED → UNLOADING → UNLOADED
//!     process: → STARTING → STARTED ⇄ SUSPENDING/SUSPENDED/RESUMING/RESUMED
//!              → STOPPING → STOPPED
//! → TERMINATING → TERMINATED → DETACHING → DETACHED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Unattached,
    Attaching,
    Attached,
    Initializing,
    Initialized,
    Loading,
    Loaded,
    Starting,
    Started,
    Suspending,
    Suspended,
    Resuming,
    Resumed,
    Stopping,
    Stopped,
    Unloading,
    Unloaded,
    Terminating,
    Terminated,
    Detaching,
    Detached,
}

/// Coarse lifecycle projection, a pure function of [`NodeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetaState {
    Down,
    ComingUp,
    Up,
    GoingDown,
}

impl NodeState {
    pub fn meta(self) -> MetaState {
        match self {
            NodeState::Unattached | NodeState::Detached => MetaState::Down,
            NodeState::Attaching | NodeState::Attached | NodeState::Initializing => {
                MetaState::ComingUp
            }
            NodeState::Initialized
            | NodeState::Loading
            | NodeState::Loaded
            | NodeState::Starting
            | NodeState::Started
            | NodeState::Suspending
            | NodeState::Suspended
            | NodeState::Resuming
            | NodeState::Resumed => MetaState::Up,
            NodeState::Stopping
            | NodeState::Stopped
            | NodeState::Unloading
            | NodeState::Unloaded
            | NodeState::Terminating
            | NodeState::Terminated
            | NodeState::Detaching => MetaState::GoingDown,
        }
    }

    /// States a node passes through while a step is under way.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            NodeState::Attaching
                | NodeState::Initializing
                | NodeState::Loading
                | NodeState::Starting
                | NodeState::Suspending
                | NodeState::Resuming
                | NodeState::Stopping
                | NodeState::Unloading
                | NodeState::Terminating
                | NodeState::Detaching
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Unattached => "UNATTACHED",
            NodeState::Attaching => "ATTACHING",
            NodeState::Attached => "ATTACHED",
            NodeState::Initializing => "INITIALIZING",
            NodeState::Initialized => "INITIALIZED",
            NodeState::Loading => "LOADING",
            NodeState::Loaded => "LOADED",
            NodeState::Starting => "STARTING",
            NodeState::Started => "STARTED",
            NodeState::Suspending => "SUSPENDING",
            NodeState::Suspended => "SUSPENDED",
            NodeState::Resuming => "RESUMING",
            NodeState::Resumed => "RESUMED",
            NodeState::Stopping => "STOPPING",
            NodeState::Stopped => "STOPPED",
            NodeState::Unloading => "UNLOADING",
            NodeState::Unloaded => "UNLOADED",
            NodeState::Terminating => "TERMINATING",
            NodeState::Terminated => "TERMINATED",
            NodeState::Detaching => "DETACHING",
            NodeState::Detached => "DETACHED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for MetaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetaState::Down => "DOWN",
            MetaState::ComingUp => "COMING_UP",
            MetaState::Up => "UP",
            MetaState::GoingDown => "GOING_DOWN",
        };
        f.write_str(name)
    }
}
