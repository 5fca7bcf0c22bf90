//! Generic state-machine engine.

pub mod engine;
pub mod transition;

pub use engine::{MachineState, StateListener, StateMachine};
pub use transition::{Action, StateTransition};
