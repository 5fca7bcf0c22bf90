//! Generic state-machine driver.
//!
//! The machine holds registered single-step transitions, a current state and
//! a target state. `start()` walks from current to target one registered step
//! at a time; a step whose action returns a pending request suspends the walk
//! until that request completes. The machine lock is never held while a step
//! runs or while waiting on a step's request, so a step may complete its own
//! request from any context.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::transition::StateTransition;
use crate::message::{Outcome, Request};
use crate::types::{Error, Result};

/// States a machine can drive. Blanket-implemented.
pub trait MachineState:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> MachineState for T where
    T: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// Called after every completed step with `(from, to)`.
pub type StateListener<S> = Arc<dyn Fn(S, S) + Send + Sync>;

struct MachineCore<S> {
    transitions: Vec<StateTransition<S>>,
    current: S,
    target: S,
    in_flight: bool,
    fault: Option<Error>,
    listener: Option<StateListener<S>>,
}

/// Shared handle on one state machine.
#[derive(Clone)]
pub struct StateMachine<S> {
    label: Arc<str>,
    core: Arc<Mutex<MachineCore<S>>>,
}

impl<S: MachineState> StateMachine<S> {
    pub fn new(label: impl Into<String>, start: S) -> Self {
        let label: String = label.into();
        Self {
            label: Arc::from(label),
            core: Arc::new(Mutex::new(MachineCore {
                transitions: Vec::new(),
                current: start,
                target: start,
                in_flight: false,
                fault: None,
                listener: None,
            })),
        }
    }

    /// Reset the current (and target) state without running anything.
    pub fn initialize(&self, start: S) -> Result<()> {
        let mut core = self.core.lock();
        if core.in_flight {
            return Err(Error::state_violation(format!(
                "{}: cannot initialize while a transition is in flight",
                self.label
            )));
        }
        core.current = start;
        core.target = start;
        core.fault = None;
        Ok(())
    }

    /// Register transitions. A transition with the same (initial, terminal)
    /// pair as an existing one replaces it.
    pub fn add_transitions<I>(&self, transitions: I)
    where
        I: IntoIterator<Item = StateTransition<S>>,
    {
        let mut core = self.core.lock();
        for transition in transitions {
            match core.transitions.iter().position(|t| {
                t.initial() == transition.initial() && t.terminal() == transition.terminal()
            }) {
                Some(index) => core.transitions[index] = transition,
                None => core.transitions.push(transition),
            }
        }
    }

    pub fn set_target_state(&self, target: S) {
        self.core.lock().target = target;
    }

    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(S, S) + Send + Sync + 'static,
    {
        self.core.lock().listener = Some(Arc::new(listener));
    }

    pub fn current_state(&self) -> S {
        self.core.lock().current
    }

    pub fn target_state(&self) -> S {
        self.core.lock().target
    }

    pub fn is_in_flight(&self) -> bool {
        self.core.lock().in_flight
    }

    /// The error that stopped the last drive, if it did not reach its target.
    pub fn fault(&self) -> Option<Error> {
        self.core.lock().fault.clone()
    }

    pub fn transition_count(&self) -> usize {
        self.core.lock().transitions.len()
    }

    /// Drive toward the target state. The returned request completes when the
    /// target is reached (success) or the walk stops (failure/cancellation).
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) -> Request {
        self.launch(None)
    }

    /// Set the target and start. The target is left untouched when a drive is
    /// already in flight.
    pub fn drive_to(&self, target: S) -> Request {
        self.launch(Some(target))
    }

    fn launch(&self, target: Option<S>) -> Request {
        {
            let mut core = self.core.lock();
            if core.in_flight {
                return Request::failed(Error::state_violation(format!(
                    "{}: a transition is already in flight",
                    self.label
                )));
            }
            if let Some(target) = target {
                core.target = target;
            }
            if core.current == core.target {
                return Request::succeeded();
            }
            core.in_flight = true;
            core.fault = None;
        }

        let outer = Request::new();
        let machine = self.clone();
        let completion = outer.clone();
        tokio::spawn(async move {
            let outcome = machine.run().await;
            completion.try_complete(outcome);
        });
        outer
    }

    async fn run(&self) -> Outcome {
        loop {
            let step = {
                let mut core = self.core.lock();
                if core.current == core.target {
                    core.in_flight = false;
                    return Outcome::Successful;
                }
                match next_step(&core.transitions, core.current, core.target) {
                    Some(index) => core.transitions[index].clone(),
                    None => {
                        let err = Error::state_violation(format!(
                            "{}: no transition from {} toward {}",
                            self.label, core.current, core.target
                        ));
                        return self.stop(&mut core, Outcome::Failed(err));
                    }
                }
            };

            tracing::debug!(
                machine = %self.label,
                from = %step.initial(),
                to = %step.terminal(),
                "transition"
            );

            let executed = std::panic::catch_unwind(AssertUnwindSafe(|| step.execute()))
                .unwrap_or_else(|_| {
                    Err(Error::failed(format!(
                        "{}: {} -> {} panicked",
                        self.label,
                        step.initial(),
                        step.terminal()
                    )))
                });

            let outcome = match executed {
                Ok(None) => Outcome::Successful,
                Ok(Some(pending)) => pending.standby().await,
                Err(err) => Outcome::Failed(err),
            };

            let listener = {
                let mut core = self.core.lock();
                if !outcome.is_successful() {
                    return self.stop(&mut core, outcome);
                }
                core.current = step.terminal();
                core.listener.clone()
            };
            if let Some(listener) = listener {
                listener(step.initial(), step.terminal());
            }
        }
    }

    fn stop(&self, core: &mut MachineCore<S>, outcome: Outcome) -> Outcome {
        core.in_flight = false;
        let fault = match &outcome {
            Outcome::Failed(err) => err.clone(),
            _ => Error::cancelled(format!("{}: transition cancelled", self.label)),
        };
        tracing::error!(
            machine = %self.label,
            state = %core.current,
            target = %core.target,
            "state machine stopped short: {}",
            fault
        );
        core.fault = Some(fault);
        outcome
    }
}

/// Index of the first registered step on a shortest chain of registered
/// steps from `from` to `to`. Ties go to registration order.
fn next_step<S: MachineState>(transitions: &[StateTransition<S>], from: S, to: S) -> Option<usize> {
    let mut visited: HashSet<S> = HashSet::from([from]);
    let mut frontier: VecDeque<(S, usize)> = VecDeque::new();

    for (index, transition) in transitions.iter().enumerate() {
        if transition.initial() != from {
            continue;
        }
        if transition.terminal() == to {
            return Some(index);
        }
        if visited.insert(transition.terminal()) {
            frontier.push_back((transition.terminal(), index));
        }
    }

    while let Some((state, first)) = frontier.pop_front() {
        for transition in transitions.iter().filter(|t| t.initial() == state) {
            if transition.terminal() == to {
                return Some(first);
            }
            if visited.insert(transition.terminal()) {
                frontier.push_back((transition.terminal(), first));
            }
        }
    }
    None
}

impl<S: MachineState> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("StateMachine")
            .field("label", &self.label)
            .field("current", &core.current)
            .field("target", &core.target)
            .field("in_flight", &core.in_flight)
            .field("transitions", &core.transitions.len())
            .finish()
    }
}
