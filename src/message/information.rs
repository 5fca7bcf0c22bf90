//! The information core: identity, completion state, delivery accounting and
//! completion observers.
//!
//! Locking: one `parking_lot::Mutex` guards state, failure cause, pending
//! deliveries and the observer list together, so "last delivery flips to
//! DELIVERED" and "observer registered just as the request completes" are both
//! decided under the same lock. Observers always run after the lock is
//! released.
//!
//! The wakeup signal is published outside the slot lock, so publishes can
//! race. It only ever moves forward: a late DELIVERED never replaces a
//! terminal state a concurrent completion already published.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::state::{InformationState, Outcome};
use crate::address::BusPath;
use crate::types::{Error, InformationId, NodeId, Result};

/// Completion callback.
pub(crate) type Callback = Box<dyn FnOnce(&Outcome) + Send + 'static>;

pub(crate) enum Observer {
    /// Drive another piece of information to the same outcome.
    Mirror(Information),
    Callback(Callback),
}

impl Observer {
    fn notify(self, outcome: &Outcome) {
        match self {
            Observer::Mirror(other) => {
                // The mirrored request may already have been completed by
                // someone else; that is not an error for the observed side.
                if !other.try_complete(outcome.clone()) {
                    tracing::debug!(id = %other.id(), "mirror target already complete");
                }
            }
            Observer::Callback(callback) => callback(outcome),
        }
    }
}

struct Slot {
    state: InformationState,
    cause: Option<Error>,
    pending: Option<Vec<NodeId>>,
    observers: Vec<Observer>,
}

struct Core {
    id: InformationId,
    created_at: DateTime<Utc>,
    origin: Option<BusPath>,
    slot: Mutex<Slot>,
    signal: watch::Sender<InformationState>,
}

/// Shared handle on one unit of information. Cloning shares the core.
#[derive(Clone)]
pub struct Information {
    core: Arc<Core>,
}

impl Information {
    pub fn new(origin: Option<BusPath>) -> Self {
        let (signal, _) = watch::channel(InformationState::New);
        Self {
            core: Arc::new(Core {
                id: InformationId::new(),
                created_at: Utc::now(),
                origin,
                slot: Mutex::new(Slot {
                    state: InformationState::New,
                    cause: None,
                    pending: None,
                    observers: Vec::new(),
                }),
                signal,
            }),
        }
    }

    pub fn id(&self) -> &InformationId {
        &self.core.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.core.created_at
    }

    pub fn origin(&self) -> Option<&BusPath> {
        self.core.origin.as_ref()
    }

    pub fn state(&self) -> InformationState {
        self.core.slot.lock().state
    }

    pub fn cause(&self) -> Option<Error> {
        self.core.slot.lock().cause.clone()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        let slot = self.core.slot.lock();
        outcome_of(&slot)
    }

    pub fn same_as(&self, other: &Information) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Move to a non-terminal state.
    pub(crate) fn advance(&self, to: InformationState) -> Result<()> {
        debug_assert!(!to.is_terminal());
        {
            let mut slot = self.core.slot.lock();
            slot.state.check_transition(to)?;
            slot.state = to;
        }
        self.signal(to);
        Ok(())
    }

    /// NEW → ENQUEUED, arming one pending delivery per recipient.
    pub(crate) fn enqueue(&self, recipients: &[NodeId]) -> Result<()> {
        {
            let mut slot = self.core.slot.lock();
            slot.state.check_transition(InformationState::Enqueued)?;
            slot.state = InformationState::Enqueued;
            slot.pending = Some(recipients.to_vec());
        }
        self.signal(InformationState::Enqueued);
        Ok(())
    }

    /// Acknowledge delivery to one recipient.
    ///
    /// Legal while ENQUEUED or DISPATCHED, and after a terminal outcome (a
    /// handler may complete a request before the queue acknowledges it). The
    /// last acknowledgement moves a non-terminal message to DELIVERED.
    /// Returns the number of deliveries still outstanding.
    pub(crate) fn deliver(&self, recipient: &NodeId) -> Result<usize> {
        let (remaining, flipped) = {
            let mut slot = self.core.slot.lock();
            let state = slot.state;
            if !matches!(
                state,
                InformationState::Enqueued | InformationState::Dispatched
            ) && !state.is_terminal()
            {
                return Err(Error::state_violation(format!(
                    "cannot deliver {} in state {}",
                    self.core.id, state
                )));
            }
            let pending = slot.pending.as_mut().ok_or_else(|| {
                Error::state_violation(format!("{} was never enqueued", self.core.id))
            })?;
            let position = pending.iter().position(|id| id == recipient).ok_or_else(|| {
                Error::state_violation(format!(
                    "{} is not awaiting delivery to {}",
                    self.core.id, recipient
                ))
            })?;
            pending.swap_remove(position);
            let remaining = pending.len();
            let flipped = remaining == 0 && !state.is_terminal();
            if flipped {
                slot.state = InformationState::Delivered;
            }
            (remaining, flipped)
        };
        if flipped {
            self.signal(InformationState::Delivered);
        }
        Ok(remaining)
    }

    pub(crate) fn remaining_deliveries(&self) -> usize {
        self.core
            .slot
            .lock()
            .pending
            .as_ref()
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Set the terminal outcome. A second completion is rejected and the first
    /// outcome kept.
    pub(crate) fn complete(&self, outcome: Outcome) -> Result<()> {
        let observers = {
            let mut slot = self.core.slot.lock();
            if slot.state.is_terminal() {
                return Err(Error::state_violation(format!(
                    "{} already completed as {}, rejecting {}",
                    self.core.id,
                    slot.state,
                    outcome.state()
                )));
            }
            slot.state = outcome.state();
            if let Outcome::Failed(cause) = &outcome {
                slot.cause = Some(cause.clone());
            }
            std::mem::take(&mut slot.observers)
        };
        for observer in observers {
            observer.notify(&outcome);
        }
        // Waiters wake after observers ran.
        self.signal(outcome.state());
        Ok(())
    }

    /// Publish `to` to waiters unless the signal is already at or past it.
    fn signal(&self, to: InformationState) {
        self.core.signal.send_if_modified(|current| {
            if current.can_transition_to(to) {
                *current = to;
                true
            } else {
                false
            }
        });
    }

    /// Complete unless already terminal. Returns whether this call won.
    pub(crate) fn try_complete(&self, outcome: Outcome) -> bool {
        self.complete(outcome).is_ok()
    }

    /// Register an observer; runs it immediately if already terminal.
    pub(crate) fn observe(&self, observer: Observer) {
        let ready = {
            let mut slot = self.core.slot.lock();
            match outcome_of(&slot) {
                Some(outcome) => Some((observer, outcome)),
                None => {
                    slot.observers.push(observer);
                    None
                }
            }
        };
        if let Some((observer, outcome)) = ready {
            observer.notify(&outcome);
        }
    }

    /// Wait until a terminal state is reached.
    pub(crate) async fn completed(&self) -> Outcome {
        let mut rx = self.core.signal.subscribe();
        // The sender lives in the core we hold, so the channel cannot close.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.outcome()
            .unwrap_or_else(|| Outcome::Failed(Error::internal("completion signal without outcome")))
    }
}

fn outcome_of(slot: &Slot) -> Option<Outcome> {
    match slot.state {
        InformationState::Successful => Some(Outcome::Successful),
        InformationState::Cancelled => Some(Outcome::Cancelled),
        InformationState::Failed => Some(Outcome::Failed(
            slot.cause
                .clone()
                .unwrap_or_else(|| Error::failed("unknown cause")),
        )),
        _ => None,
    }
}

impl fmt::Debug for Information {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Information")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .field("created_at", &self.core.created_at)
            .finish()
    }
}
