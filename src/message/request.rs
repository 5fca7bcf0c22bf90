//! Requests: information with a terminal outcome, waiters and continuations.

use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::information::{Information, Observer};
use super::state::{InformationState, Outcome};
use crate::address::BusPath;
use crate::types::{Error, InformationId, Result};

/// A unit of asynchronous work with a completion state.
///
/// Cloning shares the underlying request.
#[derive(Clone)]
pub struct Request {
    info: Information,
}

impl Request {
    pub fn new() -> Self {
        Self {
            info: Information::new(None),
        }
    }

    pub fn from_origin(origin: BusPath) -> Self {
        Self {
            info: Information::new(Some(origin)),
        }
    }

    /// An already successful request.
    pub fn succeeded() -> Self {
        let request = Self::new();
        let _ = request.info.complete(Outcome::Successful);
        request
    }

    /// An already failed request.
    pub fn failed(cause: Error) -> Self {
        let request = Self::new();
        let _ = request.info.complete(Outcome::Failed(cause));
        request
    }

    pub fn information(&self) -> &Information {
        &self.info
    }

    pub fn id(&self) -> &InformationId {
        self.info.id()
    }

    pub fn origin(&self) -> Option<&BusPath> {
        self.info.origin()
    }

    pub fn state(&self) -> InformationState {
        self.info.state()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.state() == InformationState::Successful
    }

    pub fn is_failed(&self) -> bool {
        self.state() == InformationState::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == InformationState::Cancelled
    }

    pub fn cause(&self) -> Option<Error> {
        self.info.cause()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.info.outcome()
    }

    // =========================================================================
    // Completion
    // =========================================================================

    pub fn succeed(&self) -> Result<()> {
        self.complete(Outcome::Successful)
    }

    pub fn fail(&self, cause: Error) -> Result<()> {
        self.complete(Outcome::Failed(cause))
    }

    pub fn cancel(&self) -> Result<()> {
        self.complete(Outcome::Cancelled)
    }

    /// Set the terminal outcome. Completing twice is a caller error: the first
    /// outcome stands and the second attempt is reported.
    pub fn complete(&self, outcome: Outcome) -> Result<()> {
        self.info.complete(outcome).map_err(|err| {
            tracing::warn!(id = %self.id(), "double completion: {}", err);
            err
        })
    }

    /// Complete unless someone else already did. For racing completers
    /// (fan-out, timeouts, teardown) where losing is expected.
    pub fn try_complete(&self, outcome: Outcome) -> bool {
        self.info.try_complete(outcome)
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Wait for completion.
    pub async fn standby(&self) -> Outcome {
        self.info.completed().await
    }

    /// Wait for completion, giving up after `timeout`.
    pub async fn standby_timeout(&self, timeout: Duration) -> Result<Outcome> {
        tokio::time::timeout(timeout, self.info.completed())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "request {} not complete after {:?}",
                    self.id(),
                    timeout
                ))
            })
    }

    /// Wait for completion unless `interrupt` fires first.
    pub async fn standby_interruptible(&self, interrupt: &CancellationToken) -> Result<Outcome> {
        tokio::select! {
            biased;
            outcome = self.info.completed() => Ok(outcome),
            _ = interrupt.cancelled() => Err(Error::interrupted(format!(
                "standby on {} interrupted",
                self.id()
            ))),
        }
    }

    // =========================================================================
    // Observers and continuations
    // =========================================================================

    /// Drive `other` to this request's outcome, immediately if already done.
    pub fn report_completion_to(&self, other: &Request) {
        self.info.observe(Observer::Mirror(other.info.clone()));
    }

    /// Run `callback` on completion, immediately if already done.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.info.observe(Observer::Callback(Box::new(callback)));
    }

    /// Sequential composition: the returned request succeeds once this request
    /// and then the continuation's request have both succeeded. The
    /// continuation only runs after this request succeeds.
    pub fn and_then<F>(&self, continuation: F) -> Request
    where
        F: FnOnce() -> Request + Send + 'static,
    {
        let composite = Request::new();
        let target = composite.clone();
        self.on_completion(move |outcome| match outcome {
            Outcome::Successful => continuation().report_completion_to(&target),
            other => {
                target.try_complete(other.clone());
            }
        });
        composite
    }

    /// Fallback: the returned request succeeds if this one does; otherwise the
    /// fallback runs and its outcome is mirrored.
    pub fn or_else<F>(&self, fallback: F) -> Request
    where
        F: FnOnce() -> Request + Send + 'static,
    {
        let composite = Request::new();
        let target = composite.clone();
        self.on_completion(move |outcome| match outcome {
            Outcome::Successful => {
                target.try_complete(Outcome::Successful);
            }
            _ => fallback().report_completion_to(&target),
        });
        composite
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}
