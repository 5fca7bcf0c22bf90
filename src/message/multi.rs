//! Parallel fan-out over several requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::request::Request;
use super::state::Outcome;

/// Composite over a set of constituent requests.
#[derive(Debug)]
pub struct MultiRequest;

impl MultiRequest {
    /// Succeeds once every constituent succeeds. The first failure fails the
    /// composite with that cause; the first cancellation cancels it. An empty
    /// set succeeds immediately.
    pub fn all<I>(requests: I) -> Request
    where
        I: IntoIterator<Item = Request>,
    {
        let requests: Vec<Request> = requests.into_iter().collect();
        let composite = Request::new();
        if requests.is_empty() {
            composite.try_complete(Outcome::Successful);
            return composite;
        }

        let remaining = Arc::new(AtomicUsize::new(requests.len()));
        for request in requests {
            let remaining = remaining.clone();
            let composite = composite.clone();
            request.on_completion(move |outcome| match outcome {
                Outcome::Successful => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        composite.try_complete(Outcome::Successful);
                    }
                }
                other => {
                    if composite.try_complete(other.clone()) {
                        tracing::debug!(id = %composite.id(), "multi-request short-circuited");
                    }
                }
            });
        }
        composite
    }
}
