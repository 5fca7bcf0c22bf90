//! The message queue: enqueues envelopes and dispatches them to recipients on
//! a dedicated task.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::letter::Envelope;
use super::state::Outcome;
use crate::types::{Error, Result};

/// Statistics about queue usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub deliveries: u64,
    pub handler_failures: u64,
}

/// Handle on the bus message queue. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    stats: Arc<Mutex<QueueStats>>,
}

impl MessageQueue {
    /// Create the queue and spawn its dispatcher on the current runtime.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(QueueStats::default()));
        let handle = tokio::spawn(dispatch_loop(rx, stats.clone()));
        (Self { tx, stats }, handle)
    }

    /// NEW → ENQUEUED, then hand the envelope to the dispatcher.
    ///
    /// An envelope without recipients is undeliverable: it is rejected with
    /// `NotFound` and its carried request fails with the same error.
    pub fn enqueue(&self, envelope: Envelope) -> Result<()> {
        if envelope.recipients().is_empty() {
            let err = Error::not_found(format!(
                "undeliverable {}: no recipients for {}",
                envelope.message().id(),
                envelope.message_type()
            ));
            if let Some(request) = envelope.letter().carried_request() {
                request.try_complete(Outcome::Failed(err.clone()));
            }
            tracing::debug!("{}", err);
            return Err(err);
        }
        envelope.message().enqueue()?;
        let message_type = envelope.message_type();
        let id = envelope.message().id().clone();
        if self.tx.send(envelope).is_err() {
            let err = Error::internal(format!("message queue closed, dropping {}", id));
            tracing::error!("{}", err);
            return Err(err);
        }
        self.stats.lock().enqueued += 1;
        tracing::debug!(%id, %message_type, "enqueued");
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.lock().clone()
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Envelope>, stats: Arc<Mutex<QueueStats>>) {
    while let Some(envelope) = rx.recv().await {
        dispatch(&envelope, &stats);
    }
    tracing::debug!("message queue dispatcher stopped");
}

fn dispatch(envelope: &Envelope, stats: &Mutex<QueueStats>) {
    let message = envelope.message();
    let carried = envelope.letter().carried_request();

    // A request cancelled while queued is not delivered.
    if carried.map(|r| r.is_done()).unwrap_or(false) {
        tracing::debug!(id = %message.id(), state = %message.state(), "skipping completed request");
        return;
    }
    if let Err(err) = message.dispatch() {
        tracing::warn!(id = %message.id(), "dispatch rejected: {}", err);
        return;
    }
    stats.lock().dispatched += 1;

    for recipient in envelope.recipients() {
        if let Err(err) = recipient.receive(envelope) {
            stats.lock().handler_failures += 1;
            tracing::debug!(
                id = %message.id(),
                recipient = %recipient.recipient_id(),
                "handler failed: {}",
                err
            );
            if let Some(request) = carried {
                request.try_complete(Outcome::Failed(err));
            }
        }
        match message.deliver(&recipient.recipient_id()) {
            Ok(_) => stats.lock().deliveries += 1,
            Err(err) => tracing::warn!(id = %message.id(), "delivery rejected: {}", err),
        }
    }
}
