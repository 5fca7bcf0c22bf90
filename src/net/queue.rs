//! Bounded outbound frame queues.
//!
//! Producers wait at most `max_wait` for room. A push that cannot complete in
//! time means the peer is not draining what we send; the connection is then
//! stale.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::{Error, Result};

/// Sending half of an outbound queue. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    label: &'static str,
    tx: mpsc::Sender<Vec<u8>>,
    max_wait: Duration,
}

impl FrameQueue {
    pub fn bounded(
        label: &'static str,
        capacity: usize,
        max_wait: Duration,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                label,
                tx,
                max_wait,
            },
            rx,
        )
    }

    /// Push one encoded frame, failing with `StaleConnection` when no room
    /// frees up within the wait or the receiving side is gone.
    pub async fn push(&self, frame: Vec<u8>) -> Result<()> {
        match self.tx.send_timeout(frame, self.max_wait).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(Error::stale(format!(
                "{} queue full for {:?}",
                self.label, self.max_wait
            ))),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(Error::stale(format!("{} queue closed", self.label)))
            }
        }
    }

    /// Frames waiting to be written.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_within_capacity() {
        let (queue, mut rx) = FrameQueue::bounded("response", 2, Duration::from_millis(10));
        queue.push(vec![1]).await.unwrap();
        queue.push(vec![2]).await.unwrap();
        assert_eq!(queue.backlog(), 2);
        assert_eq!(rx.recv().await, Some(vec![1]));
        assert_eq!(queue.backlog(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_goes_stale() {
        let (queue, _rx) = FrameQueue::bounded("response", 128, Duration::from_millis(20));
        for i in 0..128u8 {
            queue.push(vec![i]).await.unwrap();
        }
        let err = queue.push(vec![0]).await.unwrap_err();
        assert!(matches!(err, Error::StaleConnection(_)));
    }

    #[tokio::test]
    async fn test_closed_queue_goes_stale() {
        let (queue, rx) = FrameQueue::bounded("request", 1, Duration::from_millis(20));
        drop(rx);
        assert!(matches!(
            queue.push(vec![0]).await,
            Err(Error::StaleConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_waiting_push_completes_when_drained() {
        let (queue, mut rx) = FrameQueue::bounded("response", 1, Duration::from_secs(1));
        queue.push(vec![1]).await.unwrap();
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            rx.recv().await
        });
        queue.push(vec![2]).await.unwrap();
        assert_eq!(drain.await.unwrap(), Some(vec![1]));
    }
}
