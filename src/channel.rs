//! Work channel between the splitter and the worker pool.
//!
//! The channel is at-least-once: a delivery that fails is put back with an
//! incremented attempt counter, so a worker may see the same chunk more than
//! once. [`WorkChannel`] is the publishing seam; [`InProcessChannel`] is the
//! `tokio::sync::mpsc` implementation used by the single-process server.
//!
//! The in-process queue is unbounded: publishing never waits on consumers,
//! so a task is accepted as soon as its records are written. The chunk
//! records, not the queue, are the durable state.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::domain::WorkMessage;
use crate::error::BulkError;

/// Errors raised while publishing or redelivering work.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Every receiver is gone; nothing will consume the message.
    #[error("work channel closed")]
    Closed,
}

impl From<ChannelError> for BulkError {
    fn from(err: ChannelError) -> Self {
        BulkError::upstream("work channel", err.to_string())
    }
}

/// A message in flight, with the number of times it has been handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The work to do.
    pub message: WorkMessage,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// Publishing side of the work channel.
#[async_trait]
pub trait WorkChannel: Send + Sync {
    /// Publishes one "process this chunk" message.
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError>;
}

/// Unbounded in-process channel.
///
/// Cheap to clone; clones share the queue.
///
/// # Examples
///
/// ```
/// use bulkcert::channel::{InProcessChannel, WorkChannel};
/// use bulkcert::domain::{CertInfo, WorkMessage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (channel, receiver) = InProcessChannel::new();
/// let message = WorkMessage {
///     task_id: "t".to_string(),
///     chunk_id: 1,
///     quantity: 1,
///     offset: 0,
///     cert_info: CertInfo::default(),
///     ca_alias: "default".to_string(),
/// };
/// channel.publish(&message).await.unwrap();
/// let delivery = receiver.recv().await.unwrap();
/// assert_eq!(delivery.attempt, 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InProcessChannel {
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Consuming side of an [`InProcessChannel`], shared by every worker.
#[derive(Debug, Clone)]
pub struct DeliveryReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl InProcessChannel {
    /// Creates a channel and the receiver shared by its consumers.
    pub fn new() -> (Self, DeliveryReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            DeliveryReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Puts a failed delivery back on the queue with its attempt incremented.
    pub fn redeliver(&self, delivery: Delivery) -> Result<(), ChannelError> {
        let next = Delivery {
            attempt: delivery.attempt.saturating_add(1),
            message: delivery.message,
        };
        self.sender.send(next).map_err(|_| ChannelError::Closed)
    }
}

#[async_trait]
impl WorkChannel for InProcessChannel {
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError> {
        self.sender
            .send(Delivery {
                message: message.clone(),
                attempt: 1,
            })
            .map_err(|_| ChannelError::Closed)?;
        tracing::debug!(
            task_id = %message.task_id,
            chunk_id = message.chunk_id,
            "work message published"
        );
        Ok(())
    }
}

impl DeliveryReceiver {
    /// Waits for the next delivery. `None` once every sender is dropped and
    /// the queue is drained.
    pub async fn recv(&self) -> Option<Delivery> {
        self.inner.lock().await.recv().await
    }

    /// Takes a queued delivery without waiting. `None` if the queue is empty
    /// or another consumer is currently receiving.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CertInfo;

    fn message(chunk_id: u32) -> WorkMessage {
        WorkMessage {
            task_id: "t".to_string(),
            chunk_id,
            quantity: 1,
            offset: 0,
            cert_info: CertInfo::default(),
            ca_alias: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_preserves_order() {
        let (channel, receiver) = InProcessChannel::new();
        channel.publish(&message(1)).await.unwrap();
        channel.publish(&message(2)).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap().message.chunk_id, 1);
        assert_eq!(receiver.recv().await.unwrap().message.chunk_id, 2);
    }

    #[tokio::test]
    async fn redeliver_increments_attempt() {
        let (channel, receiver) = InProcessChannel::new();
        channel.publish(&message(1)).await.unwrap();
        let first = receiver.recv().await.unwrap();
        channel.redeliver(first).unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.message, message(1));
    }

    #[tokio::test]
    async fn publish_after_receiver_dropped_is_closed() {
        let (channel, receiver) = InProcessChannel::new();
        drop(receiver);
        let err = channel.publish(&message(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
        assert_eq!(BulkError::from(err).status_code(), 502);
    }

    #[tokio::test]
    async fn publish_never_waits_for_consumers() {
        let (channel, receiver) = InProcessChannel::new();
        let published = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            for chunk_id in 1..=5000 {
                channel.publish(&message(chunk_id)).await.unwrap();
            }
        })
        .await;
        assert!(published.is_ok());
        assert_eq!(receiver.try_recv().unwrap().message.chunk_id, 1);
    }

    #[tokio::test]
    async fn try_recv_does_not_wait() {
        let (channel, receiver) = InProcessChannel::new();
        assert!(receiver.try_recv().is_none());
        channel.publish(&message(3)).await.unwrap();
        assert_eq!(receiver.try_recv().unwrap().message.chunk_id, 3);
    }

    #[tokio::test]
    async fn recv_ends_when_senders_dropped() {
        let (channel, receiver) = InProcessChannel::new();
        channel.publish(&message(1)).await.unwrap();
        drop(channel);
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }
}
