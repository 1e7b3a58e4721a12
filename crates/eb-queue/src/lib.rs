//! Delayed-delivery channel used to schedule registration expirations.
//!
//! Delivery is at-least-once: a message may be redelivered after a `Nack`
//! or a consumer crash, so consumers must be idempotent.

use async_trait::async_trait;
use eb_common::AckNack;
use std::time::Duration;

pub mod error;
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use error::{QueueError, Result};
pub use memory::InMemoryDelayedQueue;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpDelayedQueue, AmqpSettings};

/// A message handed to a consumer, pending settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    /// True when the channel has delivered this message before
    pub redelivered: bool,
}

#[async_trait]
pub trait DelayedPublisher: Send + Sync {
    fn identifier(&self) -> &str;

    /// Longest delay a single publish can carry, `None` when unbounded.
    fn max_delay(&self) -> Option<Duration> {
        None
    }

    /// Publish `payload` so that no consumer sees it before `delay` elapses.
    ///
    /// Fails with [`QueueError::DelayOutOfRange`] when `delay` exceeds
    /// [`max_delay`](Self::max_delay).
    async fn publish_delayed(&self, payload: Vec<u8>, delay: Duration) -> Result<()>;
}

#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn identifier(&self) -> &str;

    /// Wait for the next deliverable message.
    ///
    /// Returns `None` once the consumer is closed. Dropping the returned
    /// future before it resolves loses no message.
    async fn receive(&self) -> Result<Option<ReceivedMessage>>;

    /// Settle a delivery: `Ack` removes it, `Nack` requeues it, `Reject` drops it.
    async fn settle(&self, delivery_tag: u64, outcome: AckNack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
