use eb_common::ExpirationInstruction;
use eb_queue::{DelayedPublisher, QueueError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("failed to encode instruction: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish instruction: {0}")]
    Publish(#[from] QueueError),
}

/// Hands expiration instructions to the delayed-delivery channel.
#[derive(Clone)]
pub struct ExpirationScheduler {
    publisher: Arc<dyn DelayedPublisher>,
}

impl ExpirationScheduler {
    pub fn new(publisher: Arc<dyn DelayedPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish `instruction` to arrive after `delay`.
    ///
    /// A delay longer than the channel accepts is shortened to its maximum.
    /// The instruction still carries the real deadline and the worker
    /// re-arms it on early arrival.
    pub async fn schedule(
        &self,
        instruction: &ExpirationInstruction,
        delay: Duration,
    ) -> Result<(), ScheduleError> {
        let hop = hop_delay(delay, self.publisher.max_delay());
        let payload = instruction.encode()?;
        self.publisher.publish_delayed(payload, hop).await?;

        debug!(
            registration_id = instruction.registration_id,
            event_id = instruction.event_id,
            expire_at = %instruction.expire_at,
            delay_secs = hop.as_secs(),
            partial = hop < delay,
            channel = self.publisher.identifier(),
            "Scheduled expiration"
        );
        Ok(())
    }
}

fn hop_delay(delay: Duration, max: Option<Duration>) -> Duration {
    match max {
        Some(max) => delay.min(max),
        None => delay,
    }
}
