use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("delay of {requested:?} exceeds the channel maximum of {max:?}")]
    DelayOutOfRange { requested: Duration, max: Duration },

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("queue is closed")]
    Closed,

    #[cfg(feature = "amqp")]
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
