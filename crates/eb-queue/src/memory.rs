use async_trait::async_trait;
use eb_common::AckNack;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};
use crate::{DelayedPublisher, QueueConsumer, ReceivedMessage};

const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Rejected payloads kept for inspection; the oldest are dropped first
pub const DEAD_LETTER_CAPACITY: usize = 1024;

struct Scheduled {
    ready_at: Instant,
    seq: u64,
    payload: Vec<u8>,
    redelivered: bool,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.seq).cmp(&(other.ready_at, other.seq))
    }
}

#[derive(Default)]
struct State {
    scheduled: BinaryHeap<Reverse<Scheduled>>,
    in_flight: HashMap<u64, Vec<u8>>,
    dead_letters: VecDeque<Vec<u8>>,
    next_seq: u64,
    next_tag: u64,
    published: u64,
    closed: bool,
}

impl State {
    fn schedule(&mut self, payload: Vec<u8>, ready_at: Instant, redelivered: bool) {
        self.next_seq += 1;
        self.scheduled.push(Reverse(Scheduled {
            ready_at,
            seq: self.next_seq,
            payload,
            redelivered,
        }));
    }
}

/// Process-local delayed queue with at-least-once semantics.
///
/// Messages stay invisible until their delay elapses. A `Nack` makes the
/// delivery visible again after `redelivery_delay` with `redelivered` set,
/// a `Reject` moves it to a dead-letter list bounded by
/// [`DEAD_LETTER_CAPACITY`]. Uses tokio time, so tests can drive it with a
/// paused clock.
pub struct InMemoryDelayedQueue {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    redelivery_delay: Duration,
}

impl InMemoryDelayedQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_redelivery_delay(name, DEFAULT_REDELIVERY_DELAY)
    }

    pub fn with_redelivery_delay(name: impl Into<String>, redelivery_delay: Duration) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            redelivery_delay,
        }
    }

    /// Messages waiting for their delay or for redelivery
    pub fn scheduled_len(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    /// Delivered but not yet settled
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Most recent rejected payloads, oldest first
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state.lock().dead_letters.iter().cloned().collect()
    }

    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }
}

#[async_trait]
impl DelayedPublisher for InMemoryDelayedQueue {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn publish_delayed(&self, payload: Vec<u8>, delay: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.published += 1;
            state.schedule(payload, Instant::now() + delay, false);
        }
        let delay_ms = delay.as_millis() as u64;
        debug!(queue = %self.name, delay_ms, "Scheduled delayed message");
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for InMemoryDelayedQueue {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>> {
        loop {
            // Registered before inspecting state so a concurrent publish cannot be missed
            let notified = self.notify.notified();

            let next_ready = {
                let mut state = self.state.lock();
                if state.closed {
                    return Ok(None);
                }

                let now = Instant::now();
                let due = state
                    .scheduled
                    .peek()
                    .is_some_and(|Reverse(head)| head.ready_at <= now);

                if due {
                    if let Some(Reverse(message)) = state.scheduled.pop() {
                        state.next_tag += 1;
                        let delivery_tag = state.next_tag;
                        state.in_flight.insert(delivery_tag, message.payload.clone());
                        return Ok(Some(ReceivedMessage {
                            payload: message.payload,
                            delivery_tag,
                            redelivered: message.redelivered,
                        }));
                    }
                }

                state.scheduled.peek().map(|Reverse(head)| head.ready_at)
            };

            match next_ready {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn settle(&self, delivery_tag: u64, outcome: AckNack) -> Result<()> {
        let mut state = self.state.lock();
        let payload = state
            .in_flight
            .remove(&delivery_tag)
            .ok_or(QueueError::UnknownDelivery(delivery_tag))?;

        match outcome {
            AckNack::Ack => {}
            AckNack::Nack => {
                let ready_at = Instant::now() + self.redelivery_delay;
                state.schedule(payload, ready_at, true);
                drop(state);
                self.notify.notify_waiters();
            }
            AckNack::Reject => {
                if state.dead_letters.len() == DEAD_LETTER_CAPACITY {
                    state.dead_letters.pop_front();
                    warn!(queue = %self.name, "Dead-letter list full, dropping oldest entry");
                }
                state.dead_letters.push_back(payload);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        debug!(queue = %self.name, "Closed in-memory queue");
        Ok(())
    }
}
