//! Expiration Worker - consumes delayed instructions and releases unconfirmed seats
//!
//! - Bounded concurrency via a semaphore
//! - Settlement per message: Ack, Nack (redeliver) or Reject (drop)
//! - Instructions arriving before their deadline are re-armed, never applied
//! - Graceful shutdown: stop receiving, wait for in-flight handlers, close the consumer

use eb_common::{AckNack, ExpirationInstruction, RegistrationStatus};
use eb_queue::QueueConsumer;
use eb_store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::names;
use crate::notifier::{notify_best_effort, Notification, Notifier};
use crate::scheduler::ExpirationScheduler;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Arrivals this close to the deadline count as due
const EARLY_DELIVERY_TOLERANCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum messages handled at once
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

pub struct ExpirationWorker {
    store: Arc<dyn Store>,
    scheduler: ExpirationScheduler,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ExpirationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: ExpirationScheduler,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock that decides whether an instruction is due.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process one delivery and decide its settlement.
    pub async fn handle(&self, payload: &[u8]) -> AckNack {
        let instruction = match ExpirationInstruction::decode(payload) {
            Ok(instruction) => instruction,
            Err(e) => {
                record("rejected");
                error!(
                    error = %e,
                    payload_len = payload.len(),
                    "Undecodable expiration instruction, dropping"
                );
                return AckNack::Reject;
            }
        };
        let registration_id = instruction.registration_id;

        if let Ok(remaining) = (instruction.expire_at - self.clock.now()).to_std() {
            if remaining > EARLY_DELIVERY_TOLERANCE {
                return self.rearm(&instruction, remaining).await;
            }
        }

        match self.store.cancel_if_pending(registration_id).await {
            Ok(true) => {
                record("canceled");
                info!(
                    registration_id,
                    event_id = instruction.event_id,
                    expire_at = %instruction.expire_at,
                    "Registration expired"
                );
                self.notify_canceled(&instruction).await;
                AckNack::Ack
            }
            Ok(false) => {
                record("noop");
                debug!(registration_id, "Registration already settled, nothing to expire");
                AckNack::Ack
            }
            Err(StoreError::RegistrationNotFound(_)) => {
                record("rejected");
                error!(registration_id, "Expiration for unknown registration, dropping");
                AckNack::Reject
            }
            Err(e) => {
                record("requeued");
                warn!(
                    registration_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Cancellation failed, requesting redelivery"
                );
                AckNack::Nack
            }
        }
    }

    /// Publish the instruction again for the time left before its deadline.
    async fn rearm(&self, instruction: &ExpirationInstruction, remaining: Duration) -> AckNack {
        match self.scheduler.schedule(instruction, remaining).await {
            Ok(()) => {
                record("rearmed");
                debug!(
                    registration_id = instruction.registration_id,
                    expire_at = %instruction.expire_at,
                    remaining_secs = remaining.as_secs(),
                    "Expiration arrived early, re-armed"
                );
                AckNack::Ack
            }
            Err(e) => {
                record("requeued");
                warn!(
                    registration_id = instruction.registration_id,
                    error = %e,
                    "Cannot re-arm early expiration, requesting redelivery"
                );
                AckNack::Nack
            }
        }
    }

    /// Failures here are logged only: the cancellation already committed.
    async fn notify_canceled(&self, instruction: &ExpirationInstruction) {
        let registration_id = instruction.registration_id;
        let registration = match self.store.get_registration(registration_id).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(registration_id, error = %e, "Cannot load registration for notification");
                return;
            }
        };
        let event = match self.store.get_event(registration.event_id).await {
            Ok(event) => event,
            Err(e) => {
                let event_id = registration.event_id;
                warn!(event_id, error = %e, "Cannot load event for notification");
                return;
            }
        };

        let notification = Notification {
            event_name: event.name,
            status: RegistrationStatus::Canceled,
            recipient: registration.email,
            timeout_minutes: event.payment_timeout_minutes,
        };
        notify_best_effort(self.notifier.as_ref(), &notification).await;
    }

    /// Spawn the consume loop.
    pub fn start(
        self: Arc<Self>,
        consumer: Arc<dyn QueueConsumer>,
        settings: WorkerSettings,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let concurrency = settings.concurrency.max(1);
        let join = tokio::spawn(run(self, consumer, concurrency, shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }
}

fn record(outcome: &'static str) {
    metrics::counter!(names::EXPIRATIONS_TOTAL, "outcome" => outcome).increment(1);
}

async fn run(
    worker: Arc<ExpirationWorker>,
    consumer: Arc<dyn QueueConsumer>,
    concurrency: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    info!(queue = consumer.identifier(), concurrency, "Expiration worker started");

    loop {
        let permit = tokio::select! {
            _ = shutdown_rx.recv() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = consumer.receive() => received,
        };

        match received {
            Ok(Some(message)) => {
                let worker = worker.clone();
                let consumer = consumer.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let delivery_tag = message.delivery_tag;
                    if message.redelivered {
                        debug!(delivery_tag, "Handling redelivered expiration");
                    }
                    let outcome = worker.handle(&message.payload).await;
                    if let Err(e) = consumer.settle(delivery_tag, outcome).await {
                        error!(delivery_tag, error = %e, "Failed to settle delivery");
                    }
                });
            }
            Ok(None) => {
                info!("Consumer closed, stopping expiration worker");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to receive from expiration queue");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                }
            }
        }
    }

    // Every handler holds a permit until it has settled its delivery
    let in_flight = concurrency - semaphore.available_permits();
    if in_flight > 0 {
        info!(in_flight, "Waiting for in-flight expirations");
    }
    if let Ok(permits) = u32::try_from(concurrency) {
        let _ = semaphore.acquire_many(permits).await;
    }

    if let Err(e) = consumer.close().await {
        warn!(error = %e, "Failed to close expiration consumer");
    }
    info!("Expiration worker stopped");
}

/// Handle to a running worker
pub struct WorkerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop receiving, wait for in-flight messages to settle, close the consumer.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            error!(error = %e, "Expiration worker task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
