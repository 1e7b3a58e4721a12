#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eb_booking::{
    BookingService, Clock, ConfirmationService, EventCatalog, ExpirationScheduler,
    ExpirationWorker, Notification, NotificationError, Notifier, RetryPolicy,
};
use eb_common::{
    Admission, Attendee, Event, EventId, NewEvent, Registration, RegistrationId, RegistrationStatus,
};
use eb_queue::{DelayedPublisher, InMemoryDelayedQueue, QueueError};
use eb_store::{EventStore, MemoryStore, RegistrationStore, Store, StoreError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Captures notifications instead of sending them
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, status: RegistrationStatus) -> usize {
        self.sent.lock().iter().filter(|n| n.status == status).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("smtp unreachable".into()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Wall clock driven by tokio time, so paused-clock tests move deadlines too
pub struct TokioClock {
    wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.wall + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

/// Notifier that takes a while to deliver
pub struct SlowNotifier {
    pub delay: Duration,
    pub delivered: AtomicU32,
}

impl SlowNotifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            delivered: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn send(&self, _notification: &Notification) -> Result<(), NotificationError> {
        tokio::time::sleep(self.delay).await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Forwards to an in-memory queue but accepts at most one hour per message
pub struct HourCappedPublisher(pub Arc<InMemoryDelayedQueue>);

#[async_trait]
impl DelayedPublisher for HourCappedPublisher {
    fn identifier(&self) -> &str {
        "hour-capped"
    }

    fn max_delay(&self) -> Option<Duration> {
        Some(Duration::from_secs(3600))
    }

    async fn publish_delayed(&self, payload: Vec<u8>, delay: Duration) -> eb_queue::Result<()> {
        if delay > Duration::from_secs(3600) {
            return Err(QueueError::DelayOutOfRange {
                requested: delay,
                max: Duration::from_secs(3600),
            });
        }
        self.0.publish_delayed(payload, delay).await
    }
}

/// Publisher whose broker is always down
pub struct FailingPublisher;

#[async_trait]
impl DelayedPublisher for FailingPublisher {
    fn identifier(&self) -> &str {
        "failing"
    }

    async fn publish_delayed(&self, _payload: Vec<u8>, _delay: Duration) -> eb_queue::Result<()> {
        Err(QueueError::Publish("broker unreachable".into()))
    }
}

/// MemoryStore that fails a configurable number of upcoming writes
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    admit_failures: AtomicU32,
    cancel_failures: AtomicU32,
}

impl FlakyStore {
    pub fn fail_admits(&self, n: u32) {
        self.admit_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, n: u32) {
        self.cancel_failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> Result<(), StoreError> {
        let taken = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            Err(StoreError::Unavailable("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn create_event(&self, event: &NewEvent) -> eb_store::Result<Event> {
        self.inner.create_event(event).await
    }

    async fn get_event(&self, id: EventId) -> eb_store::Result<Event> {
        self.inner.get_event(id).await
    }

    async fn list_events(&self) -> eb_store::Result<Vec<Event>> {
        self.inner.list_events().await
    }
}

#[async_trait]
impl RegistrationStore for FlakyStore {
    async fn admit_booking(
        &self,
        event_id: EventId,
        attendee: &Attendee,
    ) -> eb_store::Result<Admission> {
        Self::take_failure(&self.admit_failures)?;
        self.inner.admit_booking(event_id, attendee).await
    }

    async fn get_registration(&self, id: RegistrationId) -> eb_store::Result<Registration> {
        self.inner.get_registration(id).await
    }

    async fn confirm(&self, id: RegistrationId) -> eb_store::Result<Registration> {
        self.inner.confirm(id).await
    }

    async fn cancel_if_pending(&self, id: RegistrationId) -> eb_store::Result<bool> {
        Self::take_failure(&self.cancel_failures)?;
        self.inner.cancel_if_pending(id).await
    }

    async fn count_active(&self, event_id: EventId) -> eb_store::Result<i64> {
        self.inner.count_active(event_id).await
    }

    async fn list_active(&self, event_id: EventId) -> eb_store::Result<Vec<Registration>> {
        self.inner.list_active(event_id).await
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn ping(&self) -> eb_store::Result<()> {
        Ok(())
    }
}

/// Services wired against in-memory collaborators
pub struct Harness<S> {
    pub store: Arc<S>,
    pub queue: Arc<InMemoryDelayedQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<TokioClock>,
    pub booking: Arc<BookingService>,
    pub confirmation: Arc<ConfirmationService>,
    pub catalog: Arc<EventCatalog>,
    pub worker: Arc<ExpirationWorker>,
}

pub fn harness() -> Harness<MemoryStore> {
    harness_with(Arc::new(MemoryStore::new()))
}

pub fn harness_with<S: Store + 'static>(store: Arc<S>) -> Harness<S> {
    let queue = Arc::new(InMemoryDelayedQueue::with_redelivery_delay(
        "expirations",
        Duration::from_secs(1),
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(TokioClock::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let scheduler = ExpirationScheduler::new(queue.clone());
    let retry = RetryPolicy::new(3);

    Harness {
        booking: Arc::new(
            BookingService::new(dyn_store.clone(), scheduler.clone(), notifier.clone(), retry)
                .with_clock(clock.clone()),
        ),
        confirmation: Arc::new(ConfirmationService::new(
            dyn_store.clone(),
            notifier.clone(),
            retry,
        )),
        catalog: Arc::new(EventCatalog::new(dyn_store.clone(), retry)),
        worker: Arc::new(
            ExpirationWorker::new(dyn_store, scheduler, notifier.clone()).with_clock(clock.clone()),
        ),
        store,
        queue,
        notifier,
        clock,
    }
}

impl<S: Store + 'static> Harness<S> {
    /// A worker sharing this harness's store, clock and queue
    pub fn worker_with(&self, notifier: Arc<dyn Notifier>) -> ExpirationWorker {
        let store: Arc<dyn Store> = self.store.clone();
        ExpirationWorker::new(store, ExpirationScheduler::new(self.queue.clone()), notifier)
            .with_clock(self.clock.clone())
    }
}

pub fn new_event(capacity: i32, payment_timeout_minutes: i32) -> NewEvent {
    NewEvent {
        name: "RustConf".into(),
        description: "Annual conference".into(),
        start_time: Utc::now() + chrono::Duration::days(30),
        end_time: None,
        location: "Main hall".into(),
        capacity,
        payment_timeout_minutes,
    }
}

pub fn attendee(n: usize) -> Attendee {
    Attendee::new(format!("Attendee {n}"), format!("user{n}@example.com"), "+10000000")
}

/// An instruction whose deadline has passed
pub fn expiration_payload(registration_id: RegistrationId, event_id: EventId) -> Vec<u8> {
    instruction_payload(registration_id, event_id, Utc::now() - chrono::Duration::seconds(1))
}

pub fn instruction_payload(
    registration_id: RegistrationId,
    event_id: EventId,
    expire_at: DateTime<Utc>,
) -> Vec<u8> {
    eb_common::ExpirationInstruction::new(registration_id, event_id, expire_at)
        .encode()
        .unwrap()
}

/// Let spawned tasks run until the queue has nothing scheduled or in flight
pub async fn settle_queue(queue: &InMemoryDelayedQueue) {
    for _ in 0..100 {
        if queue.scheduled_len() == 0 && queue.in_flight_len() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "queue did not drain: {} scheduled, {} in flight",
        queue.scheduled_len(),
        queue.in_flight_len()
    );
}
