//! Workflow tests against the in-memory store and delayed queue.

mod common;

use common::*;
use eb_booking::{
    BookingError, BookingService, Clock, ExpirationScheduler, RetryPolicy, WorkerSettings,
};
use eb_common::{AckNack, Attendee, RegistrationStatus};
use eb_queue::QueueConsumer;
use eb_store::{EventStore, MemoryStore, RegistrationStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_overbooking_under_contention() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(5, 10)).await.unwrap().id;

    let mut handles = Vec::new();
    for n in 0..30 {
        let booking = h.booking.clone();
        handles.push(tokio::spawn(async move { booking.book(event_id, attendee(n)).await }));
    }

    let mut admitted = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(registration) => {
                assert_eq!(registration.status, RegistrationStatus::Pending);
                admitted += 1;
            }
            Err(BookingError::EventFull(id)) => {
                assert_eq!(id, event_id);
                full += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(admitted, 5);
    assert_eq!(full, 25);
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 5);
    assert_eq!(h.queue.published_count(), 5);
    assert_eq!(h.notifier.count(RegistrationStatus::Pending), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_bookings() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(10, 10)).await.unwrap().id;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let booking = h.booking.clone();
        handles.push(tokio::spawn(async move {
            booking
                .book(event_id, Attendee::new("Ada Lovelace", "ada@example.com", "+1"))
                .await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(BookingError::DuplicateRegistration(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_rejected_case_insensitively() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(10, 10)).await.unwrap().id;

    h.booking
        .book(event_id, Attendee::new("Ada", "ada@example.com", "+1"))
        .await
        .unwrap();
    let err = h
        .booking
        .book(event_id, Attendee::new("Ada", "  Ada@Example.com ", "+1"))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::DuplicateRegistration(_)));
}

#[tokio::test]
async fn test_booking_unknown_event() {
    let h = harness();
    let err = h.booking.book(42, attendee(1)).await.unwrap_err();

    assert!(matches!(err, BookingError::EventNotFound(42)));
    assert_eq!(h.queue.published_count(), 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_idempotent_expiration() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();

    let payload = expiration_payload(registration.id, event_id);
    assert_eq!(h.worker.handle(&payload).await, AckNack::Ack);
    assert_eq!(h.worker.handle(&payload).await, AckNack::Ack);

    assert!(!h.store.cancel_if_pending(registration.id).await.unwrap());
    assert_eq!(
        h.store.get_registration(registration.id).await.unwrap().status,
        RegistrationStatus::Canceled
    );
    assert_eq!(h.notifier.count(RegistrationStatus::Canceled), 1);
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_confirm_beats_expire() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();

    let confirmed = h
        .confirmation
        .confirm(event_id, registration.id, &registration.email)
        .await
        .unwrap();
    assert_eq!(confirmed.status, RegistrationStatus::Confirmed);

    let payload = expiration_payload(registration.id, event_id);
    assert_eq!(h.worker.handle(&payload).await, AckNack::Ack);
    // Redelivery changes nothing either
    assert_eq!(h.worker.handle(&payload).await, AckNack::Ack);

    assert_eq!(
        h.store.get_registration(registration.id).await.unwrap().status,
        RegistrationStatus::Confirmed
    );
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 1);
    assert_eq!(h.notifier.count(RegistrationStatus::Canceled), 0);
}

#[tokio::test]
async fn test_expire_beats_confirm() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();

    let payload = expiration_payload(registration.id, event_id);
    assert_eq!(h.worker.handle(&payload).await, AckNack::Ack);

    let err = h
        .confirmation
        .confirm(event_id, registration.id, &registration.email)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::AlreadyCanceled(id) if id == registration.id));
    assert_eq!(
        h.store.get_registration(registration.id).await.unwrap().status,
        RegistrationStatus::Canceled
    );
    assert_eq!(h.notifier.count(RegistrationStatus::Confirmed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirm_and_expire_race_has_one_winner() {
    for _ in 0..50 {
        let h = harness();
        let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
        let registration = h.booking.book(event_id, attendee(1)).await.unwrap();
        let registration_id = registration.id;
        let payload = expiration_payload(registration_id, event_id);

        let confirm = {
            let confirmation = h.confirmation.clone();
            let email = registration.email.clone();
            tokio::spawn(
                async move { confirmation.confirm(event_id, registration_id, &email).await },
            )
        };
        let expire = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.handle(&payload).await })
        };

        let confirmed = confirm.await.unwrap();
        assert_eq!(expire.await.unwrap(), AckNack::Ack);

        let status = h.store.get_registration(registration_id).await.unwrap().status;
        match confirmed {
            Ok(_) => assert_eq!(status, RegistrationStatus::Confirmed),
            Err(BookingError::AlreadyCanceled(_)) => {
                assert_eq!(status, RegistrationStatus::Canceled)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test]
async fn test_round_trip_keeps_seat_count_consistent() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(3, 5)).await.unwrap().id;

    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();
    let loaded = h.store.get_registration(registration.id).await.unwrap();
    assert_eq!(loaded.status, RegistrationStatus::Pending);
    assert_eq!(h.catalog.overview(event_id, false).await.unwrap().available_seats, 2);

    let confirmed = h
        .confirmation
        .confirm(event_id, registration.id, "USER1@example.com")
        .await
        .unwrap();
    assert_eq!(confirmed.status, RegistrationStatus::Confirmed);
    assert_eq!(h.catalog.overview(event_id, false).await.unwrap().available_seats, 2);

    let err = h
        .confirmation
        .confirm(event_id, registration.id, &registration.email)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::AlreadyConfirmed(_)));
}

#[tokio::test]
async fn test_confirmation_rejections() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(3, 5)).await.unwrap().id;
    let other_event = h.store.create_event(&new_event(3, 5)).await.unwrap().id;
    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();

    assert!(matches!(
        h.confirmation.confirm(event_id, registration.id, "someone@else.com").await,
        Err(BookingError::EmailMismatch(_))
    ));
    assert!(matches!(
        h.confirmation.confirm(event_id, 999, &registration.email).await,
        Err(BookingError::RegistrationNotFound(999))
    ));
    assert!(matches!(
        h.confirmation.confirm(other_event, registration.id, &registration.email).await,
        Err(BookingError::RegistrationNotFound(_))
    ));
    assert!(matches!(
        h.confirmation.confirm(777, registration.id, &registration.email).await,
        Err(BookingError::EventNotFound(777))
    ));

    assert_eq!(
        h.store.get_registration(registration.id).await.unwrap().status,
        RegistrationStatus::Pending
    );
}

#[tokio::test]
async fn test_schedule_failure_keeps_booking() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let booking = BookingService::new(
        store.clone(),
        ExpirationScheduler::new(Arc::new(FailingPublisher)),
        notifier.clone(),
        RetryPolicy::default(),
    );
    let event_id = store.create_event(&new_event(2, 5)).await.unwrap().id;

    let registration = booking.book(event_id, attendee(1)).await.unwrap();

    assert_eq!(
        store.get_registration(registration.id).await.unwrap().status,
        RegistrationStatus::Pending
    );
    assert_eq!(notifier.count(RegistrationStatus::Pending), 1);
}

#[tokio::test]
async fn test_notification_failure_keeps_booking() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(eb_queue::InMemoryDelayedQueue::new("expirations"));
    let booking = BookingService::new(
        store.clone(),
        ExpirationScheduler::new(queue.clone()),
        Arc::new(RecordingNotifier::failing()),
        RetryPolicy::default(),
    );
    let event_id = store.create_event(&new_event(2, 5)).await.unwrap().id;

    booking.book(event_id, attendee(1)).await.unwrap();
    assert_eq!(queue.published_count(), 1);
}

#[tokio::test]
async fn test_pending_notification_carries_event_context() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(2, 15)).await.unwrap().id;
    h.booking.book(event_id, attendee(7)).await.unwrap();

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event_name, "RustConf");
    assert_eq!(sent[0].recipient, "user7@example.com");
    assert_eq!(sent[0].timeout_minutes, 15);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_instruction_payload() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(2, 1)).await.unwrap().id;
    let booked_at = h.clock.now();
    let registration = h.booking.book(event_id, attendee(1)).await.unwrap();

    let message = h.queue.receive().await.unwrap().unwrap();
    let instruction = eb_common::ExpirationInstruction::decode(&message.payload).unwrap();

    assert_eq!(instruction.registration_id, registration.id);
    assert_eq!(instruction.event_id, event_id);
    assert_eq!(instruction.expire_at, booked_at + chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_transient_admission_failures_are_retried() {
    let store = Arc::new(FlakyStore::default());
    let h = harness_with(store.clone());
    let event_id = h.store.create_event(&new_event(2, 5)).await.unwrap().id;

    store.fail_admits(2);
    h.booking.book(event_id, attendee(1)).await.unwrap();

    store.fail_admits(3);
    let err = h.booking.book(event_id, attendee(2)).await.unwrap_err();
    assert!(matches!(err, BookingError::Unavailable(_)));
    assert!(!err.is_client_error());
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_canceled_attendee_can_rebook() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let first = h.booking.book(event_id, attendee(1)).await.unwrap();

    h.worker.handle(&expiration_payload(first.id, event_id)).await;

    let second = h.booking.book(event_id, attendee(1)).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, RegistrationStatus::Pending);
}

/// Capacity 1, timeout 5 minutes: X books, Y is turned away, X confirms,
/// and the expiration that fires later leaves X confirmed.
#[tokio::test(start_paused = true)]
async fn test_confirmed_seat_survives_its_expiration() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let worker = h.worker.clone().start(h.queue.clone(), WorkerSettings { concurrency: 2 });

    let x = h.booking.book(event_id, attendee(1)).await.unwrap();
    assert_eq!(x.status, RegistrationStatus::Pending);
    assert_eq!(h.catalog.overview(event_id, false).await.unwrap().available_seats, 0);

    let y = h.booking.book(event_id, attendee(2)).await;
    assert!(matches!(y, Err(BookingError::EventFull(_))));

    h.confirmation.confirm(event_id, x.id, &x.email).await.unwrap();
    assert_eq!(h.queue.scheduled_len(), 1);

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    settle_queue(&h.queue).await;

    assert_eq!(
        h.store.get_registration(x.id).await.unwrap().status,
        RegistrationStatus::Confirmed
    );
    assert_eq!(h.store.count_active(event_id).await.unwrap(), 1);
    assert!(h.queue.dead_letters().is_empty());
    assert_eq!(h.notifier.count(RegistrationStatus::Canceled), 0);

    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_seat_is_released_after_timeout() {
    let h = harness();
    let event_id = h.store.create_event(&new_event(1, 5)).await.unwrap().id;
    let worker = h.worker.clone().start(h.queue.clone(), WorkerSettings::default());

    let x = h.booking.book(event_id, attendee(1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    assert_eq!(
        h.store.get_registration(x.id).await.unwrap().status,
        RegistrationStatus::Pending
    );

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle_queue(&h.queue).await;

    assert_eq!(
        h.store.get_registration(x.id).await.unwrap().status,
        RegistrationStatus::Canceled
    );
    assert_eq!(h.notifier.count(RegistrationStatus::Canceled), 1);

    // The freed seat is bookable again
    h.booking.book(event_id, attendee(2)).await.unwrap();

    worker.shutdown().await;
}
