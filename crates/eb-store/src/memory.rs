//! In-process store for development and tests.
//!
//! One mutex guards all state, so every check-then-act sequence runs as a
//! single critical section. Nothing is held across an `.await`.

use async_trait::async_trait;
use chrono::Utc;
use eb_common::{
    Admission, Attendee, Event, EventId, NewEvent, Registration, RegistrationId, RegistrationStatus,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::repository::{EventStore, RegistrationStore, Store};

#[derive(Default)]
struct Inner {
    events: BTreeMap<EventId, Event>,
    registrations: BTreeMap<RegistrationId, Registration>,
    next_event_id: EventId,
    next_registration_id: RegistrationId,
}

impl Inner {
    fn count_active(&self, event_id: EventId) -> i64 {
        self.registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status.is_active())
            .count() as i64
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self, id: RegistrationId, to: RegistrationStatus) -> Result<Registration> {
        let mut inner = self.inner.lock();
        let registration = inner
            .registrations
            .get_mut(&id)
            .ok_or(StoreError::RegistrationNotFound(id))?;

        if !registration.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: registration.status,
                to,
            });
        }

        registration.status = to;
        registration.updated_at = Utc::now();
        Ok(registration.clone())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create_event(&self, event: &NewEvent) -> Result<Event> {
        if event.capacity <= 0 {
            return Err(StoreError::InvalidEvent("capacity must be positive".into()));
        }
        if event.payment_timeout_minutes < 1 {
            return Err(StoreError::InvalidEvent(
                "payment timeout must be at least one minute".into(),
            ));
        }

        let mut inner = self.inner.lock();
        inner.next_event_id += 1;
        let now = Utc::now();
        let created = Event {
            id: inner.next_event_id,
            name: event.name.clone(),
            description: event.description.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            location: event.location.clone(),
            capacity: event.capacity,
            payment_timeout_minutes: event.payment_timeout_minutes,
            created_at: now,
            updated_at: now,
        };
        inner.events.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_event(&self, id: EventId) -> Result<Event> {
        self.inner
            .lock()
            .events
            .get(&id)
            .cloned()
            .ok_or(StoreError::EventNotFound(id))
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        // Ids are assigned in creation order
        Ok(self.inner.lock().events.values().rev().cloned().collect())
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn admit_booking(&self, event_id: EventId, attendee: &Attendee) -> Result<Admission> {
        let mut inner = self.inner.lock();

        let event = inner
            .events
            .get(&event_id)
            .ok_or(StoreError::EventNotFound(event_id))?;
        let event_name = event.name.clone();
        let capacity = event.capacity;
        let payment_timeout_minutes = event.payment_timeout_minutes;

        if inner.count_active(event_id) >= i64::from(capacity) {
            return Err(StoreError::EventFull { event_id, capacity });
        }

        let email = eb_common::normalize_email(&attendee.email);
        let duplicate = inner.registrations.values().any(|r| {
            r.event_id == event_id
                && r.status.is_active()
                && eb_common::normalize_email(&r.email) == email
        });
        if duplicate {
            return Err(StoreError::DuplicateRegistration { event_id, email });
        }

        inner.next_registration_id += 1;
        let now = Utc::now();
        let registration = Registration {
            id: inner.next_registration_id,
            event_id,
            full_name: attendee.full_name.clone(),
            email: attendee.email.clone(),
            phone: attendee.phone.clone(),
            status: RegistrationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        inner.registrations.insert(registration.id, registration.clone());
        debug!(event_id, registration_id = registration.id, "Admitted booking");

        Ok(Admission {
            registration,
            event_name,
            payment_timeout_minutes,
        })
    }

    async fn get_registration(&self, id: RegistrationId) -> Result<Registration> {
        self.inner
            .lock()
            .registrations
            .get(&id)
            .cloned()
            .ok_or(StoreError::RegistrationNotFound(id))
    }

    async fn confirm(&self, id: RegistrationId) -> Result<Registration> {
        self.transition(id, RegistrationStatus::Confirmed)
    }

    async fn cancel_if_pending(&self, id: RegistrationId) -> Result<bool> {
        match self.transition(id, RegistrationStatus::Canceled) {
            Ok(_) => Ok(true),
            Err(StoreError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count_active(&self, event_id: EventId) -> Result<i64> {
        Ok(self.inner.lock().count_active(event_id))
    }

    async fn list_active(&self, event_id: EventId) -> Result<Vec<Registration>> {
        // Registration ids are assigned in creation order
        Ok(self
            .inner
            .lock()
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
