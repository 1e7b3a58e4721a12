use async_trait::async_trait;
use eb_common::{Admission, Attendee, Event, EventId, NewEvent, Registration, RegistrationId};

use crate::error::Result;

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &NewEvent) -> Result<Event>;
    async fn get_event(&self, id: EventId) -> Result<Event>;
    /// Newest first
    async fn list_events(&self) -> Result<Vec<Event>>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Admit a booking as one atomic unit of work.
    ///
    /// All admission decisions for one event are serialized: capacity and
    /// duplicate checks and the insert happen while the event is held
    /// exclusively. Fails with `EventNotFound`, `EventFull` or
    /// `DuplicateRegistration` without writing anything.
    async fn admit_booking(&self, event_id: EventId, attendee: &Attendee) -> Result<Admission>;

    async fn get_registration(&self, id: RegistrationId) -> Result<Registration>;

    /// Compare-and-swap `pending -> confirmed` under the registration lock.
    ///
    /// A non-pending row yields `InvalidTransition` and is left untouched.
    async fn confirm(&self, id: RegistrationId) -> Result<Registration>;

    /// Cancel the registration if, and only if, it is still pending.
    ///
    /// Returns `false` without modification when the row is already terminal,
    /// so repeated delivery of the same expiration is harmless.
    async fn cancel_if_pending(&self, id: RegistrationId) -> Result<bool>;

    /// Pending plus confirmed registrations for the event
    async fn count_active(&self, event_id: EventId) -> Result<i64>;

    /// Non-canceled registrations, oldest first
    async fn list_active(&self, event_id: EventId) -> Result<Vec<Registration>>;
}

/// Full storage surface used by the booking services
#[async_trait]
pub trait Store: EventStore + RegistrationStore {
    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}
