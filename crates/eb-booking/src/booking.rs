use eb_common::{Attendee, EventId, ExpirationInstruction, Registration, RegistrationStatus};
use eb_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{BookingError, Result};
use crate::names;
use crate::notifier::{notify_best_effort, Notification, Notifier};
use crate::retry::RetryPolicy;
use crate::scheduler::ExpirationScheduler;

/// Admits bookings and schedules their expiration.
pub struct BookingService {
    store: Arc<dyn Store>,
    scheduler: ExpirationScheduler,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: ExpirationScheduler,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            retry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to stamp expiration deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reserve a seat for `attendee`.
    ///
    /// The returned registration is committed and `pending`. Scheduling its
    /// expiration and notifying the attendee happen after the commit and
    /// never fail the booking.
    pub async fn book(&self, event_id: EventId, attendee: Attendee) -> Result<Registration> {
        let admission = match self
            .retry
            .run("admit_booking", || self.store.admit_booking(event_id, &attendee))
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                let err = BookingError::from(e);
                metrics::counter!(names::BOOKINGS_TOTAL, "outcome" => err.kind()).increment(1);
                if !err.is_client_error() {
                    error!(event_id, error = %err, "Booking failed");
                }
                return Err(err);
            }
        };
        metrics::counter!(names::BOOKINGS_TOTAL, "outcome" => "admitted").increment(1);

        let expire_at = self.clock.now() + admission.payment_timeout();
        let delay = payment_delay(admission.payment_timeout_minutes);
        let registration = admission.registration;
        let instruction = ExpirationInstruction::new(registration.id, event_id, expire_at);

        if let Err(e) = self.scheduler.schedule(&instruction, delay).await {
            // The seat stays held past its deadline until someone intervenes
            metrics::counter!(names::SCHEDULE_FAILURES_TOTAL).increment(1);
            error!(
                registration_id = registration.id,
                event_id,
                error = %e,
                "Failed to schedule expiration, registration will not expire automatically"
            );
        }

        let notification = Notification {
            event_name: admission.event_name,
            status: RegistrationStatus::Pending,
            recipient: registration.email.clone(),
            timeout_minutes: admission.payment_timeout_minutes,
        };
        notify_best_effort(self.notifier.as_ref(), &notification).await;

        info!(
            registration_id = registration.id,
            event_id,
            expire_at = %expire_at,
            "Booking admitted"
        );
        Ok(registration)
    }
}

fn payment_delay(timeout_minutes: i32) -> Duration {
    let minutes = u64::try_from(timeout_minutes).unwrap_or(0);
    Duration::from_secs(minutes * 60)
}
