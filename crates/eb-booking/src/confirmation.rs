use eb_common::{normalize_email, EventId, Registration, RegistrationId, RegistrationStatus};
use eb_store::Store;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{BookingError, Result};
use crate::names;
use crate::notifier::{notify_best_effort, Notification, Notifier};
use crate::retry::RetryPolicy;

/// Moves pending registrations to `confirmed`.
pub struct ConfirmationService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl ConfirmationService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    pub async fn confirm(
        &self,
        event_id: EventId,
        registration_id: RegistrationId,
        email: &str,
    ) -> Result<Registration> {
        let result = self.try_confirm(event_id, registration_id, email).await;

        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => e.kind(),
        };
        metrics::counter!(names::CONFIRMATIONS_TOTAL, "outcome" => outcome).increment(1);

        if let Err(e) = &result {
            if !e.is_client_error() {
                error!(event_id, registration_id, error = %e, "Confirmation failed");
            }
        }
        result
    }

    async fn try_confirm(
        &self,
        event_id: EventId,
        registration_id: RegistrationId,
        email: &str,
    ) -> Result<Registration> {
        let event = self
            .retry
            .run("get_event", || self.store.get_event(event_id))
            .await?;

        let registration = self
            .retry
            .run("get_registration", || self.store.get_registration(registration_id))
            .await?;

        // Do not reveal that the id exists under another event
        if registration.event_id != event_id {
            return Err(BookingError::RegistrationNotFound(registration_id));
        }
        if normalize_email(&registration.email) != normalize_email(email) {
            return Err(BookingError::EmailMismatch(registration_id));
        }
        match registration.status {
            RegistrationStatus::Confirmed => {
                return Err(BookingError::AlreadyConfirmed(registration_id))
            }
            RegistrationStatus::Canceled => {
                return Err(BookingError::AlreadyCanceled(registration_id))
            }
            RegistrationStatus::Pending => {}
        }

        // The expiration worker may have won the row lock since the read above;
        // the store reports that as an invalid transition.
        let confirmed = self
            .retry
            .run("confirm", || self.store.confirm(registration_id))
            .await?;

        info!(registration_id, event_id, "Registration confirmed");

        let notification = Notification {
            event_name: event.name,
            status: RegistrationStatus::Confirmed,
            recipient: confirmed.email.clone(),
            timeout_minutes: event.payment_timeout_minutes,
        };
        notify_best_effort(self.notifier.as_ref(), &notification).await;

        Ok(confirmed)
    }
}
