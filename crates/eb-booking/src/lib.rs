//! Booking workflows.
//!
//! - [`BookingService`]: transactional admission, then delayed expiration scheduling
//! - [`ConfirmationService`]: `pending -> confirmed` with precise rejection reasons
//! - [`ExpirationWorker`]: idempotent cancellation of unconfirmed registrations
//! - [`EventCatalog`]: event creation and availability queries

pub mod booking;
pub mod catalog;
pub mod clock;
pub mod confirmation;
pub mod error;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use booking::BookingService;
pub use catalog::{validate_new_event, EventCatalog, EventOverview};
pub use clock::{Clock, SystemClock};
pub use confirmation::ConfirmationService;
pub use error::{BookingError, Result};
pub use notifier::{
    notify_best_effort, LogNotifier, NoopNotifier, Notification, NotificationError, Notifier,
    SmtpNotifier, SmtpSettings,
};
pub use retry::RetryPolicy;
pub use scheduler::{ExpirationScheduler, ScheduleError};
pub use worker::{ExpirationWorker, WorkerHandle, WorkerSettings};

/// Metric names
pub mod names {
    pub const BOOKINGS_TOTAL: &str = "eventbook_bookings_total";
    pub const CONFIRMATIONS_TOTAL: &str = "eventbook_confirmations_total";
    pub const EXPIRATIONS_TOTAL: &str = "eventbook_expirations_total";
    pub const SCHEDULE_FAILURES_TOTAL: &str = "eventbook_schedule_failures_total";
    pub const NOTIFICATION_FAILURES_TOTAL: &str = "eventbook_notification_failures_total";
}

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::BOOKINGS_TOTAL, "Booking attempts by outcome");
    metrics::describe_counter!(names::CONFIRMATIONS_TOTAL, "Confirmation attempts by outcome");
    metrics::describe_counter!(
        names::EXPIRATIONS_TOTAL,
        "Expiration instructions processed by outcome"
    );
    metrics::describe_counter!(
        names::SCHEDULE_FAILURES_TOTAL,
        "Bookings whose expiration could not be scheduled"
    );
    metrics::describe_counter!(
        names::NOTIFICATION_FAILURES_TOTAL,
        "Attendee notifications that could not be delivered"
    );
}
