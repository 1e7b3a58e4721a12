use eb_common::{EventId, RegistrationId, RegistrationStatus};
use eb_store::StoreError;

/// Client-facing failure taxonomy of the booking workflows.
///
/// Storage failures never cross this boundary raw: integrity outcomes are
/// mapped to their own variants, everything else becomes `Unavailable`
/// (retryable) or `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("field '{field}' is incorrect: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("event {0} is full")]
    EventFull(EventId),

    #[error("attendee is already registered for event {0}")]
    DuplicateRegistration(EventId),

    #[error("registration {0} not found")]
    RegistrationNotFound(RegistrationId),

    #[error("registration {0} is already confirmed")]
    AlreadyConfirmed(RegistrationId),

    #[error("registration {0} was canceled")]
    AlreadyCanceled(RegistrationId),

    #[error("email does not match registration {0}")]
    EmailMismatch(RegistrationId),

    #[error("store temporarily unavailable: {0}")]
    Unavailable(#[source] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Short label for logs and metric outcomes
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidField { .. } => "invalid_field",
            BookingError::EventNotFound(_) => "event_not_found",
            BookingError::EventFull(_) => "event_full",
            BookingError::DuplicateRegistration(_) => "duplicate",
            BookingError::RegistrationNotFound(_) => "registration_not_found",
            BookingError::AlreadyConfirmed(_) => "already_confirmed",
            BookingError::AlreadyCanceled(_) => "already_canceled",
            BookingError::EmailMismatch(_) => "email_mismatch",
            BookingError::Unavailable(_) => "unavailable",
            BookingError::Internal(_) => "internal",
        }
    }

    /// True when the caller did something wrong, as opposed to a service failure
    pub fn is_client_error(&self) -> bool {
        !matches!(self, BookingError::Unavailable(_) | BookingError::Internal(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EventNotFound(id) => BookingError::EventNotFound(id),
            StoreError::EventFull { event_id, .. } => BookingError::EventFull(event_id),
            StoreError::DuplicateRegistration { event_id, .. } => {
                BookingError::DuplicateRegistration(event_id)
            }
            StoreError::RegistrationNotFound(id) => BookingError::RegistrationNotFound(id),
            StoreError::InvalidTransition {
                id,
                from: RegistrationStatus::Confirmed,
                ..
            } => BookingError::AlreadyConfirmed(id),
            StoreError::InvalidTransition {
                id,
                from: RegistrationStatus::Canceled,
                ..
            } => BookingError::AlreadyCanceled(id),
            StoreError::InvalidEvent(reason) => BookingError::InvalidField {
                field: "event",
                reason,
            },
            err if err.is_transient() => BookingError::Unavailable(err),
            other => BookingError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
