use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingError};

pub type EventId = i64;
pub type RegistrationId = i64;

// ============================================================================
// Event Types
// ============================================================================

/// A capacity-limited event that attendees can book seats for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: String,
    /// Maximum number of active (pending or confirmed) registrations
    pub capacity: i32,
    /// How long a pending registration is held before it expires
    pub payment_timeout_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn payment_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.payment_timeout_minutes))
    }

    /// Seats still free given the number of active registrations
    pub fn available_seats(&self, active_registrations: i64) -> i64 {
        (i64::from(self.capacity) - active_registrations).max(0)
    }
}

/// Fields required to create an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: String,
    pub capacity: i32,
    pub payment_timeout_minutes: i32,
}

// ============================================================================
// Registration Types
// ============================================================================

/// Registration status state machine.
///
/// `Pending` is the only non-terminal state; it moves to `Confirmed` when the
/// attendee confirms or to `Canceled` when the hold expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Canceled => "canceled",
        }
    }

    /// Active registrations occupy a seat
    pub fn is_active(&self) -> bool {
        !matches!(self, RegistrationStatus::Canceled)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RegistrationStatus::Pending)
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        matches!(
            (self, next),
            (RegistrationStatus::Pending, RegistrationStatus::Confirmed)
                | (RegistrationStatus::Pending, RegistrationStatus::Canceled)
        )
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown registration status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for RegistrationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RegistrationStatus::Pending),
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            "canceled" => Ok(RegistrationStatus::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Attendee details supplied when booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

impl Attendee {
    pub fn new(
        full_name: impl Into<String>,
        email: impl AsRef<str>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into().trim().to_string(),
            email: normalize_email(email.as_ref()),
            phone: phone.into().trim().to_string(),
        }
    }
}

/// Emails are compared trimmed and case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn is_pending(&self) -> bool {
        self.status == RegistrationStatus::Pending
    }
}

/// Result of a successful admission: the new pending registration plus the
/// event context read under the same lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub registration: Registration,
    pub event_name: String,
    pub payment_timeout_minutes: i32,
}

impl Admission {
    pub fn payment_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.payment_timeout_minutes))
    }
}

// ============================================================================
// Expiration Messages
// ============================================================================

/// Delayed cancellation instruction, one per successful booking.
///
/// Wire format: `{"registration_id": 1, "event_id": 2, "expire_at": "<RFC3339>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationInstruction {
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub expire_at: DateTime<Utc>,
}

impl ExpirationInstruction {
    pub fn new(
        registration_id: RegistrationId,
        event_id: EventId,
        expire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            registration_id,
            event_id,
            expire_at,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Settlement of a consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckNack {
    /// Processed; remove from the queue
    Ack,
    /// Failed transiently; redeliver later
    Nack,
    /// Can never succeed; drop without redelivery
    Reject,
}
