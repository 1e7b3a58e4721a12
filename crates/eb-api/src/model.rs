//! Request and response bodies

use chrono::{DateTime, Utc};
use eb_booking::EventOverview;
use eb_common::{Event, NewEvent, Registration};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// ============================================================================
// Envelope
// ============================================================================

/// Every response body: `{"status": "ok", "data": ...}` or
/// `{"status": "error", "error": {"code": ..., "desc": ...}}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "ok",
            error: None,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: &'static str, desc: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: Some(ErrorBody {
                code,
                desc: desc.into(),
            }),
            data: None,
        }
    }
}

/// Machine-readable code plus a human-readable reason
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// One of FIELD_BADFORMAT, FIELD_INCORRECT, EVENT_NOT_FOUND, EVENT_FULL,
    /// REGISTRATION_NOT_FOUND, REGISTRATION_DUPLICATE, ALREADY_CONFIRMED,
    /// REGISTRATION_CANCELED, SERVICE_UNAVAILABLE
    pub code: &'static str,
    pub desc: String,
}

// ============================================================================
// Requests
// ============================================================================

/// Request to publish an event
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreateEventRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: String,
    /// Maximum number of active registrations
    #[serde(default)]
    pub capacity: i32,
    /// Minutes a pending registration is held before it expires
    #[serde(default)]
    pub payment_timeout_minutes: i32,
}

impl CreateEventRequest {
    /// Only call after validation has checked `start_time`.
    pub(crate) fn into_new_event(self, start_time: DateTime<Utc>) -> NewEvent {
        NewEvent {
            name: self.name.trim().to_string(),
            description: self.description,
            start_time,
            end_time: self.end_time,
            location: self.location,
            capacity: self.capacity,
            payment_timeout_minutes: self.payment_timeout_minutes,
        }
    }
}

/// Request to reserve a seat
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreateRegistrationRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Request to confirm a pending registration
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ConfirmRegistrationRequest {
    pub registration_id: Option<i64>,
    /// Must match the email the registration was made with
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventQuery {
    /// `true` includes the active registrations of each event
    pub admin: Option<String>,
}

impl EventQuery {
    pub fn is_admin(&self) -> bool {
        self.admin.as_deref() == Some("true")
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A newly created event
#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: String,
    pub capacity: i32,
    pub payment_timeout_minutes: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(e: Event) -> Self {
        EventResponse {
            id: e.id,
            name: e.name,
            description: e.description,
            start_time: e.start_time,
            end_time: e.end_time,
            location: e.location,
            capacity: e.capacity,
            payment_timeout_minutes: e.payment_timeout_minutes,
            created_at: e.created_at,
        }
    }
}

/// An event with its current availability
#[derive(Debug, Serialize, ToSchema)]
pub struct EventInfoResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: String,
    pub capacity: i32,
    /// Capacity minus pending and confirmed registrations
    pub available_seats: i64,
    pub payment_timeout_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present for admin views only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrations: Option<Vec<RegistrationResponse>>,
}

impl From<EventOverview> for EventInfoResponse {
    fn from(o: EventOverview) -> Self {
        let e = o.event;
        EventInfoResponse {
            id: e.id,
            name: e.name,
            description: e.description,
            start_time: e.start_time,
            end_time: e.end_time,
            location: e.location,
            capacity: e.capacity,
            available_seats: o.available_seats,
            payment_timeout_minutes: e.payment_timeout_minutes,
            created_at: e.created_at,
            updated_at: e.updated_at,
            registrations: o
                .registrations
                .map(|regs| regs.into_iter().map(RegistrationResponse::from).collect()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationResponse {
    pub id: i64,
    pub event_id: i64,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    /// pending, confirmed or canceled
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Registration> for RegistrationResponse {
    fn from(r: Registration) -> Self {
        RegistrationResponse {
            id: r.id,
            event_id: r.event_id,
            full_name: r.full_name,
            email: r.email,
            created_at: r.created_at,
            status: r.status.as_str().to_string(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// UP
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ProbeResponse {
    /// LIVE, READY or NOT_READY
    pub status: String,
}
