//! Mapping of booking failures onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use eb_booking::BookingError;
use tracing::{debug, error};

use crate::model::ApiResponse;
use crate::validation::{Rule, ValidationError};

pub const FIELD_BADFORMAT: &str = "FIELD_BADFORMAT";
pub const FIELD_INCORRECT: &str = "FIELD_INCORRECT";
pub const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";
pub const EVENT_FULL: &str = "EVENT_FULL";
pub const REGISTRATION_NOT_FOUND: &str = "REGISTRATION_NOT_FOUND";
pub const REGISTRATION_DUPLICATE: &str = "REGISTRATION_DUPLICATE";
pub const ALREADY_CONFIRMED: &str = "ALREADY_CONFIRMED";
pub const REGISTRATION_CANCELED: &str = "REGISTRATION_CANCELED";
pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";

/// Body of every server-side failure; details stay in the logs.
pub const UNAVAILABLE_MESSAGE: &str = "Service is currently unavailable. Please try again later.";

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request rejected before reaching a workflow
    BadRequest { code: &'static str, desc: String },
    Booking(BookingError),
}

impl ApiError {
    pub fn invalid_json() -> Self {
        ApiError::BadRequest {
            code: FIELD_INCORRECT,
            desc: "Invalid JSON format".to_string(),
        }
    }

    pub fn invalid_event_id() -> Self {
        ApiError::BadRequest {
            code: FIELD_INCORRECT,
            desc: "Invalid event ID".to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err.rule {
            Rule::Format => ApiError::BadRequest {
                code: FIELD_BADFORMAT,
                desc: format!("Field '{}' has bad format", err.field),
            },
            _ => ApiError::BadRequest {
                code: FIELD_INCORRECT,
                desc: err.to_string(),
            },
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}

fn describe(err: &BookingError) -> (StatusCode, &'static str, String) {
    match err {
        BookingError::InvalidField { field, .. } => (
            StatusCode::BAD_REQUEST,
            FIELD_INCORRECT,
            format!("Field '{field}' is incorrect"),
        ),
        BookingError::EventNotFound(_) => {
            (StatusCode::NOT_FOUND, EVENT_NOT_FOUND, "Event not found".into())
        }
        BookingError::EventFull(_) => (StatusCode::CONFLICT, EVENT_FULL, "Event is full".into()),
        BookingError::DuplicateRegistration(_) => (
            StatusCode::CONFLICT,
            REGISTRATION_DUPLICATE,
            "You have already registered for this event".into(),
        ),
        BookingError::RegistrationNotFound(_) => (
            StatusCode::NOT_FOUND,
            REGISTRATION_NOT_FOUND,
            "Registration not found".into(),
        ),
        BookingError::AlreadyConfirmed(_) => {
            (StatusCode::CONFLICT, ALREADY_CONFIRMED, "Already confirmed".into())
        }
        BookingError::AlreadyCanceled(_) => (
            StatusCode::CONFLICT,
            REGISTRATION_CANCELED,
            "Registration was canceled".into(),
        ),
        BookingError::EmailMismatch(_) => (
            StatusCode::BAD_REQUEST,
            FIELD_INCORRECT,
            "Wrong email for this registration".into(),
        ),
        BookingError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            SERVICE_UNAVAILABLE,
            UNAVAILABLE_MESSAGE.into(),
        ),
        BookingError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            SERVICE_UNAVAILABLE,
            UNAVAILABLE_MESSAGE.into(),
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, desc) = match self {
            ApiError::BadRequest { code, desc } => {
                debug!(code, desc = %desc, "Rejected request");
                (StatusCode::BAD_REQUEST, code, desc)
            }
            ApiError::Booking(err) => {
                if err.is_client_error() {
                    debug!(kind = err.kind(), error = %err, "Rejected request");
                } else {
                    error!(kind = err.kind(), error = %err, "Request failed");
                }
                describe(&err)
            }
        };

        (status, Json(ApiResponse::error(code, desc))).into_response()
    }
}
