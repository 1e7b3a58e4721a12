//! Event and registration endpoints

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use eb_common::{Attendee, EventId};

use crate::error::ApiError;
use crate::model::{
    ApiResponse, ConfirmRegistrationRequest, CreateEventRequest, CreateRegistrationRequest,
    EventInfoResponse, EventQuery, EventResponse, RegistrationResponse,
};
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn event_id(path: Result<Path<EventId>, PathRejection>) -> ApiResult<EventId> {
    path.map(|Path(id)| id).map_err(|_| ApiError::invalid_event_id())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|_| ApiError::invalid_json())
}

/// Publish a new event
#[utoipa::path(
    post,
    path = "/v1/events",
    tag = "events",
    request_body = CreateEventRequest,
    responses(
        (
            status = 201,
            description = "Event created (wrapped in the response envelope)",
            body = EventResponse
        ),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn create_event(
    State(state): State<AppState>,
    payload: Result<Json<CreateEventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<EventResponse>>)> {
    let req = body(payload)?;
    state.validator.validate_event(&req)?;
    let Some(start_time) = req.start_time else {
        return Err(ApiError::invalid_json());
    };

    let event = state.catalog.create_event(req.into_new_event(start_time)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(event.into()))))
}

/// List all events, newest first
#[utoipa::path(
    get,
    path = "/v1/events",
    tag = "events",
    params(EventQuery),
    responses(
        (status = 200, description = "Events with availability", body = [EventInfoResponse])
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<ApiResponse<Vec<EventInfoResponse>>>> {
    let events = state.catalog.list(query.is_admin()).await?;
    Ok(Json(ApiResponse::ok(
        events.into_iter().map(EventInfoResponse::from).collect(),
    )))
}

/// Get one event with its available seats
#[utoipa::path(
    get,
    path = "/v1/events/{id}",
    tag = "events",
    params(("id" = i64, Path, description = "Event id"), EventQuery),
    responses(
        (status = 200, description = "Event with availability", body = EventInfoResponse),
        (status = 404, description = "Event not found")
    )
)]
pub async fn get_event(
    State(state): State<AppState>,
    path: Result<Path<EventId>, PathRejection>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<ApiResponse<EventInfoResponse>>> {
    let id = event_id(path)?;
    let overview = state.catalog.overview(id, query.is_admin()).await?;
    Ok(Json(ApiResponse::ok(overview.into())))
}

/// Reserve a seat; the registration stays pending until confirmed
#[utoipa::path(
    post,
    path = "/v1/events/{id}/book",
    tag = "registrations",
    params(("id" = i64, Path, description = "Event id")),
    request_body = CreateRegistrationRequest,
    responses(
        (status = 201, description = "Pending registration", body = RegistrationResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event is full or attendee already registered")
    )
)]
pub async fn book(
    State(state): State<AppState>,
    path: Result<Path<EventId>, PathRejection>,
    payload: Result<Json<CreateRegistrationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RegistrationResponse>>)> {
    let id = event_id(path)?;
    let req = body(payload)?;
    state.validator.validate_registration(&req)?;

    let attendee = Attendee::new(req.full_name, &req.email, req.phone);
    let registration = state.booking.book(id, attendee).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(registration.into()))))
}

/// Confirm a pending registration before its hold expires
#[utoipa::path(
    post,
    path = "/v1/events/{id}/confirm",
    tag = "registrations",
    params(("id" = i64, Path, description = "Event id")),
    request_body = ConfirmRegistrationRequest,
    responses(
        (status = 200, description = "Confirmed registration", body = RegistrationResponse),
        (status = 400, description = "Invalid request or wrong email"),
        (status = 404, description = "Event or registration not found"),
        (status = 409, description = "Registration already confirmed or canceled")
    )
)]
pub async fn confirm(
    State(state): State<AppState>,
    path: Result<Path<EventId>, PathRejection>,
    payload: Result<Json<ConfirmRegistrationRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<RegistrationResponse>>> {
    let id = event_id(path)?;
    let req = body(payload)?;
    state.validator.validate_confirmation(&req)?;
    let Some(registration_id) = req.registration_id else {
        return Err(ApiError::invalid_json());
    };

    let registration = state
        .confirmation
        .confirm(id, registration_id, &req.email)
        .await?;
    Ok(Json(ApiResponse::ok(registration.into())))
}
