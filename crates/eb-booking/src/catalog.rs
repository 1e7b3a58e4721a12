use eb_common::{Event, EventId, NewEvent, Registration};
use eb_store::Store;
use std::sync::Arc;
use tracing::info;

use crate::error::{BookingError, Result};
use crate::retry::RetryPolicy;

/// An event with its current seat availability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOverview {
    pub event: Event,
    pub available_seats: i64,
    /// Active registrations, oldest first; only loaded for admin views
    pub registrations: Option<Vec<Registration>>,
}

/// Event creation and read-side queries.
pub struct EventCatalog {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl EventCatalog {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn create_event(&self, event: NewEvent) -> Result<Event> {
        validate_new_event(&event)?;
        let created = self
            .retry
            .run("create_event", || self.store.create_event(&event))
            .await?;
        info!(event_id = created.id, name = %created.name, "Event published");
        Ok(created)
    }

    pub async fn overview(
        &self,
        event_id: EventId,
        include_registrations: bool,
    ) -> Result<EventOverview> {
        let event = self
            .retry
            .run("get_event", || self.store.get_event(event_id))
            .await?;
        self.describe(event, include_registrations).await
    }

    /// All events, newest first
    pub async fn list(&self, include_registrations: bool) -> Result<Vec<EventOverview>> {
        let events = self.retry.run("list_events", || self.store.list_events()).await?;

        let mut overviews = Vec::with_capacity(events.len());
        for event in events {
            overviews.push(self.describe(event, include_registrations).await?);
        }
        Ok(overviews)
    }

    async fn describe(&self, event: Event, include_registrations: bool) -> Result<EventOverview> {
        let active = self
            .retry
            .run("count_active", || self.store.count_active(event.id))
            .await?;

        let registrations = if include_registrations {
            Some(
                self.retry
                    .run("list_active", || self.store.list_active(event.id))
                    .await?,
            )
        } else {
            None
        };

        Ok(EventOverview {
            available_seats: event.available_seats(active),
            event,
            registrations,
        })
    }
}

pub fn validate_new_event(event: &NewEvent) -> Result<()> {
    if event.name.trim().is_empty() {
        return Err(BookingError::InvalidField {
            field: "name",
            reason: "is required".into(),
        });
    }
    if event.capacity <= 0 {
        return Err(BookingError::InvalidField {
            field: "capacity",
            reason: "must be greater than 0".into(),
        });
    }
    if event.payment_timeout_minutes < 1 {
        return Err(BookingError::InvalidField {
            field: "payment_timeout_minutes",
            reason: "must be at least 1".into(),
        });
    }
    if let Some(end) = event.end_time {
        if end < event.start_time {
            return Err(BookingError::InvalidField {
                field: "end_time",
                reason: "must not be before start_time".into(),
            });
        }
    }
    Ok(())
}
