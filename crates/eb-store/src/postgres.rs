use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eb_common::{
    Admission, Attendee, Event, EventId, NewEvent, Registration, RegistrationId, RegistrationStatus,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::repository::{EventStore, RegistrationStore, Store};

const MIGRATE_UP: &str = include_str!("../migrations/0001_init.up.sql");
const MIGRATE_DOWN: &str = include_str!("../migrations/0001_init.down.sql");

const EVENT_COLUMNS: &str = "id, name, description, start_time, end_time, location, capacity, \
     payment_timeout_minutes, created_at, updated_at";
const REGISTRATION_COLUMNS: &str =
    "id, event_id, full_name, email, phone, status, created_at, updated_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate_up(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATE_UP)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Applied schema migrations");
        Ok(())
    }

    pub async fn migrate_down(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATE_DOWN)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Rolled back schema migrations");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn event_from_row(row: &PgRow) -> Event {
    Event {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        start_time: row.get("start_time"),
        end_time: row.get::<Option<DateTime<Utc>>, _>("end_time"),
        location: row.get("location"),
        capacity: row.get("capacity"),
        payment_timeout_minutes: row.get("payment_timeout_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn registration_from_row(row: &PgRow) -> Result<Registration> {
    let status = parse_status(row)?;
    Ok(Registration {
        id: row.get("id"),
        event_id: row.get("event_id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn parse_status(row: &PgRow) -> Result<RegistrationStatus> {
    let raw: String = row.get("status");
    raw.parse()
        .map_err(|e: eb_common::ParseStatusError| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn create_event(&self, event: &NewEvent) -> Result<Event> {
        let query = format!(
            "INSERT INTO events (name, description, start_time, end_time, location, \
             capacity, payment_timeout_minutes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {EVENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&event.name)
            .bind(&event.description)
            .bind(event.start_time)
            .bind(event.end_time)
            .bind(&event.location)
            .bind(event.capacity)
            .bind(event.payment_timeout_minutes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_check_violation() => {
                    StoreError::InvalidEvent(db.message().to_string())
                }
                other => StoreError::Database(other),
            })?;

        let created = event_from_row(&row);
        info!(event_id = created.id, capacity = created.capacity, "Created event");
        Ok(created)
    }

    async fn get_event(&self, id: EventId) -> Result<Event> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::EventNotFound(id))?;
        Ok(event_from_row(&row))
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(event_from_row).collect())
    }
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    async fn admit_booking(&self, event_id: EventId, attendee: &Attendee) -> Result<Admission> {
        // Dropping `tx` on any early return rolls the whole admission back
        let mut tx = self.pool.begin().await?;

        let event = sqlx::query(
            "SELECT name, capacity, payment_timeout_minutes FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::EventNotFound(event_id))?;

        let event_name: String = event.get("name");
        let capacity: i32 = event.get("capacity");
        let payment_timeout_minutes: i32 = event.get("payment_timeout_minutes");

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations \
             WHERE event_id = $1 AND status IN ('pending', 'confirmed')",
        )
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await?;

        if active >= i64::from(capacity) {
            debug!(event_id, active, capacity, "Admission rejected, event full");
            return Err(StoreError::EventFull { event_id, capacity });
        }

        let duplicates: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations \
             WHERE event_id = $1 AND lower(email) = lower($2) AND status <> 'canceled'",
        )
        .bind(event_id)
        .bind(&attendee.email)
        .fetch_one(&mut *tx)
        .await?;

        if duplicates > 0 {
            return Err(StoreError::DuplicateRegistration {
                event_id,
                email: attendee.email.clone(),
            });
        }

        let query = format!(
            "INSERT INTO registrations (event_id, full_name, email, phone, status) \
             VALUES ($1, $2, $3, $4, 'pending') RETURNING {REGISTRATION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(event_id)
            .bind(&attendee.full_name)
            .bind(&attendee.email)
            .bind(&attendee.phone)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::DuplicateRegistration {
                        event_id,
                        email: attendee.email.clone(),
                    }
                }
                other => StoreError::Database(other),
            })?;
        let registration = registration_from_row(&row)?;

        tx.commit().await?;

        debug!(
            event_id,
            registration_id = registration.id,
            seats_taken = active + 1,
            capacity,
            "Admitted booking"
        );

        Ok(Admission {
            registration,
            event_name,
            payment_timeout_minutes,
        })
    }

    async fn get_registration(&self, id: RegistrationId) -> Result<Registration> {
        let query = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RegistrationNotFound(id))?;
        registration_from_row(&row)
    }

    async fn confirm(&self, id: RegistrationId) -> Result<Registration> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query("SELECT status FROM registrations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::RegistrationNotFound(id))?;
        let status = parse_status(&current)?;

        if !status.can_transition_to(RegistrationStatus::Confirmed) {
            return Err(StoreError::InvalidTransition {
                id,
                from: status,
                to: RegistrationStatus::Confirmed,
            });
        }

        let query = format!(
            "UPDATE registrations SET status = 'confirmed', updated_at = now() \
             WHERE id = $1 RETURNING {REGISTRATION_COLUMNS}"
        );
        let row = sqlx::query(&query).bind(id).fetch_one(&mut *tx).await?;
        let registration = registration_from_row(&row)?;

        tx.commit().await?;
        Ok(registration)
    }

    async fn cancel_if_pending(&self, id: RegistrationId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query("SELECT status FROM registrations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::RegistrationNotFound(id))?;
        let status = parse_status(&current)?;

        if status != RegistrationStatus::Pending {
            debug!(registration_id = id, status = %status, "Registration already settled");
            return Ok(false);
        }

        sqlx::query(
            "UPDATE registrations SET status = 'canceled', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn count_active(&self, event_id: EventId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations \
             WHERE event_id = $1 AND status IN ('pending', 'confirmed')",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_active(&self, event_id: EventId) -> Result<Vec<Registration>> {
        let query = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE event_id = $1 AND status <> 'canceled' ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query).bind(event_id).fetch_all(&self.pool).await?;
        rows.iter().map(registration_from_row).collect()
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
