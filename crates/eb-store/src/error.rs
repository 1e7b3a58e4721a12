use eb_common::{EventId, RegistrationId, RegistrationStatus};

/// Failures surfaced by event and registration stores.
///
/// Integrity outcomes (full, duplicate, invalid transition) are always typed;
/// raw driver failures stay wrapped in [`StoreError::Database`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("event {event_id} is full (capacity {capacity})")]
    EventFull { event_id: EventId, capacity: i32 },

    #[error("an active registration for {email} already exists on event {event_id}")]
    DuplicateRegistration { event_id: EventId, email: String },

    #[error("registration {0} not found")]
    RegistrationNotFound(RegistrationId),

    #[error("registration {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RegistrationId,
        from: RegistrationStatus,
        to: RegistrationStatus,
    },

    #[error("event rejected by store: {0}")]
    InvalidEvent(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Lock contention, serialization conflicts and connectivity loss can
    /// succeed on a later attempt; everything else cannot.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        // serialization_failure, deadlock_detected, lock_not_available
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001" | "40P01" | "55P03"))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
