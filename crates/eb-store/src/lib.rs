//! Event and registration storage.
//!
//! Every capacity and status decision is made inside the store, under a lock:
//! PostgreSQL uses `SELECT ... FOR UPDATE` on the event row (admission) and on
//! the registration row (status transitions); the in-memory store serializes
//! the same check-then-act sequences behind a single mutex.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use repository::{EventStore, RegistrationStore, Store};
