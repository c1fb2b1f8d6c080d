//! likeness-store: Identity store backed by SQLite.
//!
//! Persons and their canonical face samples live in one database file,
//! accessed through a fixed-size connection pool. The person-id to name
//! mapping is memoized and invalidated by a generation counter that every
//! mutation bumps.

pub mod cache;
pub mod pool;
mod schema;
pub mod store;

pub use cache::{GenerationCache, IdentityMap};
pub use pool::{ConnectionPool, PooledConnection, DEFAULT_POOL_SIZE};
pub use store::{IdentityStore, Person, PersonId, StoreError};
