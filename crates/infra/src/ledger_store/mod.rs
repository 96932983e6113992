//! Transactional movement/snapshot storage boundary.
//!
//! Both tables live behind one transaction: a movement row and the snapshot change it
//! describes are committed together or not at all.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryTransaction};
pub use postgres::{PostgresLedgerStore, PostgresTransaction};
pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MovementFilter, MovementPage, Pagination, SortOrder};
pub use r#trait::{
    IdempotencyOutcome, LedgerStore, LedgerTransaction, MovementReader, SnapshotReader, StoreError,
};
