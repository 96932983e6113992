//! Stock ledger domain module.
//!
//! This crate contains the ledger's business rules as deterministic domain logic
//! (no IO, no locking, no storage): movement and snapshot records, command validation
//! and delta normalization, and the pure aggregation behind the inventory queries.

pub mod command;
pub mod event;
pub mod movement;
pub mod snapshot;
pub mod status;

pub use command::{AdjustStock, Direction, RecordMovement, TransferStock, normalize_idempotency_key};
pub use event::StockChanged;
pub use movement::{
    MovementId, MovementReference, MovementType, NewMovement, QUANTITY_SCALE, ReferenceKind, StockMovement,
    check_quantity, checked_balance, quantity_limit,
};
pub use snapshot::{SnapshotKey, StockSnapshot};
pub use status::{LowStockProduct, StockStatus, low_stock_products};
