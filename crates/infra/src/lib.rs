//! Infrastructure layer: ledger storage, locking, orchestration and read services.

pub mod catalog;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod ledger_store;
pub mod locks;
pub mod query_service;
pub mod reconcile;
pub mod services;


pub use catalog::{InMemoryCatalog, InventoryCatalog, NoReferenceResolution, OpenCatalog, ReferenceResolver};
pub use config::{ConfigError, LedgerConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{StockLedgerService, StockTransfer};
pub use query_service::{InventoryQueryService, KardexEntry, KardexPage, KardexPages};
pub use reconcile::{Discrepancy, ReconciliationReport, reconcile};
pub use services::{
    ConfiguredServices, LedgerServices, build_in_memory_services, build_persistent_services, build_services,
};
