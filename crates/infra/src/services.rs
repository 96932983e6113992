//! Wiring of the ledger and query services from `LedgerConfig`.
//!
//! `USE_PERSISTENT_STORES` picks the backend: the in-memory store by default, Postgres
//! (connected and migrated) when set. Both services share one store handle, so the read
//! side sees every commit of the write side.

use stockledger_events::EventBus;
use stockledger_inventory::StockChanged;

use crate::catalog::InventoryCatalog;
use crate::config::LedgerConfig;
use crate::ledger::StockLedgerService;
use crate::ledger_store::{InMemoryLedgerStore, PostgresLedgerStore, StoreError};
use crate::query_service::InventoryQueryService;

/// Write and read services over one store.
pub struct LedgerServices<S, C, B> {
    pub ledger: StockLedgerService<S, C, B>,
    pub queries: InventoryQueryService<S, C>,
}

impl<S, C, B> LedgerServices<S, C, B>
where
    S: Clone,
    C: Clone,
{
    pub fn new(store: S, catalog: C, bus: B, config: &LedgerConfig) -> Self {
        Self {
            queries: InventoryQueryService::from_config(store.clone(), catalog.clone(), config),
            ledger: StockLedgerService::new(store, catalog, bus),
        }
    }
}

/// Services over whichever backend the configuration selected.
pub enum ConfiguredServices<C, B> {
    InMemory(LedgerServices<InMemoryLedgerStore, C, B>),
    Postgres(LedgerServices<PostgresLedgerStore, C, B>),
}

impl<C, B> ConfiguredServices<C, B> {
    pub fn is_persistent(&self) -> bool {
        matches!(self, ConfiguredServices::Postgres(_))
    }
}

pub fn build_in_memory_services<C, B>(
    config: &LedgerConfig,
    catalog: C,
    bus: B,
) -> LedgerServices<InMemoryLedgerStore, C, B>
where
    C: InventoryCatalog + Clone,
    B: EventBus<StockChanged>,
{
    LedgerServices::new(InMemoryLedgerStore::from_config(config), catalog, bus, config)
}

pub async fn build_persistent_services<C, B>(
    config: &LedgerConfig,
    catalog: C,
    bus: B,
) -> Result<LedgerServices<PostgresLedgerStore, C, B>, StoreError>
where
    C: InventoryCatalog + Clone,
    B: EventBus<StockChanged>,
{
    let store = PostgresLedgerStore::connect(config).await?;
    store.ensure_schema().await?;
    Ok(LedgerServices::new(store, catalog, bus, config))
}

/// Build the services for `config`, connecting to Postgres when persistence is enabled.
pub async fn build_services<C, B>(
    config: &LedgerConfig,
    catalog: C,
    bus: B,
) -> Result<ConfiguredServices<C, B>, StoreError>
where
    C: InventoryCatalog + Clone,
    B: EventBus<StockChanged>,
{
    if config.use_persistent_stores {
        tracing::info!(max_connections = config.max_connections, "using postgres ledger store");
        Ok(ConfiguredServices::Postgres(
            build_persistent_services(config, catalog, bus).await?,
        ))
    } else {
        tracing::info!("using in-memory ledger store");
        Ok(ConfiguredServices::InMemory(build_in_memory_services(config, catalog, bus)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, TenantId, UserId, WarehouseId};
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{AdjustStock, Direction};

    use crate::catalog::OpenCatalog;
    use crate::ledger_store::{MovementFilter, Pagination, SortOrder};

    fn config(vars: &'static [(&'static str, &'static str)]) -> LedgerConfig {
        LedgerConfig::from_lookup(|name| {
            vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn default_config_selects_the_in_memory_store() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let bus = Arc::new(InMemoryEventBus::<StockChanged>::new());
        let services = rt.block_on(build_services(&config(&[]), OpenCatalog, bus)).unwrap();
        assert!(!services.is_persistent());
    }

    #[test]
    fn persistence_without_a_database_is_unavailable() {
        let mut cfg = config(&[]);
        cfg.use_persistent_stores = true;

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let bus = Arc::new(InMemoryEventBus::<StockChanged>::new());
        let result = rt.block_on(build_services(&cfg, OpenCatalog, bus));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn in_memory_services_share_the_store_and_the_page_cap() {
        let cfg = config(&[("STOCK_KARDEX_MAX_PAGE_SIZE", "1")]);
        let services = build_in_memory_services(&cfg, OpenCatalog, InMemoryEventBus::<StockChanged>::new());
        let (tenant, product, warehouse) = (TenantId::new(), ProductId::new(), WarehouseId::new());

        for _ in 0..2 {
            services
                .ledger
                .adjust_stock(AdjustStock {
                    tenant_id: tenant,
                    product_id: product,
                    warehouse_id: warehouse,
                    quantity: dec!(3),
                    direction: Direction::In,
                    user_id: UserId::new(),
                    description: None,
                    idempotency_key: None,
                })
                .unwrap();
        }

        let page = services
            .queries
            .kardex(tenant, &MovementFilter::default(), SortOrder::Desc, Pagination::default())
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].movement.after_qty, dec!(6));
    }
}
