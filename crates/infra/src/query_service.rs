//! Read side: stock status, low-stock list and kardex.
//!
//! Reads committed state only and never takes a row lock. Movement rows are immutable and
//! a snapshot is always read as a whole committed row.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::{ProductId, TenantId, WarehouseId};
use stockledger_inventory::{
    LowStockProduct, SnapshotKey, StockMovement, StockSnapshot, StockStatus, low_stock_products,
};

use crate::catalog::{InventoryCatalog, NoReferenceResolution, ReferenceResolver};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger_store::{
    MAX_PAGE_SIZE, MovementFilter, MovementReader, Pagination, SnapshotReader, SortOrder,
};

/// One kardex line: the movement plus its resolved reference label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KardexEntry {
    pub movement: StockMovement,
    pub reference_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KardexPage {
    pub entries: Vec<KardexEntry>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

pub struct InventoryQueryService<R, C, X = NoReferenceResolution> {
    reader: R,
    catalog: C,
    resolver: X,
    max_page_size: u32,
}

impl<R, C> InventoryQueryService<R, C, NoReferenceResolution> {
    pub fn new(reader: R, catalog: C) -> Self {
        Self {
            reader,
            catalog,
            resolver: NoReferenceResolution,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    /// Like `new`, with the kardex page cap taken from `STOCK_KARDEX_MAX_PAGE_SIZE`.
    pub fn from_config(reader: R, catalog: C, config: &LedgerConfig) -> Self {
        Self::new(reader, catalog).with_max_page_size(config.kardex_max_page_size)
    }
}

impl<R, C, X> InventoryQueryService<R, C, X> {
    pub fn with_resolver<Y>(self, resolver: Y) -> InventoryQueryService<R, C, Y> {
        InventoryQueryService {
            reader: self.reader,
            catalog: self.catalog,
            resolver,
            max_page_size: self.max_page_size,
        }
    }

    /// Cap applied to every requested page size.
    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }
}

impl<R, C, X> InventoryQueryService<R, C, X>
where
    R: MovementReader + SnapshotReader,
    C: InventoryCatalog,
    X: ReferenceResolver,
{
    /// Products whose total quantity across warehouses is strictly below their minimum,
    /// largest shortfall first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub fn get_low_stock_products(&self, tenant_id: TenantId) -> LedgerResult<Vec<LowStockProduct>> {
        let thresholds = self.catalog.min_stock_levels(tenant_id)?;
        if thresholds.is_empty() {
            return Ok(Vec::new());
        }
        let snapshots = self.reader.snapshots_for_tenant(tenant_id)?;
        Ok(low_stock_products(&snapshots, thresholds)?)
    }

    /// Quantity, reserved and available for one warehouse, or summed over all of them
    /// when `warehouse_id` is `None`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id))]
    pub fn get_stock_status(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: Option<WarehouseId>,
    ) -> LedgerResult<StockStatus> {
        let threshold = self.catalog.min_stock(tenant_id, product_id)?;
        let snapshots: Vec<StockSnapshot> = match warehouse_id {
            Some(warehouse_id) => self
                .reader
                .snapshot(SnapshotKey::new(tenant_id, product_id, warehouse_id))?
                .into_iter()
                .collect(),
            None => self.reader.snapshots_for_product(tenant_id, product_id)?,
        };
        Ok(StockStatus::from_snapshots(&snapshots, threshold)?)
    }

    /// One page of movement history ordered by `(created_at, id)`.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id, order = ?order))]
    pub fn kardex(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> LedgerResult<KardexPage> {
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(LedgerError::validation("date_from must not be after date_to"));
            }
        }

        let pagination = pagination.capped(self.max_page_size);
        let page = self.reader.query(tenant_id, filter, order, pagination)?;

        let entries = page
            .movements
            .into_iter()
            .map(|movement| KardexEntry {
                reference_label: movement
                    .reference
                    .as_ref()
                    .and_then(|r| self.resolver.resolve(tenant_id, r)),
                movement,
            })
            .collect();

        Ok(KardexPage {
            entries,
            total: page.total,
            pagination: page.pagination,
            has_more: page.has_more,
        })
    }

    /// Lazy page sequence over the same query; nothing is read until the first `next()`.
    pub fn kardex_pages(
        &self,
        tenant_id: TenantId,
        filter: MovementFilter,
        order: SortOrder,
        page_size: u32,
    ) -> KardexPages<'_, R, C, X> {
        KardexPages {
            service: self,
            tenant_id,
            filter,
            order,
            page_size: page_size.clamp(1, self.max_page_size),
            next_offset: Some(0),
        }
    }
}

/// Finite, restartable iterator over kardex pages.
///
/// Ends after the page reporting `has_more == false`, or after the first error.
/// An empty history yields a single empty page.
pub struct KardexPages<'a, R, C, X> {
    service: &'a InventoryQueryService<R, C, X>,
    tenant_id: TenantId,
    filter: MovementFilter,
    order: SortOrder,
    page_size: u32,
    next_offset: Option<u32>,
}

impl<R, C, X> KardexPages<'_, R, C, X> {
    /// Rewind to the first page. Pages are re-read, so rows committed since are included.
    pub fn restart(&mut self) {
        self.next_offset = Some(0);
    }
}

impl<R, C, X> Iterator for KardexPages<'_, R, C, X>
where
    R: MovementReader + SnapshotReader,
    C: InventoryCatalog,
    X: ReferenceResolver,
{
    type Item = LedgerResult<KardexPage>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next_offset.take()?;
        let pagination = Pagination {
            limit: self.page_size,
            offset,
        };

        let page = self.service.kardex(self.tenant_id, &self.filter, self.order, pagination);
        if let Ok(page) = &page {
            if page.has_more {
                self.next_offset = offset.checked_add(page.entries.len() as u32);
            }
        }
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::UserId;
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{AdjustStock, Direction, MovementReference, MovementType, RecordMovement};

    use crate::catalog::InMemoryCatalog;
    use crate::ledger::StockLedgerService;
    use crate::ledger_store::InMemoryLedgerStore;
    use std::sync::Arc;

    struct Fixture {
        tenant: TenantId,
        product: ProductId,
        warehouses: [WarehouseId; 2],
        catalog: Arc<InMemoryCatalog>,
        store: InMemoryLedgerStore,
    }

    impl Fixture {
        fn new(min_stock: Option<rust_decimal::Decimal>) -> Self {
            let tenant = TenantId::new();
            let product = ProductId::new();
            let warehouses = [WarehouseId::new(), WarehouseId::new()];
            let catalog = Arc::new(InMemoryCatalog::new());
            catalog.add_product(tenant, product, min_stock);
            for w in warehouses {
                catalog.add_warehouse(tenant, w);
            }
            Self {
                tenant,
                product,
                warehouses,
                catalog,
                store: InMemoryLedgerStore::default(),
            }
        }

        fn ledger(&self) -> StockLedgerService<InMemoryLedgerStore, Arc<InMemoryCatalog>, InMemoryEventBus<stockledger_inventory::StockChanged>> {
            StockLedgerService::new(self.store.clone(), Arc::clone(&self.catalog), InMemoryEventBus::new())
        }

        fn queries(&self) -> InventoryQueryService<InMemoryLedgerStore, Arc<InMemoryCatalog>> {
            InventoryQueryService::new(self.store.clone(), Arc::clone(&self.catalog))
        }

        fn receive(&self, warehouse: WarehouseId, quantity: rust_decimal::Decimal) {
            self.ledger()
                .adjust_stock(AdjustStock {
                    tenant_id: self.tenant,
                    product_id: self.product,
                    warehouse_id: warehouse,
                    quantity,
                    direction: Direction::In,
                    user_id: UserId::new(),
                    description: None,
                    idempotency_key: None,
                })
                .unwrap();
        }
    }

    #[test]
    fn status_for_one_warehouse_and_across_all() {
        let fx = Fixture::new(Some(dec!(100)));
        fx.receive(fx.warehouses[0], dec!(30));
        fx.receive(fx.warehouses[1], dec!(20));
        fx.store.set_reserved(
            SnapshotKey::new(fx.tenant, fx.product, fx.warehouses[0]),
            dec!(5),
        );

        let one = fx.queries().get_stock_status(fx.tenant, fx.product, Some(fx.warehouses[0])).unwrap();
        assert_eq!(one.quantity, dec!(30));
        assert_eq!(one.available, dec!(25));

        let all = fx.queries().get_stock_status(fx.tenant, fx.product, None).unwrap();
        assert_eq!(all.quantity, dec!(50));
        assert_eq!(all.reserved, dec!(5));
        assert!(all.below_threshold);
    }

    #[test]
    fn status_of_unmoved_product_is_zero() {
        let fx = Fixture::new(None);
        let status = fx.queries().get_stock_status(fx.tenant, fx.product, None).unwrap();
        assert_eq!(status.quantity, dec!(0));
        assert!(!status.below_threshold);
    }

    #[test]
    fn kardex_resolves_reference_labels() {
        let fx = Fixture::new(None);
        fx.receive(fx.warehouses[0], dec!(10));
        fx.ledger()
            .record_movement(RecordMovement {
                tenant_id: fx.tenant,
                product_id: fx.product,
                warehouse_id: fx.warehouses[0],
                quantity: dec!(-2),
                movement_type: MovementType::Sale,
                reference: Some(MovementReference::sale("S-7")),
                user_id: UserId::new(),
                description: None,
                idempotency_key: None,
                compensating: false,
            })
            .unwrap();

        let page = fx
            .queries()
            .kardex(fx.tenant, &MovementFilter::for_product(fx.product), SortOrder::Desc, Pagination::default())
            .unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].reference_label.as_deref(), Some("sale:S-7"));
        assert_eq!(page.entries[1].reference_label, None);
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let fx = Fixture::new(None);
        let now = chrono::Utc::now();
        let filter = MovementFilter::default().between(Some(now), Some(now - chrono::Duration::days(1)));

        let err = fx
            .queries()
            .kardex(fx.tenant, &filter, SortOrder::Desc, Pagination::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn page_size_is_capped() {
        let fx = Fixture::new(None);
        fx.receive(fx.warehouses[0], dec!(1));

        let page = fx
            .queries()
            .with_max_page_size(10)
            .kardex(fx.tenant, &MovementFilter::default(), SortOrder::Asc, Pagination { limit: 500, offset: 0 })
            .unwrap();
        assert_eq!(page.pagination.limit, 10);
    }

    #[test]
    fn empty_history_yields_one_empty_page() {
        let fx = Fixture::new(None);
        let queries = fx.queries();
        let pages: Vec<_> = queries
            .kardex_pages(fx.tenant, MovementFilter::default(), SortOrder::Desc, 10)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert!(pages[0].entries.is_empty());
    }

    #[test]
    fn configured_page_cap_limits_kardex_pages() {
        let fx = Fixture::new(None);
        for _ in 0..3 {
            fx.receive(fx.warehouses[0], dec!(1));
        }
        let config = LedgerConfig::from_lookup(|name| {
            (name == "STOCK_KARDEX_MAX_PAGE_SIZE").then(|| "2".to_string())
        })
        .unwrap();
        let queries = InventoryQueryService::from_config(fx.store.clone(), Arc::clone(&fx.catalog), &config);

        let page = queries
            .kardex(fx.tenant, &MovementFilter::default(), SortOrder::Asc, Pagination { limit: 50, offset: 0 })
            .unwrap();
        assert_eq!(page.pagination.limit, 2);
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);

        let sizes: Vec<usize> = queries
            .kardex_pages(fx.tenant, MovementFilter::default(), SortOrder::Asc, 100)
            .map(|p| p.unwrap().entries.len())
            .collect();
        assert_eq!(sizes, vec![2, 1]);
    }
}
