//! Master-data seam: products, warehouses and their stock thresholds.
//!
//! The ledger never owns master data. It only asks whether an identifier is known
//! (unknown ones are rejected before any lock is taken) and which minimum applies to a
//! product. Lifecycle stays with whoever implements [`InventoryCatalog`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use stockledger_core::{ProductId, TenantId, WarehouseId};
use stockledger_inventory::MovementReference;

use crate::ledger_store::StoreError;

pub trait InventoryCatalog: Send + Sync {
    fn product_exists(&self, tenant_id: TenantId, product_id: ProductId) -> Result<bool, StoreError>;

    fn warehouse_exists(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Result<bool, StoreError>;

    /// Configured minimum for a product, if any.
    fn min_stock(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<Decimal>, StoreError>;

    /// Every product of the tenant that has a minimum configured.
    fn min_stock_levels(&self, tenant_id: TenantId) -> Result<Vec<(ProductId, Decimal)>, StoreError>;
}

impl<C> InventoryCatalog for Arc<C>
where
    C: InventoryCatalog + ?Sized,
{
    fn product_exists(&self, tenant_id: TenantId, product_id: ProductId) -> Result<bool, StoreError> {
        (**self).product_exists(tenant_id, product_id)
    }

    fn warehouse_exists(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Result<bool, StoreError> {
        (**self).warehouse_exists(tenant_id, warehouse_id)
    }

    fn min_stock(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<Decimal>, StoreError> {
        (**self).min_stock(tenant_id, product_id)
    }

    fn min_stock_levels(&self, tenant_id: TenantId) -> Result<Vec<(ProductId, Decimal)>, StoreError> {
        (**self).min_stock_levels(tenant_id)
    }
}

#[derive(Debug, Default)]
struct CatalogData {
    products: HashMap<(TenantId, ProductId), Option<Decimal>>,
    warehouses: HashSet<(TenantId, WarehouseId)>,
}

/// In-memory catalog for tests/dev and embedding.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogData>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or update) a product and its minimum stock level.
    pub fn add_product(&self, tenant_id: TenantId, product_id: ProductId, min_stock: Option<Decimal>) {
        self.data.write().products.insert((tenant_id, product_id), min_stock);
    }

    pub fn add_warehouse(&self, tenant_id: TenantId, warehouse_id: WarehouseId) {
        self.data.write().warehouses.insert((tenant_id, warehouse_id));
    }
}

impl InventoryCatalog for InMemoryCatalog {
    fn product_exists(&self, tenant_id: TenantId, product_id: ProductId) -> Result<bool, StoreError> {
        Ok(self.data.read().products.contains_key(&(tenant_id, product_id)))
    }

    fn warehouse_exists(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Result<bool, StoreError> {
        Ok(self.data.read().warehouses.contains(&(tenant_id, warehouse_id)))
    }

    fn min_stock(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<Decimal>, StoreError> {
        Ok(self.data.read().products.get(&(tenant_id, product_id)).copied().flatten())
    }

    fn min_stock_levels(&self, tenant_id: TenantId) -> Result<Vec<(ProductId, Decimal)>, StoreError> {
        let data = self.data.read();
        let mut levels: Vec<(ProductId, Decimal)> = data
            .products
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .filter_map(|((_, product), min)| min.map(|m| (*product, m)))
            .collect();
        levels.sort_by_key(|(product, _)| *product);
        Ok(levels)
    }
}

/// Catalog that accepts every identifier and configures no thresholds.
///
/// For deployments where master data is validated upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCatalog;

impl InventoryCatalog for OpenCatalog {
    fn product_exists(&self, _tenant_id: TenantId, _product_id: ProductId) -> Result<bool, StoreError> {
        Ok(true)
    }

    fn warehouse_exists(&self, _tenant_id: TenantId, _warehouse_id: WarehouseId) -> Result<bool, StoreError> {
        Ok(true)
    }

    fn min_stock(&self, _tenant_id: TenantId, _product_id: ProductId) -> Result<Option<Decimal>, StoreError> {
        Ok(None)
    }

    fn min_stock_levels(&self, _tenant_id: TenantId) -> Result<Vec<(ProductId, Decimal)>, StoreError> {
        Ok(Vec::new())
    }
}

/// Turns a movement reference into a display label for the kardex.
pub trait ReferenceResolver: Send + Sync {
    fn resolve(&self, tenant_id: TenantId, reference: &MovementReference) -> Option<String>;
}

/// Labels every reference as `kind:id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferenceResolution;

impl ReferenceResolver for NoReferenceResolution {
    fn resolve(&self, _tenant_id: TenantId, reference: &MovementReference) -> Option<String> {
        Some(format!("{}:{}", reference.kind.as_str(), reference.id))
    }
}

impl<R> ReferenceResolver for Arc<R>
where
    R: ReferenceResolver + ?Sized,
{
    fn resolve(&self, tenant_id: TenantId, reference: &MovementReference) -> Option<String> {
        (**self).resolve(tenant_id, reference)
    }
}
