use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId, TenantId, WarehouseId};

use crate::movement::checked_balance;

/// Identity of one snapshot row and the unit of serialization for mutations.
///
/// The derived ordering (tenant, product, warehouse) is the global lock order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl SnapshotKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            tenant_id,
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.product_id, self.warehouse_id)
    }
}

/// Current on-hand quantity for one (tenant, product, warehouse).
///
/// Always reconcilable to the sum of the movements recorded for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    /// Held for unfulfilled commitments; maintained outside the ledger.
    pub reserved: Decimal,
    /// Incremented once per applied movement.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl StockSnapshot {
    /// A snapshot for a key that has never moved.
    pub fn empty(key: SnapshotKey, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: Decimal::ZERO,
            reserved: Decimal::ZERO,
            version: 0,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.warehouse_id)
    }

    pub fn available(&self) -> Decimal {
        self.quantity.saturating_sub(self.reserved)
    }

    /// Apply a signed change, returning `(before, after)`.
    ///
    /// Leaves `self` untouched when the result would be negative and
    /// `allow_negative` is false, or when it would leave the ledger's numeric range.
    pub fn apply_delta(
        &mut self,
        delta: Decimal,
        allow_negative: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<(Decimal, Decimal)> {
        let before = self.quantity;
        let after = checked_balance(before, delta)?;

        if after < Decimal::ZERO && !allow_negative {
            return Err(DomainError::insufficient_stock(
                self.product_id,
                self.warehouse_id,
                before,
                delta,
            ));
        }

        self.quantity = after;
        self.version += 1;
        self.updated_at = now;
        Ok((before, after))
    }
}
