//! Read-side value types and the pure aggregation behind them.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId};

use crate::snapshot::StockSnapshot;

/// Stock position of a product, in one warehouse or across all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStatus {
    pub quantity: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub threshold: Option<Decimal>,
    pub below_threshold: bool,
}

impl StockStatus {
    /// Sum the given snapshots and compare the total against `threshold`.
    ///
    /// No snapshots means nothing has ever moved: all quantities are zero.
    pub fn from_snapshots<'a>(
        snapshots: impl IntoIterator<Item = &'a StockSnapshot>,
        threshold: Option<Decimal>,
    ) -> DomainResult<Self> {
        let mut quantity = Decimal::ZERO;
        let mut reserved = Decimal::ZERO;
        for s in snapshots {
            quantity = sum(quantity, s.quantity)?;
            reserved = sum(reserved, s.reserved)?;
        }
        let available = quantity
            .checked_sub(reserved)
            .ok_or_else(|| DomainError::validation("available quantity overflow"))?;

        Ok(Self {
            quantity,
            reserved,
            available,
            threshold,
            below_threshold: threshold.is_some_and(|t| quantity < t),
        })
    }
}

/// A product whose total quantity is strictly below its minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockProduct {
    pub product_id: ProductId,
    pub total_quantity: Decimal,
    pub threshold: Decimal,
}

impl LowStockProduct {
    pub fn shortfall(&self) -> Decimal {
        self.threshold.saturating_sub(self.total_quantity)
    }
}

/// Aggregate snapshots per product and keep those strictly below their threshold.
///
/// Products with a threshold but no snapshot count as zero on hand. The result is
/// ordered by largest shortfall first, then by product id.
pub fn low_stock_products<'a>(
    snapshots: impl IntoIterator<Item = &'a StockSnapshot>,
    thresholds: impl IntoIterator<Item = (ProductId, Decimal)>,
) -> DomainResult<Vec<LowStockProduct>> {
    let mut totals: BTreeMap<ProductId, Decimal> = BTreeMap::new();
    for s in snapshots {
        let total = totals.entry(s.product_id).or_default();
        *total = sum(*total, s.quantity)?;
    }

    let mut low: Vec<LowStockProduct> = thresholds
        .into_iter()
        .filter_map(|(product_id, threshold)| {
            let total_quantity = totals.get(&product_id).copied().unwrap_or_default();
            (total_quantity < threshold).then_some(LowStockProduct {
                product_id,
                total_quantity,
                threshold,
            })
        })
        .collect();

    low.sort_by(|a, b| {
        b.shortfall()
            .cmp(&a.shortfall())
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    Ok(low)
}

fn sum(total: Decimal, value: Decimal) -> DomainResult<Decimal> {
    total
        .checked_add(value)
        .ok_or_else(|| DomainError::validation("stock total overflow"))
}
