//! Filtering, ordering and pagination for movement history reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{MovementType, StockMovement};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Clamp the limit to `max` (never below one).
    pub fn capped(self, max: u32) -> Self {
        Self {
            limit: self.limit.clamp(1, max.max(1)),
            offset: self.offset,
        }
    }
}

/// Sort direction on `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter criteria for movement history. All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub movement_type: Option<MovementType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn in_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn matches(&self, m: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| m.product_id == p)
            && self.warehouse_id.is_none_or(|w| m.warehouse_id == w)
            && self.movement_type.is_none_or(|t| m.movement_type == t)
            && self.date_from.is_none_or(|from| m.created_at >= from)
            && self.date_to.is_none_or(|to| m.created_at <= to)
    }
}

/// One page of movement history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<StockMovement>,
    /// Number of movements matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl MovementPage {
    /// Slice an already filtered and ordered result set.
    pub fn from_sorted(mut all: Vec<StockMovement>, pagination: Pagination) -> Self {
        let total = all.len() as u64;
        let start = (pagination.offset as usize).min(all.len());
        let end = start.saturating_add(pagination.limit as usize).min(all.len());
        let movements: Vec<StockMovement> = all.drain(start..end).collect();

        Self {
            has_more: (end as u64) < total,
            movements,
            total,
            pagination,
        }
    }
}

/// Order movements by `(created_at, id)` in the requested direction.
pub fn sort_movements(movements: &mut [StockMovement], order: SortOrder) {
    movements.sort_by(|a, b| {
        let asc = a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => asc,
            SortOrder::Desc => asc.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_caps_limit() {
        assert_eq!(Pagination::new(Some(5000), None).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
        assert_eq!(Pagination::new(None, Some(7)), Pagination { limit: 50, offset: 7 });
        assert_eq!(Pagination::new(Some(500), None).capped(100).limit, 100);
    }

    #[test]
    fn default_order_is_descending() {
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }
}
