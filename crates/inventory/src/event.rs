use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, TenantId, WarehouseId};
use stockledger_events::Event;

use crate::movement::{MovementId, StockMovement};

/// Notification: one ledger operation committed new movements.
///
/// Carries identifiers only; consumers re-read whatever they derive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChanged {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_ids: Vec<WarehouseId>,
    pub movement_ids: Vec<MovementId>,
    pub occurred_at: DateTime<Utc>,
}

impl StockChanged {
    /// Build the notification for movements committed together.
    ///
    /// Returns `None` for an empty batch. All movements must share tenant and product.
    pub fn from_movements(movements: &[StockMovement]) -> Option<Self> {
        let first = movements.first()?;
        let mut warehouse_ids: Vec<WarehouseId> = movements.iter().map(|m| m.warehouse_id).collect();
        warehouse_ids.dedup();

        Some(Self {
            tenant_id: first.tenant_id,
            product_id: first.product_id,
            warehouse_ids,
            movement_ids: movements.iter().map(|m| m.id).collect(),
            occurred_at: movements.iter().map(|m| m.created_at).max().unwrap_or(first.created_at),
        })
    }
}

impl Event for StockChanged {
    fn event_type(&self) -> &'static str {
        "inventory.stock.changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
