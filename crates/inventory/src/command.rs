//! Ledger commands and their pure validation rules.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId, TenantId, UserId, WarehouseId};

use crate::movement::{MovementReference, MovementType, check_quantity};
use crate::snapshot::SnapshotKey;

/// Normalize a caller-supplied idempotency key: blank means "no dedup".
pub fn normalize_idempotency_key(key: Option<&str>) -> Option<String> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Direction of a manual adjustment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// `In → +|quantity|`, `Out → -|quantity|`.
    pub fn signed(self, quantity: Decimal) -> Decimal {
        match self {
            Direction::In => quantity.abs(),
            Direction::Out => -quantity.abs(),
        }
    }

    pub fn movement_type(self) -> MovementType {
        match self {
            Direction::In => MovementType::In,
            Direction::Out => MovementType::Out,
        }
    }
}

/// Command: AdjustStock (manual stock screens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Magnitude; the sign is ignored in favour of `direction`.
    pub quantity: Decimal,
    pub direction: Direction,
    pub user_id: UserId,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl AdjustStock {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.warehouse_id)
    }

    pub fn delta(&self) -> Decimal {
        self.direction.signed(self.quantity)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity.is_zero() {
            return Err(DomainError::validation("adjustment quantity cannot be zero"));
        }
        check_quantity("adjustment quantity", self.quantity)
    }
}

/// Command: TransferStock between two warehouses of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub quantity: Decimal,
    pub user_id: UserId,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl TransferStock {
    pub fn source(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.from_warehouse)
    }

    pub fn destination(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.to_warehouse)
    }

    /// Both keys in lock order (lower warehouse id first).
    pub fn lock_order(&self) -> [SnapshotKey; 2] {
        let (a, b) = (self.source(), self.destination());
        if a <= b { [a, b] } else { [b, a] }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.from_warehouse == self.to_warehouse {
            return Err(DomainError::invalid_transfer(
                "source and destination warehouse must differ",
            ));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }
        check_quantity("transfer quantity", self.quantity)
    }
}

/// Command: RecordMovement, the entry point for sales, purchasing and returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Signed as given by the caller.
    pub quantity: Decimal,
    pub movement_type: MovementType,
    pub reference: Option<MovementReference>,
    pub user_id: UserId,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    /// Compensating entries may take the balance below zero.
    pub compensating: bool,
}

impl RecordMovement {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.warehouse_id)
    }

    pub fn allow_negative(&self) -> bool {
        self.compensating
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity.is_zero() {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }
        check_quantity("movement quantity", self.quantity)?;
        if self.movement_type.is_transfer() {
            return Err(DomainError::validation(
                "transfer legs can only be recorded through a transfer",
            ));
        }
        if let Some(reference) = &self.reference {
            if reference.id.trim().is_empty() {
                return Err(DomainError::validation("reference id cannot be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer(from: WarehouseId, to: WarehouseId, quantity: Decimal) -> TransferStock {
        TransferStock {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            from_warehouse: from,
            to_warehouse: to,
            quantity,
            user_id: UserId::new(),
            description: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn direction_normalizes_sign() {
        assert_eq!(Direction::In.signed(dec!(-5)), dec!(5));
        assert_eq!(Direction::Out.signed(dec!(5)), dec!(-5));
        assert_eq!(Direction::Out.signed(dec!(-5)), dec!(-5));
    }

    #[test]
    fn blank_idempotency_keys_mean_no_dedup() {
        assert_eq!(normalize_idempotency_key(None), None);
        assert_eq!(normalize_idempotency_key(Some("   ")), None);
        assert_eq!(normalize_idempotency_key(Some(" abc123 ")), Some("abc123".to_string()));
    }

    #[test]
    fn transfer_to_same_warehouse_is_invalid() {
        let w = WarehouseId::new();
        let err = transfer(w, w, dec!(1)).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransfer(_)));
    }

    #[test]
    fn transfer_requires_positive_quantity() {
        let err = transfer(WarehouseId::new(), WarehouseId::new(), dec!(0)).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(transfer(WarehouseId::new(), WarehouseId::new(), dec!(-1)).validate().is_err());
    }

    #[test]
    fn commands_reject_quantities_beyond_storage_precision() {
        assert!(transfer(WarehouseId::new(), WarehouseId::new(), dec!(0.000001)).validate().is_ok());
        let err = transfer(WarehouseId::new(), WarehouseId::new(), dec!(1.0000004))
            .validate()
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let adjust = AdjustStock {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            quantity: dec!(0.0000001),
            direction: Direction::In,
            user_id: UserId::new(),
            description: None,
            idempotency_key: None,
        };
        assert!(adjust.validate().is_err());
        assert!(AdjustStock { quantity: Decimal::MAX, ..adjust }.validate().is_err());
    }

    #[test]
    fn lock_order_is_independent_of_direction() {
        let low = WarehouseId::from_uuid(Uuid::from_u128(1));
        let high = WarehouseId::from_uuid(Uuid::from_u128(2));

        let forward = transfer(low, high, dec!(1));
        let mut backward = forward.clone();
        backward.from_warehouse = high;
        backward.to_warehouse = low;

        let f = forward.lock_order();
        let b = backward.lock_order();
        assert_eq!(f[0].warehouse_id, low);
        assert_eq!(b[0].warehouse_id, low);
        assert_eq!(f, b);
    }

    #[test]
    fn record_movement_rejects_transfer_types() {
        let cmd = RecordMovement {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            quantity: dec!(1),
            movement_type: MovementType::TransferIn,
            reference: None,
            user_id: UserId::new(),
            description: None,
            idempotency_key: None,
            compensating: false,
        };
        assert!(cmd.validate().is_err());

        let sale = RecordMovement {
            movement_type: MovementType::Sale,
            quantity: dec!(-2.12345678),
            ..cmd
        };
        assert!(matches!(sale.validate(), Err(DomainError::Validation(msg)) if msg.contains("decimal places")));
    }
}
