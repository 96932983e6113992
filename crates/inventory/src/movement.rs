use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{DomainError, DomainResult, ProductId, TenantId, UserId, WarehouseId};

use crate::snapshot::SnapshotKey;

/// Fractional digits a quantity may carry; matches the storage column scale.
pub const QUANTITY_SCALE: u32 = 6;

/// Exclusive bound on the magnitude of a quantity or running balance (10^14).
pub fn quantity_limit() -> Decimal {
    Decimal::from(100_000_000_000_000i64)
}

/// Reject quantities the ledger cannot store exactly.
pub fn check_quantity(what: &str, value: Decimal) -> DomainResult<()> {
    if value.normalize().scale() > QUANTITY_SCALE {
        return Err(DomainError::validation(format!(
            "{what} ({value}) has more than {QUANTITY_SCALE} decimal places"
        )));
    }
    if value.abs() >= quantity_limit() {
        return Err(DomainError::validation(format!("{what} ({value}) is out of range")));
    }
    Ok(())
}

/// `before + delta`, failing instead of overflowing the ledger's range.
pub fn checked_balance(before: Decimal, delta: Decimal) -> DomainResult<Decimal> {
    before
        .checked_add(delta)
        .filter(|after| after.abs() < quantity_limit())
        .ok_or_else(|| DomainError::validation(format!("quantity overflow: {before} + {delta}")))
}

/// Store-assigned movement identifier.
///
/// Monotonically increasing per store; used as the pagination tie-breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub i64);

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of ledger entry.
///
/// Direction is never inferred from the type: the sign of `quantity` carries it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    TransferIn,
    TransferOut,
    Sale,
    Return,
    Purchase,
}

impl MovementType {
    pub const ALL: [MovementType; 8] = [
        MovementType::In,
        MovementType::Out,
        MovementType::Adjustment,
        MovementType::TransferIn,
        MovementType::TransferOut,
        MovementType::Sale,
        MovementType::Return,
        MovementType::Purchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::Purchase => "purchase",
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, MovementType::TransferIn | MovementType::TransferOut)
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// What kind of business event a movement points at.
///
/// Open enum: unknown kinds survive a round trip through storage as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReferenceKind {
    Sale,
    PurchaseOrder,
    Return,
    Adjustment,
    Transfer,
    Other(String),
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::Sale => "sale",
            ReferenceKind::PurchaseOrder => "purchase_order",
            ReferenceKind::Return => "return",
            ReferenceKind::Adjustment => "adjustment",
            ReferenceKind::Transfer => "transfer",
            ReferenceKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ReferenceKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "sale" => ReferenceKind::Sale,
            "purchase_order" => ReferenceKind::PurchaseOrder,
            "return" => ReferenceKind::Return,
            "adjustment" => ReferenceKind::Adjustment,
            "transfer" => ReferenceKind::Transfer,
            _ => ReferenceKind::Other(value),
        }
    }
}

impl From<ReferenceKind> for String {
    fn from(value: ReferenceKind) -> Self {
        match value {
            ReferenceKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

/// Tagged pointer to the business event that caused a movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceKind,
    pub id: String,
}

impl MovementReference {
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn sale(id: impl Into<String>) -> Self {
        Self::new(ReferenceKind::Sale, id)
    }

    pub fn purchase_order(id: impl Into<String>) -> Self {
        Self::new(ReferenceKind::PurchaseOrder, id)
    }

    /// Transfer-group reference shared by both legs of one transfer.
    pub fn transfer(group: Uuid) -> Self {
        Self::new(ReferenceKind::Transfer, group.to_string())
    }
}

/// A committed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    /// Signed change: positive increases stock, negative decreases it.
    pub quantity: Decimal,
    pub before_qty: Decimal,
    pub after_qty: Decimal,
    pub reference: Option<MovementReference>,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.warehouse_id)
    }
}

/// A movement that has been decided but not yet appended (no id, no timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub before_qty: Decimal,
    pub after_qty: Decimal,
    pub reference: Option<MovementReference>,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
    pub created_by: UserId,
}

impl NewMovement {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tenant_id, self.product_id, self.warehouse_id)
    }

    /// Check the row-level ledger invariant before it is persisted.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity.is_zero() {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }
        check_quantity("quantity", self.quantity)?;
        if checked_balance(self.before_qty, self.quantity)? != self.after_qty {
            return Err(DomainError::validation(format!(
                "after_qty ({}) must equal before_qty ({}) + quantity ({})",
                self.after_qty, self.before_qty, self.quantity
            )));
        }
        Ok(())
    }

    /// Stamp the store-assigned identity onto the entry.
    pub fn into_movement(self, id: MovementId, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            before_qty: self.before_qty,
            after_qty: self.after_qty,
            reference: self.reference,
            idempotency_key: self.idempotency_key,
            description: self.description,
            created_by: self.created_by,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_movement(quantity: Decimal, before: Decimal, after: Decimal) -> NewMovement {
        NewMovement {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            movement_type: MovementType::In,
            quantity,
            before_qty: before,
            after_qty: after,
            reference: None,
            idempotency_key: None,
            description: None,
            created_by: UserId::new(),
        }
    }

    #[test]
    fn validate_accepts_consistent_row() {
        assert!(new_movement(dec!(50), dec!(0), dec!(50)).validate().is_ok());
        assert!(new_movement(dec!(-2.5), dec!(10), dec!(7.5)).validate().is_ok());
    }

    #[test]
    fn validate_rejects_broken_arithmetic() {
        let err = new_movement(dec!(5), dec!(0), dec!(6)).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn validate_rejects_overflowing_balance() {
        let err = new_movement(Decimal::MAX, Decimal::MAX, Decimal::MAX).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn quantity_precision_is_bounded() {
        assert!(check_quantity("quantity", dec!(1.000001)).is_ok());
        assert!(check_quantity("quantity", dec!(1.500000000)).is_ok());
        assert!(check_quantity("quantity", dec!(99999999999999.999999)).is_ok());

        assert!(matches!(
            check_quantity("quantity", dec!(0.0000001)),
            Err(DomainError::Validation(msg)) if msg.contains("decimal places")
        ));
        assert!(check_quantity("quantity", dec!(1.0000004)).is_err());
        assert!(check_quantity("quantity", dec!(100000000000000)).is_err());
        assert!(check_quantity("quantity", Decimal::MIN).is_err());
    }

    #[test]
    fn checked_balance_reports_overflow() {
        assert_eq!(checked_balance(dec!(10), dec!(-4)).unwrap(), dec!(6));
        let err = checked_balance(Decimal::MAX, dec!(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("quantity overflow")));
        assert!(checked_balance(dec!(90000000000000), dec!(10000000000000)).is_err());
    }

    #[test]
    fn validate_rejects_zero_quantity() {
        assert!(new_movement(dec!(0), dec!(3), dec!(3)).validate().is_err());
    }

    #[test]
    fn movement_type_parses_its_own_names() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
        assert!("teleport".parse::<MovementType>().is_err());
    }

    #[test]
    fn movement_type_serializes_snake_case() {
        let json = serde_json::to_string(&MovementType::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
    }

    #[test]
    fn reference_kind_keeps_unknown_kinds() {
        let r = MovementReference::new(ReferenceKind::from("stocktake".to_string()), "42");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["kind"], "stocktake");

        let back: MovementReference = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, ReferenceKind::Other("stocktake".to_string()));

        let sale: MovementReference =
            serde_json::from_str(r#"{"kind":"sale","id":"S-1"}"#).unwrap();
        assert_eq!(sale, MovementReference::sale("S-1"));
    }
}
