//! Errors surfaced at the ledger operation boundary.

use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::{DomainError, ProductId, WarehouseId};

use crate::ledger_store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Typed failure of an adjust/transfer/record operation.
///
/// Every variant is returned after the enclosing transaction was rolled back:
/// no movement row and no snapshot change survive a failed attempt.
///
/// - `Validation` / `InvalidTransfer`: caller must fix the input
/// - `InsufficientStock`: business rule; retrying without intervention fails again
/// - `DuplicateIdempotencyKeyInFlight`: the original request did not finish in time; retryable
/// - `StorageFailure`: persistence unavailable or timed out; retryable
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error(
        "insufficient stock for product {product_id} in warehouse {warehouse_id} \
         (on hand: {on_hand}, change: {requested})"
    )]
    InsufficientStock {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        on_hand: Decimal,
        requested: Decimal,
    },

    #[error("idempotency key '{key}' is still being applied by another request")]
    DuplicateIdempotencyKeyInFlight { key: String },

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the same request may succeed when simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateIdempotencyKeyInFlight { .. } | LedgerError::StorageFailure(_)
        )
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidTransfer(msg) => LedgerError::InvalidTransfer(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InsufficientStock {
                product_id,
                warehouse_id,
                on_hand,
                requested,
            } => LedgerError::InsufficientStock {
                product_id,
                warehouse_id,
                on_hand,
                requested,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LedgerError::StorageFailure(StoreError::Unavailable("down".into())).is_retryable());
        assert!(LedgerError::DuplicateIdempotencyKeyInFlight { key: "k".into() }.is_retryable());
        assert!(!LedgerError::validation("bad").is_retryable());
        assert!(
            !LedgerError::from(DomainError::insufficient_stock(
                ProductId::new(),
                WarehouseId::new(),
                Decimal::ONE,
                Decimal::NEGATIVE_ONE,
            ))
            .is_retryable()
        );
    }

    #[test]
    fn invalid_id_maps_to_validation() {
        let err = LedgerError::from(DomainError::invalid_id("WarehouseId: bad"));
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
