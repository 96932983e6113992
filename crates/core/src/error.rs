//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{ProductId, WarehouseId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (malformed input, stock rules).
/// Storage and concurrency failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. zero quantity, unknown warehouse).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A transfer request is malformed (e.g. source equals destination).
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Applying the change would leave the on-hand quantity below zero.
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

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transfer(msg: impl Into<String>) -> Self {
        Self::InvalidTransfer(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn insufficient_stock(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        on_hand: Decimal,
        requested: Decimal,
    ) -> Self {
        Self::InsufficientStock {
            product_id,
            warehouse_id,
            on_hand,
            requested,
        }
    }

    /// True for failures caused by malformed caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidTransfer(_) | Self::InvalidId(_)
        )
    }
}
