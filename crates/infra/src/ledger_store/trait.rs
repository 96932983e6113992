use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::{ProductId, TenantId};
use stockledger_inventory::{
    MovementReference, NewMovement, SnapshotKey, StockMovement, StockSnapshot,
};

use super::query::{MovementFilter, MovementPage, Pagination, SortOrder};
use crate::error::LedgerResult;

/// Storage-level failure.
///
/// These are **infrastructure errors** (availability, lock waits, constraint violations),
/// as opposed to the deterministic domain errors raised by the ledger rules. Callers see
/// them as the retryable `LedgerError::StorageFailure`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt ledger data: {0}")]
    Corrupt(String),
}

/// Result of presenting an idempotency key inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// The key is unseen and now reserved until the transaction ends.
    Reserved,
    /// A committed movement already carries this key.
    AlreadyApplied(StockMovement),
}

/// One atomic unit of work over movements and snapshots.
///
/// Dropping a transaction without calling [`commit`](LedgerTransaction::commit) rolls it
/// back: staged movements and snapshot changes are discarded, and every lock and
/// idempotency reservation taken by the transaction is released.
pub trait LedgerTransaction {
    /// Claim `key` for this transaction, or return the movement it already produced.
    ///
    /// If another transaction holds the key, waits for it to finish first.
    fn check_or_reserve(&mut self, tenant_id: TenantId, key: &str) -> LedgerResult<IdempotencyOutcome>;

    /// All movements (committed or staged here) carrying `reference`, in id order.
    fn find_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> LedgerResult<Vec<StockMovement>>;

    /// Get-or-create the snapshot row for `key` and hold its lock until the transaction ends.
    ///
    /// Locking an already locked key in the same transaction returns the staged row.
    fn lock_snapshot(&mut self, key: SnapshotKey) -> LedgerResult<StockSnapshot>;

    /// Stage a new state for a row previously returned by `lock_snapshot`.
    fn save_snapshot(&mut self, snapshot: StockSnapshot) -> LedgerResult<()>;

    /// Append a movement; the store assigns `id` and `created_at`.
    ///
    /// Fails with a validation error if `after_qty != before_qty + quantity`.
    fn append(&mut self, movement: NewMovement) -> LedgerResult<StockMovement>;

    fn commit(self) -> LedgerResult<()>
    where
        Self: Sized;

    /// Lock, change and stage one snapshot, returning `(before, after)`.
    ///
    /// Fails with `InsufficientStock` when the result is negative and `allow_negative`
    /// is false; the staged row is left unchanged in that case.
    fn apply_delta(
        &mut self,
        key: SnapshotKey,
        delta: Decimal,
        allow_negative: bool,
    ) -> LedgerResult<(Decimal, Decimal)> {
        let mut snapshot = self.lock_snapshot(key)?;
        let (before, after) = snapshot.apply_delta(delta, allow_negative, Utc::now())?;
        self.save_snapshot(snapshot)?;
        Ok((before, after))
    }
}

/// Transactional ledger storage: the movement table and the snapshot table behind
/// one transaction boundary.
pub trait LedgerStore: Send + Sync {
    type Tx<'a>: LedgerTransaction
    where
        Self: 'a;

    fn begin(&self) -> LedgerResult<Self::Tx<'_>>;
}

/// Read access to committed movements. Rows are immutable, so no locking is needed.
pub trait MovementReader: Send + Sync {
    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Filtered, ordered, paginated history for a tenant.
    fn query(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Every movement of a tenant in ascending id (application) order.
    fn movements_for(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError>;
}

/// Read access to committed snapshots.
pub trait SnapshotReader: Send + Sync {
    fn snapshot(&self, key: SnapshotKey) -> Result<Option<StockSnapshot>, StoreError>;

    fn snapshots_for_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError>;

    fn snapshots_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<StockSnapshot>, StoreError>;
}

impl<S> MovementReader for Arc<S>
where
    S: MovementReader + ?Sized,
{
    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).find_by_idempotency_key(tenant_id, key)
    }

    fn query(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        (**self).query(tenant_id, filter, order, pagination)
    }

    fn movements_for(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_for(tenant_id)
    }
}

impl<S> SnapshotReader for Arc<S>
where
    S: SnapshotReader + ?Sized,
{
    fn snapshot(&self, key: SnapshotKey) -> Result<Option<StockSnapshot>, StoreError> {
        (**self).snapshot(key)
    }

    fn snapshots_for_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        (**self).snapshots_for_product(tenant_id, product_id)
    }

    fn snapshots_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<StockSnapshot>, StoreError> {
        (**self).snapshots_for_tenant(tenant_id)
    }
}
