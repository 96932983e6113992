//! Stock mutation pipeline.
//!
//! Every operation runs as one transaction over the ledger store:
//!
//! ```text
//! Command
//!   ↓
//! 1. Validate input and check master data (no transaction yet)
//!   ↓
//! 2. Begin; reserve the idempotency key or return the movement(s) it produced
//!   ↓
//! 3. Lock the affected snapshot row(s), in key order
//!   ↓
//! 4. Apply the delta(s) and append the movement(s)
//!   ↓
//! 5. Commit, then publish `StockChanged`
//! ```
//!
//! Any error before commit drops the transaction, which discards staged writes and
//! releases locks and the idempotency reservation. The idempotency key is reserved before
//! any row lock is taken, so a request waiting on a duplicate never holds a row.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{ProductId, TenantId, WarehouseId};
use stockledger_events::EventBus;
use stockledger_inventory::{
    AdjustStock, MovementReference, MovementType, NewMovement, RecordMovement, ReferenceKind,
    StockChanged, StockMovement, TransferStock, normalize_idempotency_key,
};

use crate::catalog::InventoryCatalog;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger_store::{IdempotencyOutcome, LedgerStore, LedgerTransaction, StoreError};

/// Both legs of one committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub transfer_group: Uuid,
    pub out_movement: StockMovement,
    pub in_movement: StockMovement,
}

/// Entry point for every stock mutation.
///
/// - `S`: transactional ledger store
/// - `C`: master-data catalog used to reject unknown products and warehouses
/// - `B`: bus receiving one `StockChanged` per committed operation
#[derive(Debug)]
pub struct StockLedgerService<S, C, B> {
    store: S,
    catalog: C,
    bus: B,
}

impl<S, C, B> StockLedgerService<S, C, B> {
    pub fn new(store: S, catalog: C, bus: B) -> Self {
        Self { store, catalog, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, C, B) {
        (self.store, self.catalog, self.bus)
    }
}

impl<S, C, B> StockLedgerService<S, C, B>
where
    S: LedgerStore,
    C: InventoryCatalog,
    B: EventBus<StockChanged>,
{
    /// Manual stock correction in one warehouse.
    ///
    /// `quantity` is a magnitude; `direction` decides the sign. Fails with
    /// `InsufficientStock` if the result would be negative. Replaying an idempotency key
    /// returns the original movement and changes nothing.
    #[instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            product_id = %cmd.product_id,
            warehouse_id = %cmd.warehouse_id,
            direction = ?cmd.direction
        )
    )]
    pub fn adjust_stock(&self, cmd: AdjustStock) -> LedgerResult<StockMovement> {
        log_rollback("adjust_stock", self.try_adjust(cmd))
    }

    /// Move stock between two warehouses of the same tenant.
    ///
    /// Produces a `transfer_out`/`transfer_in` pair sharing one transfer-group reference,
    /// committed together or not at all.
    #[instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            product_id = %cmd.product_id,
            from_warehouse = %cmd.from_warehouse,
            to_warehouse = %cmd.to_warehouse
        )
    )]
    pub fn transfer_stock(&self, cmd: TransferStock) -> LedgerResult<StockTransfer> {
        log_rollback("transfer_stock", self.try_transfer(cmd))
    }

    /// Record a movement decided by another business flow (sale, purchase, return).
    ///
    /// The sign of `quantity` is taken as given. Negative results are allowed only for
    /// compensating movements.
    #[instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            product_id = %cmd.product_id,
            warehouse_id = %cmd.warehouse_id,
            movement_type = %cmd.movement_type.as_str()
        )
    )]
    pub fn record_movement(&self, cmd: RecordMovement) -> LedgerResult<StockMovement> {
        log_rollback("record_movement", self.try_record(cmd))
    }

    fn try_adjust(&self, cmd: AdjustStock) -> LedgerResult<StockMovement> {
        cmd.validate()?;
        self.ensure_known(cmd.tenant_id, cmd.product_id, &[cmd.warehouse_id])?;
        let idempotency_key = normalize_idempotency_key(cmd.idempotency_key.as_deref());

        let mut tx = self.store.begin()?;
        if let Some(key) = &idempotency_key {
            if let IdempotencyOutcome::AlreadyApplied(existing) = tx.check_or_reserve(cmd.tenant_id, key)? {
                ensure_replay_shape(&existing, key, "adjustment", |t| {
                    matches!(t, MovementType::In | MovementType::Out)
                })?;
                tracing::debug!(movement_id = existing.id.0, "idempotent replay of adjustment");
                return Ok(existing);
            }
        }

        let quantity = cmd.delta();
        let (before_qty, after_qty) = tx.apply_delta(cmd.key(), quantity, false)?;
        let movement = tx.append(NewMovement {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            movement_type: cmd.direction.movement_type(),
            quantity,
            before_qty,
            after_qty,
            reference: None,
            idempotency_key,
            description: cmd.description,
            created_by: cmd.user_id,
        })?;
        tx.commit()?;

        tracing::info!(
            movement_id = movement.id.0,
            %quantity,
            %after_qty,
            "stock adjusted"
        );
        self.notify(std::slice::from_ref(&movement));
        Ok(movement)
    }

    fn try_transfer(&self, cmd: TransferStock) -> LedgerResult<StockTransfer> {
        cmd.validate()?;
        self.ensure_known(cmd.tenant_id, cmd.product_id, &[cmd.from_warehouse, cmd.to_warehouse])?;
        let idempotency_key = normalize_idempotency_key(cmd.idempotency_key.as_deref());

        let mut tx = self.store.begin()?;
        if let Some(key) = &idempotency_key {
            if let IdempotencyOutcome::AlreadyApplied(existing) = tx.check_or_reserve(cmd.tenant_id, key)? {
                let transfer = replay_transfer(&mut tx, existing, key)?;
                tracing::debug!(
                    transfer_group = %transfer.transfer_group,
                    "idempotent replay of transfer"
                );
                return Ok(transfer);
            }
        }

        for key in cmd.lock_order() {
            tx.lock_snapshot(key)?;
        }

        let (out_before, out_after) = tx.apply_delta(cmd.source(), -cmd.quantity, false)?;
        let (in_before, in_after) = tx.apply_delta(cmd.destination(), cmd.quantity, false)?;

        let transfer_group = Uuid::now_v7();
        let reference = MovementReference::transfer(transfer_group);

        let out_movement = tx.append(NewMovement {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.from_warehouse,
            movement_type: MovementType::TransferOut,
            quantity: -cmd.quantity,
            before_qty: out_before,
            after_qty: out_after,
            reference: Some(reference.clone()),
            idempotency_key,
            description: cmd.description.clone(),
            created_by: cmd.user_id,
        })?;
        let in_movement = tx.append(NewMovement {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.to_warehouse,
            movement_type: MovementType::TransferIn,
            quantity: cmd.quantity,
            before_qty: in_before,
            after_qty: in_after,
            reference: Some(reference),
            idempotency_key: None,
            description: cmd.description,
            created_by: cmd.user_id,
        })?;
        tx.commit()?;

        tracing::info!(
            %transfer_group,
            out_movement_id = out_movement.id.0,
            in_movement_id = in_movement.id.0,
            quantity = %cmd.quantity,
            "stock transferred"
        );
        self.notify(&[out_movement.clone(), in_movement.clone()]);

        Ok(StockTransfer {
            transfer_group,
            out_movement,
            in_movement,
        })
    }

    fn try_record(&self, cmd: RecordMovement) -> LedgerResult<StockMovement> {
        cmd.validate()?;
        self.ensure_known(cmd.tenant_id, cmd.product_id, &[cmd.warehouse_id])?;
        let idempotency_key = normalize_idempotency_key(cmd.idempotency_key.as_deref());

        let mut tx = self.store.begin()?;
        if let Some(key) = &idempotency_key {
            if let IdempotencyOutcome::AlreadyApplied(existing) = tx.check_or_reserve(cmd.tenant_id, key)? {
                ensure_replay_shape(&existing, key, "recorded movement", |t| !t.is_transfer())?;
                tracing::debug!(movement_id = existing.id.0, "idempotent replay of recorded movement");
                return Ok(existing);
            }
        }

        let (before_qty, after_qty) = tx.apply_delta(cmd.key(), cmd.quantity, cmd.allow_negative())?;
        let movement = tx.append(NewMovement {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            movement_type: cmd.movement_type,
            quantity: cmd.quantity,
            before_qty,
            after_qty,
            reference: cmd.reference,
            idempotency_key,
            description: cmd.description,
            created_by: cmd.user_id,
        })?;
        tx.commit()?;

        if after_qty < Decimal::ZERO {
            tracing::warn!(
                movement_id = movement.id.0,
                %after_qty,
                "compensating movement left negative stock"
            );
        }
        tracing::info!(
            movement_id = movement.id.0,
            quantity = %movement.quantity,
            %after_qty,
            "stock movement recorded"
        );
        self.notify(std::slice::from_ref(&movement));
        Ok(movement)
    }

    fn ensure_known(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouses: &[WarehouseId],
    ) -> LedgerResult<()> {
        if !self.catalog.product_exists(tenant_id, product_id)? {
            return Err(LedgerError::validation(format!("unknown product {product_id}")));
        }
        for warehouse_id in warehouses {
            if !self.catalog.warehouse_exists(tenant_id, *warehouse_id)? {
                return Err(LedgerError::validation(format!("unknown warehouse {warehouse_id}")));
            }
        }
        Ok(())
    }

    /// Publish after commit. The write is durable at this point, so a failed publish is
    /// logged rather than returned.
    fn notify(&self, movements: &[StockMovement]) {
        let Some(changed) = StockChanged::from_movements(movements) else {
            return;
        };
        if let Err(err) = self.bus.publish(changed) {
            tracing::warn!(error = ?err, "failed to publish stock change notification");
        }
    }
}

fn log_rollback<T>(operation: &'static str, result: LedgerResult<T>) -> LedgerResult<T> {
    if let Err(LedgerError::StorageFailure(err)) = &result {
        tracing::warn!(operation, error = %err, "rolled back after storage failure");
    }
    result
}

/// A key replayed on a different kind of operation is a caller bug, not a replay.
fn ensure_replay_shape(
    existing: &StockMovement,
    key: &str,
    operation: &str,
    accepts: impl Fn(MovementType) -> bool,
) -> LedgerResult<()> {
    if accepts(existing.movement_type) {
        Ok(())
    } else {
        Err(LedgerError::validation(format!(
            "idempotency key '{key}' was already used by a '{}' movement, not a {operation}",
            existing.movement_type.as_str()
        )))
    }
}

/// Rebuild the pair for a transfer whose `transfer_out` leg carries the key.
fn replay_transfer<T: LedgerTransaction>(
    tx: &mut T,
    out_movement: StockMovement,
    key: &str,
) -> LedgerResult<StockTransfer> {
    ensure_replay_shape(&out_movement, key, "transfer", |t| t == MovementType::TransferOut)?;

    let reference = out_movement
        .reference
        .clone()
        .filter(|r| r.kind == ReferenceKind::Transfer)
        .ok_or_else(|| {
            StoreError::Corrupt(format!(
                "transfer_out movement {} has no transfer-group reference",
                out_movement.id.0
            ))
        })?;
    let transfer_group = Uuid::parse_str(&reference.id)
        .map_err(|e| StoreError::Corrupt(format!("transfer group '{}': {e}", reference.id)))?;

    let in_movement = tx
        .find_by_reference(out_movement.tenant_id, &reference)?
        .into_iter()
        .find(|m| m.movement_type == MovementType::TransferIn)
        .ok_or_else(|| {
            StoreError::Corrupt(format!("transfer group {transfer_group} has no transfer_in leg"))
        })?;

    Ok(StockTransfer {
        transfer_group,
        out_movement,
        in_movement,
    })
}
