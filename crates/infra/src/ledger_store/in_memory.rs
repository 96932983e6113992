use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use stockledger_core::{ProductId, TenantId};
use stockledger_inventory::{
    MovementId, MovementReference, NewMovement, SnapshotKey, StockMovement, StockSnapshot,
};

use super::query::{MovementFilter, MovementPage, Pagination, SortOrder, sort_movements};
use super::r#trait::{
    IdempotencyOutcome, LedgerStore, LedgerTransaction, MovementReader, SnapshotReader, StoreError,
};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::{Claim, IdempotencyGuard, Reservation};
use crate::locks::{KeyGuard, KeyedLocks};

/// Committed state: both tables behind one lock so a commit is observed all at once.
#[derive(Debug, Default)]
struct Tables {
    movements: BTreeMap<MovementId, StockMovement>,
    by_idempotency_key: HashMap<(TenantId, String), MovementId>,
    snapshots: HashMap<SnapshotKey, StockSnapshot>,
}

impl Tables {
    fn find_by_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Option<StockMovement> {
        self.by_idempotency_key
            .get(&(tenant_id, key.to_string()))
            .and_then(|id| self.movements.get(id))
            .cloned()
    }
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
    row_locks: Arc<KeyedLocks<SnapshotKey>>,
    idempotency: IdempotencyGuard,
    lock_timeout: Duration,
    available: AtomicBool,
}

/// In-memory transactional ledger store.
///
/// Intended for tests/dev and single-process embedding. Row locks come from an in-process
/// keyed mutex table; writes are staged per transaction and applied on commit.
/// Cloning yields another handle to the same tables.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl InMemoryLedgerStore {
    /// Use the configured row-lock and idempotency wait bounds.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.lock_timeout, config.idempotency_wait)
    }

    pub fn new(lock_timeout: Duration, idempotency_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                next_id: AtomicI64::new(1),
                row_locks: KeyedLocks::new(),
                idempotency: IdempotencyGuard::new(idempotency_wait),
                lock_timeout,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate an outage: while unavailable, `begin` and `commit` fail with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Set the reserved quantity of a row (reservations are owned by callers).
    pub fn set_reserved(&self, key: SnapshotKey, reserved: Decimal) {
        let mut tables = self.inner.tables.write();
        let snapshot = tables
            .snapshots
            .entry(key)
            .or_insert_with(|| StockSnapshot::empty(key, Utc::now()));
        snapshot.reserved = reserved;
    }

    pub fn movement_count(&self) -> usize {
        self.inner.tables.read().movements.len()
    }

    fn ensure_available(&self, operation: &str) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("in-memory store offline during {operation}")))
        }
    }
}

struct LockedRow {
    _guard: KeyGuard<SnapshotKey>,
    snapshot: StockSnapshot,
}

/// Transaction over [`InMemoryLedgerStore`].
///
/// Row locks and idempotency reservations are released when the transaction is
/// dropped, which for `commit` is after the staged writes are visible.
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryLedgerStore,
    staged: Vec<StockMovement>,
    rows: BTreeMap<SnapshotKey, LockedRow>,
    reservations: Vec<Reservation>,
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx<'a> = InMemoryTransaction<'a>;

    fn begin(&self) -> LedgerResult<Self::Tx<'_>> {
        self.ensure_available("begin")?;
        Ok(InMemoryTransaction {
            store: self,
            staged: Vec::new(),
            rows: BTreeMap::new(),
            reservations: Vec::new(),
        })
    }
}

impl LedgerTransaction for InMemoryTransaction<'_> {
    fn check_or_reserve(&mut self, tenant_id: TenantId, key: &str) -> LedgerResult<IdempotencyOutcome> {
        let tables = &self.store.inner.tables;
        let claim = self
            .store
            .inner
            .idempotency
            .check_or_reserve(tenant_id, key, || {
                Ok(tables.read().find_by_idempotency_key(tenant_id, key))
            })?;

        match claim {
            Claim::AlreadyApplied(existing) => Ok(IdempotencyOutcome::AlreadyApplied(existing)),
            Claim::Reserved(reservation) => {
                self.reservations.push(reservation);
                Ok(IdempotencyOutcome::Reserved)
            }
        }
    }

    fn find_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> LedgerResult<Vec<StockMovement>> {
        let tables = self.store.inner.tables.read();
        let mut found: Vec<StockMovement> = tables
            .movements
            .values()
            .chain(self.staged.iter())
            .filter(|m| m.tenant_id == tenant_id && m.reference.as_ref() == Some(reference))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.id);
        Ok(found)
    }

    fn lock_snapshot(&mut self, key: SnapshotKey) -> LedgerResult<StockSnapshot> {
        if let Some(row) = self.rows.get(&key) {
            return Ok(row.snapshot.clone());
        }

        let guard = self
            .store
            .inner
            .row_locks
            .acquire(key, self.store.inner.lock_timeout)
            .ok_or_else(|| StoreError::Timeout(format!("waiting for stock row lock on {key}")))?;

        let snapshot = self
            .store
            .inner
            .tables
            .read()
            .snapshots
            .get(&key)
            .cloned()
            .unwrap_or_else(|| StockSnapshot::empty(key, Utc::now()));

        self.rows.insert(
            key,
            LockedRow {
                _guard: guard,
                snapshot: snapshot.clone(),
            },
        );
        Ok(snapshot)
    }

    fn save_snapshot(&mut self, snapshot: StockSnapshot) -> LedgerResult<()> {
        let row = self.rows.get_mut(&snapshot.key()).ok_or_else(|| {
            StoreError::InvalidAppend(format!("snapshot {} is not locked by this transaction", snapshot.key()))
        })?;
        row.snapshot = snapshot;
        Ok(())
    }

    fn append(&mut self, movement: NewMovement) -> LedgerResult<StockMovement> {
        movement.validate()?;

        let key = movement.key();
        let row = self.rows.get(&key).ok_or_else(|| {
            StoreError::InvalidAppend(format!("snapshot {key} is not locked by this transaction"))
        })?;
        if row.snapshot.quantity != movement.after_qty {
            return Err(LedgerError::validation(format!(
                "after_qty ({}) does not match the staged snapshot quantity ({})",
                movement.after_qty, row.snapshot.quantity
            )));
        }

        if let Some(idem) = &movement.idempotency_key {
            let taken = self
                .store
                .inner
                .tables
                .read()
                .by_idempotency_key
                .contains_key(&(movement.tenant_id, idem.clone()))
                || self.staged.iter().any(|m| {
                    m.tenant_id == movement.tenant_id && m.idempotency_key.as_ref() == Some(idem)
                });
            if taken {
                return Err(StoreError::Conflict(format!("idempotency key '{idem}' already used")).into());
            }
        }

        let id = MovementId(self.store.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let stored = movement.into_movement(id, Utc::now());
        self.staged.push(stored.clone());
        Ok(stored)
    }

    fn commit(mut self) -> LedgerResult<()> {
        let store = self.store;
        store.ensure_available("commit")?;

        let mut tables = store.inner.tables.write();
        for movement in self.staged.drain(..) {
            if let Some(key) = &movement.idempotency_key {
                tables
                    .by_idempotency_key
                    .insert((movement.tenant_id, key.clone()), movement.id);
            }
            tables.movements.insert(movement.id, movement);
        }
        for (key, row) in &self.rows {
            match tables.snapshots.get_mut(key) {
                // Keep the externally maintained reservation.
                Some(existing) => {
                    let reserved = existing.reserved;
                    *existing = row.snapshot.clone();
                    existing.reserved = reserved;
                }
                None => {
                    tables.snapshots.insert(*key, row.snapshot.clone());
                }
            }
        }
        Ok(())
    }
}

impl MovementReader for InMemoryLedgerStore {
    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        Ok(self.inner.tables.read().find_by_idempotency_key(tenant_id, key))
    }

    fn query(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let mut matching: Vec<StockMovement> = self
            .inner
            .tables
            .read()
            .movements
            .values()
            .filter(|m| m.tenant_id == tenant_id && filter.matches(m))
            .cloned()
            .collect();
        sort_movements(&mut matching, order);
        Ok(MovementPage::from_sorted(matching, pagination))
    }

    fn movements_for(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .inner
            .tables
            .read()
            .movements
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

impl SnapshotReader for InMemoryLedgerStore {
    fn snapshot(&self, key: SnapshotKey) -> Result<Option<StockSnapshot>, StoreError> {
        Ok(self.inner.tables.read().snapshots.get(&key).cloned())
    }

    fn snapshots_for_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        let mut rows: Vec<StockSnapshot> = self
            .inner
            .tables
            .read()
            .snapshots
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.product_id == product_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.key());
        Ok(rows)
    }

    fn snapshots_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<StockSnapshot>, StoreError> {
        let mut rows: Vec<StockSnapshot> = self
            .inner
            .tables
            .read()
            .snapshots
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.key());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{UserId, WarehouseId};
    use stockledger_inventory::MovementType;

    fn test_key() -> SnapshotKey {
        SnapshotKey::new(TenantId::new(), ProductId::new(), WarehouseId::new())
    }

    fn new_movement(key: SnapshotKey, quantity: Decimal, before: Decimal) -> NewMovement {
        NewMovement {
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            movement_type: MovementType::In,
            quantity,
            before_qty: before,
            after_qty: before + quantity,
            reference: None,
            idempotency_key: None,
            description: None,
            created_by: UserId::new(),
        }
    }

    #[test]
    fn commit_publishes_movement_and_snapshot_together() {
        let store = InMemoryLedgerStore::default();
        let key = test_key();

        let mut tx = store.begin().unwrap();
        let (before, after) = tx.apply_delta(key, dec!(50), false).unwrap();
        let m = tx.append(new_movement(key, dec!(50), before)).unwrap();
        assert_eq!(after, dec!(50));

        // Nothing visible before commit.
        assert!(store.snapshot(key).unwrap().is_none());
        assert_eq!(store.movement_count(), 0);

        tx.commit().unwrap();

        assert_eq!(store.snapshot(key).unwrap().unwrap().quantity, dec!(50));
        assert_eq!(store.movements_for(key.tenant_id).unwrap(), vec![m]);
    }

    #[test]
    fn dropping_a_transaction_rolls_back_and_releases_locks() {
        let store = InMemoryLedgerStore::default();
        let key = test_key();

        {
            let mut tx = store.begin().unwrap();
            let (before, _) = tx.apply_delta(key, dec!(5), false).unwrap();
            tx.append(new_movement(key, dec!(5), before)).unwrap();
            assert!(store.inner.row_locks.is_held(&key));
        }

        assert!(!store.inner.row_locks.is_held(&key));
        assert!(store.snapshot(key).unwrap().is_none());
        assert_eq!(store.movement_count(), 0);
    }

    #[test]
    fn append_rejects_inconsistent_arithmetic() {
        let store = InMemoryLedgerStore::default();
        let key = test_key();
        let mut tx = store.begin().unwrap();
        tx.apply_delta(key, dec!(5), false).unwrap();

        let mut bad = new_movement(key, dec!(5), dec!(0));
        bad.after_qty = dec!(6);

        assert!(matches!(tx.append(bad), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn append_requires_a_locked_row() {
        let store = InMemoryLedgerStore::default();
        let mut tx = store.begin().unwrap();
        let err = tx.append(new_movement(test_key(), dec!(1), dec!(0))).unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(StoreError::InvalidAppend(_))));
    }

    #[test]
    fn second_transaction_times_out_on_a_held_row() {
        let store = InMemoryLedgerStore::new(Duration::from_millis(20), Duration::from_millis(20));
        let key = test_key();

        let mut first = store.begin().unwrap();
        first.lock_snapshot(key).unwrap();

        let mut second = store.begin().unwrap();
        let err = second.lock_snapshot(key).unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(StoreError::Timeout(_))));
    }

    #[test]
    fn configured_lock_timeout_bounds_the_wait() {
        let config = LedgerConfig::from_lookup(|name| match name {
            "STOCK_LOCK_TIMEOUT_MS" => Some("15".to_string()),
            _ => None,
        })
        .unwrap();
        let store = InMemoryLedgerStore::from_config(&config);
        let key = test_key();

        let mut first = store.begin().unwrap();
        first.lock_snapshot(key).unwrap();

        let started = std::time::Instant::now();
        let mut second = store.begin().unwrap();
        let err = second.lock_snapshot(key).unwrap_err();

        assert!(matches!(err, LedgerError::StorageFailure(StoreError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn outage_fails_commit_without_partial_writes() {
        let store = InMemoryLedgerStore::default();
        let key = test_key();

        let mut tx = store.begin().unwrap();
        let (before, _) = tx.apply_delta(key, dec!(5), false).unwrap();
        tx.append(new_movement(key, dec!(5), before)).unwrap();

        store.set_available(false);
        assert!(matches!(tx.commit(), Err(LedgerError::StorageFailure(StoreError::Unavailable(_)))));
        store.set_available(true);

        assert!(store.snapshot(key).unwrap().is_none());
        assert_eq!(store.movement_count(), 0);
        assert!(!store.inner.row_locks.is_held(&key));
    }

    #[test]
    fn commit_preserves_external_reservations() {
        let store = InMemoryLedgerStore::default();
        let key = test_key();
        store.set_reserved(key, dec!(3));

        let mut tx = store.begin().unwrap();
        let (before, _) = tx.apply_delta(key, dec!(10), false).unwrap();
        tx.append(new_movement(key, dec!(10), before)).unwrap();
        tx.commit().unwrap();

        let snap = store.snapshot(key).unwrap().unwrap();
        assert_eq!(snap.quantity, dec!(10));
        assert_eq!(snap.available(), dec!(7));
    }
}
