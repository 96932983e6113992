//! Ledger replay check.
//!
//! Replays every movement of a tenant in application (id) order and compares the result
//! with the stored snapshots. Discrepancies are reported, never repaired: corrections are
//! new compensating movements recorded through the ledger.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::TenantId;
use stockledger_inventory::{MovementId, SnapshotKey};

use crate::ledger_store::{MovementReader, SnapshotReader, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Snapshot quantity differs from the sum of its movements.
    QuantityMismatch {
        key: SnapshotKey,
        snapshot_quantity: Decimal,
        ledger_quantity: Decimal,
    },
    /// A row whose `after_qty` is not `before_qty + quantity`.
    BrokenArithmetic { movement_id: MovementId },
    /// A row whose `before_qty` is not the previous row's `after_qty` for the same key.
    BrokenChain {
        movement_id: MovementId,
        expected_before: Decimal,
        actual_before: Decimal,
    },
    /// Replaying this row takes the running balance outside the decimal range.
    BalanceOverflow { movement_id: MovementId },
    /// Movements exist for a key that has no snapshot row.
    MissingSnapshot { key: SnapshotKey, ledger_quantity: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub tenant_id: TenantId,
    pub movements_checked: usize,
    pub snapshots_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Check that snapshots equal the replayed movement sums and that each key's
/// `before_qty`/`after_qty` chain is unbroken.
#[instrument(skip(reader), fields(tenant_id = %tenant_id))]
pub fn reconcile<R>(reader: &R, tenant_id: TenantId) -> Result<ReconciliationReport, StoreError>
where
    R: MovementReader + SnapshotReader + ?Sized,
{
    let mut movements = reader.movements_for(tenant_id)?;
    movements.sort_by_key(|m| m.id);
    let snapshots = reader.snapshots_for_tenant(tenant_id)?;

    let mut discrepancies = Vec::new();
    let mut replayed: BTreeMap<SnapshotKey, Decimal> = BTreeMap::new();

    for m in &movements {
        if m.before_qty.checked_add(m.quantity) != Some(m.after_qty) {
            discrepancies.push(Discrepancy::BrokenArithmetic { movement_id: m.id });
        }

        let running = replayed.entry(m.key()).or_insert(Decimal::ZERO);
        if m.before_qty != *running {
            discrepancies.push(Discrepancy::BrokenChain {
                movement_id: m.id,
                expected_before: *running,
                actual_before: m.before_qty,
            });
        }
        match running.checked_add(m.quantity) {
            Some(next) => *running = next,
            None => discrepancies.push(Discrepancy::BalanceOverflow { movement_id: m.id }),
        }
    }

    for s in &snapshots {
        let ledger_quantity = replayed.remove(&s.key()).unwrap_or(Decimal::ZERO);
        if s.quantity != ledger_quantity {
            discrepancies.push(Discrepancy::QuantityMismatch {
                key: s.key(),
                snapshot_quantity: s.quantity,
                ledger_quantity,
            });
        }
    }

    for (key, ledger_quantity) in replayed {
        discrepancies.push(Discrepancy::MissingSnapshot { key, ledger_quantity });
    }

    if !discrepancies.is_empty() {
        tracing::warn!(count = discrepancies.len(), "ledger discrepancies found");
    }

    Ok(ReconciliationReport {
        tenant_id,
        movements_checked: movements.len(),
        snapshots_checked: snapshots.len(),
        discrepancies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, UserId, WarehouseId};
    use stockledger_inventory::{MovementType, StockMovement, StockSnapshot};

    use crate::ledger_store::{MovementFilter, MovementPage, Pagination, SortOrder};

    /// Fixed rows, including ones the real stores would refuse to write.
    struct Rows {
        movements: Vec<StockMovement>,
        snapshots: Vec<StockSnapshot>,
    }

    impl MovementReader for Rows {
        fn find_by_idempotency_key(&self, _: TenantId, _: &str) -> Result<Option<StockMovement>, StoreError> {
            Ok(None)
        }

        fn query(
            &self,
            _: TenantId,
            _: &MovementFilter,
            _: SortOrder,
            pagination: Pagination,
        ) -> Result<MovementPage, StoreError> {
            Ok(MovementPage::from_sorted(self.movements.clone(), pagination))
        }

        fn movements_for(&self, _: TenantId) -> Result<Vec<StockMovement>, StoreError> {
            Ok(self.movements.clone())
        }
    }

    impl SnapshotReader for Rows {
        fn snapshot(&self, key: SnapshotKey) -> Result<Option<StockSnapshot>, StoreError> {
            Ok(self.snapshots.iter().find(|s| s.key() == key).cloned())
        }

        fn snapshots_for_product(&self, _: TenantId, product_id: ProductId) -> Result<Vec<StockSnapshot>, StoreError> {
            Ok(self.snapshots.iter().filter(|s| s.product_id == product_id).cloned().collect())
        }

        fn snapshots_for_tenant(&self, _: TenantId) -> Result<Vec<StockSnapshot>, StoreError> {
            Ok(self.snapshots.clone())
        }
    }

    fn movement(id: i64, key: SnapshotKey, quantity: Decimal, before: Decimal, after: Decimal) -> StockMovement {
        StockMovement {
            id: MovementId(id),
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            movement_type: MovementType::Adjustment,
            quantity,
            before_qty: before,
            after_qty: after,
            reference: None,
            idempotency_key: None,
            description: None,
            created_by: UserId::new(),
            created_at: Utc::now(),
        }
    }

    fn snapshot(key: SnapshotKey, quantity: Decimal) -> StockSnapshot {
        let mut s = StockSnapshot::empty(key, Utc::now());
        s.quantity = quantity;
        s
    }

    fn key() -> SnapshotKey {
        SnapshotKey::new(TenantId::new(), ProductId::new(), WarehouseId::new())
    }

    #[test]
    fn consistent_ledger_has_no_discrepancies() {
        let k = key();
        let rows = Rows {
            movements: vec![
                movement(1, k, dec!(10), dec!(0), dec!(10)),
                movement(2, k, dec!(-4), dec!(10), dec!(6)),
            ],
            snapshots: vec![snapshot(k, dec!(6))],
        };

        let report = reconcile(&rows, k.tenant_id).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.movements_checked, 2);
    }

    #[test]
    fn drifted_snapshot_is_reported() {
        let k = key();
        let rows = Rows {
            movements: vec![movement(1, k, dec!(10), dec!(0), dec!(10))],
            snapshots: vec![snapshot(k, dec!(12))],
        };

        let report = reconcile(&rows, k.tenant_id).unwrap();
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy::QuantityMismatch {
                key: k,
                snapshot_quantity: dec!(12),
                ledger_quantity: dec!(10),
            }]
        );
    }

    #[test]
    fn broken_rows_and_chain_are_reported() {
        let k = key();
        let rows = Rows {
            movements: vec![
                movement(1, k, dec!(10), dec!(0), dec!(11)),
                movement(2, k, dec!(1), dec!(11), dec!(12)),
            ],
            snapshots: vec![snapshot(k, dec!(11))],
        };

        let report = reconcile(&rows, k.tenant_id).unwrap();
        assert!(report.discrepancies.contains(&Discrepancy::BrokenArithmetic { movement_id: MovementId(1) }));
        assert!(report.discrepancies.contains(&Discrepancy::BrokenChain {
            movement_id: MovementId(2),
            expected_before: dec!(10),
            actual_before: dec!(11),
        }));
    }

    #[test]
    fn movements_without_snapshot_are_reported() {
        let k = key();
        let rows = Rows {
            movements: vec![movement(1, k, dec!(3), dec!(0), dec!(3))],
            snapshots: vec![],
        };

        let report = reconcile(&rows, k.tenant_id).unwrap();
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy::MissingSnapshot { key: k, ledger_quantity: dec!(3) }]
        );
    }

    #[test]
    fn overflowing_rows_are_reported_not_panicked_on() {
        let k = key();
        let rows = Rows {
            movements: vec![
                movement(1, k, Decimal::MAX, dec!(0), Decimal::MAX),
                movement(2, k, Decimal::MAX, Decimal::MAX, Decimal::MAX),
            ],
            snapshots: vec![snapshot(k, Decimal::MAX)],
        };

        let report = reconcile(&rows, k.tenant_id).unwrap();
        assert!(report.discrepancies.contains(&Discrepancy::BrokenArithmetic { movement_id: MovementId(2) }));
        assert!(report.discrepancies.contains(&Discrepancy::BalanceOverflow { movement_id: MovementId(2) }));
    }
}
