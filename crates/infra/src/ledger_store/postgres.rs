//! Postgres-backed ledger store.
//!
//! Persists the two ledger tables and enforces the transactional contract at the
//! database level:
//!
//! - snapshot rows are created lazily (`INSERT … ON CONFLICT DO NOTHING`) and locked with
//!   `SELECT … FOR UPDATE` for the rest of the transaction
//! - idempotency keys are serialized with a transaction-scoped advisory lock, then looked
//!   up; the partial unique index on `(tenant_id, idempotency_key)` is the final guard
//! - `CHECK (after_qty = before_qty + quantity)` rejects inconsistent rows
//! - `created_at` is `clock_timestamp()` taken after the row lock, not the transaction start,
//!   so kardex order on one key follows commit order
//! - quantities are `NUMERIC(20, 6)`; commands reject values with more fractional digits
//!   before they reach the database
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Idempotency key reused concurrently |
//! | Database (check violation) | `23514` | `InvalidAppend` | Row breaks the balance check |
//! | Database (numeric out of range) | `22003` | `InvalidAppend` | Value exceeds `NUMERIC(20, 6)` |
//! | Database (lock not available) | `55P03` | `Timeout` | `lock_timeout` elapsed on a row lock |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Should not occur with ordered locking |
//! | PoolTimedOut | N/A | `Timeout` | No connection available |
//! | PoolClosed / Io | N/A | `Unavailable` | Database unreachable |
//!
//! ## Runtime
//!
//! The store traits are synchronous. Each call runs the async sqlx operation with
//! `block_in_place` + `Handle::block_on`, so callers must be inside a multi-threaded tokio
//! runtime. Any other context (no runtime, or a current-thread runtime) gets
//! `StoreError::Unavailable`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::RuntimeFlavor;
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{ProductId, TenantId, UserId, WarehouseId};
use stockledger_inventory::{
    MovementId, MovementReference, MovementType, NewMovement, ReferenceKind, SnapshotKey,
    StockMovement, StockSnapshot,
};

use super::query::{MovementFilter, MovementPage, Pagination, SortOrder};
use super::r#trait::{
    IdempotencyOutcome, LedgerStore, LedgerTransaction, MovementReader, SnapshotReader, StoreError,
};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// DDL for the two ledger tables. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_movements (
    id              BIGSERIAL PRIMARY KEY,
    tenant_id       UUID NOT NULL,
    product_id      UUID NOT NULL,
    warehouse_id    UUID NOT NULL,
    movement_type   TEXT NOT NULL CHECK (movement_type IN (
                        'in', 'out', 'adjustment', 'transfer_in', 'transfer_out',
                        'sale', 'return', 'purchase')),
    quantity        NUMERIC(20, 6) NOT NULL CHECK (quantity <> 0),
    before_qty      NUMERIC(20, 6) NOT NULL,
    after_qty       NUMERIC(20, 6) NOT NULL,
    reference_kind  TEXT,
    reference_id    TEXT,
    idempotency_key TEXT,
    description     TEXT,
    created_by      UUID NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    CONSTRAINT stock_movements_balance CHECK (after_qty = before_qty + quantity),
    CONSTRAINT stock_movements_reference CHECK ((reference_kind IS NULL) = (reference_id IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS stock_movements_idempotency_key
    ON stock_movements (tenant_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE INDEX IF NOT EXISTS stock_movements_kardex
    ON stock_movements (tenant_id, product_id, warehouse_id, created_at DESC, id DESC);

CREATE INDEX IF NOT EXISTS stock_movements_reference
    ON stock_movements (tenant_id, reference_kind, reference_id)
    WHERE reference_kind IS NOT NULL;

CREATE TABLE IF NOT EXISTS stock_snapshots (
    tenant_id    UUID NOT NULL,
    product_id   UUID NOT NULL,
    warehouse_id UUID NOT NULL,
    quantity     NUMERIC(20, 6) NOT NULL DEFAULT 0,
    reserved     NUMERIC(20, 6) NOT NULL DEFAULT 0,
    version      BIGINT NOT NULL DEFAULT 0,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tenant_id, product_id, warehouse_id)
);
"#;

/// The row is written after its snapshot is locked, so `clock_timestamp()` orders it after
/// every earlier movement on the same key.
const INSERT_MOVEMENT: &str = "INSERT INTO stock_movements (tenant_id, product_id, warehouse_id, \
    movement_type, quantity, before_qty, after_qty, reference_kind, reference_id, idempotency_key, \
    description, created_by, created_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, clock_timestamp()) \
    RETURNING id, created_at";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, product_id, warehouse_id, movement_type, quantity, \
     before_qty, after_qty, reference_kind, reference_id, idempotency_key, description, \
     created_by, created_at";

const SNAPSHOT_COLUMNS: &str =
    "tenant_id, product_id, warehouse_id, quantity, reserved, version, updated_at";

/// Shared WHERE clause for kardex reads; optional filters bind NULL to disable themselves.
const KARDEX_WHERE: &str = "WHERE tenant_id = $1 \
     AND ($2::uuid IS NULL OR product_id = $2) \
     AND ($3::uuid IS NULL OR warehouse_id = $3) \
     AND ($4::text IS NULL OR movement_type = $4) \
     AND ($5::timestamptz IS NULL OR created_at >= $5) \
     AND ($6::timestamptz IS NULL OR created_at <= $6)";

/// Postgres-backed transactional ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
    idempotency_wait: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration, idempotency_wait: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
            idempotency_wait,
        }
    }

    /// Open a pool from `DATABASE_URL` and the configured timeouts.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.lock_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool, config.lock_timeout, config.idempotency_wait))
    }

    /// Create the ledger tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn fetch_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE tenant_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_by_idempotency_key", e))?;

        row.as_ref().map(movement_from_row).transpose()
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id, order = ?order), err)]
    pub async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements {KARDEX_WHERE}");
        let total: i64 = bind_filter(sqlx::query(&count_sql), tenant_id, filter)
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let dir = order.as_sql();
        let page_sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements {KARDEX_WHERE} \
             ORDER BY created_at {dir}, id {dir} LIMIT $7 OFFSET $8"
        );
        let rows = bind_filter(sqlx::query(&page_sql), tenant_id, filter)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows.iter().map(movement_from_row).collect::<Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;
        let seen = u64::from(pagination.offset) + movements.len() as u64;

        Ok(MovementPage {
            has_more: seen < total,
            movements,
            total,
            pagination,
        })
    }

    pub async fn fetch_movements_for(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE tenant_id = $1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_movements_for", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    pub async fn fetch_snapshots(
        &self,
        tenant_id: TenantId,
        product_id: Option<ProductId>,
        warehouse_id: Option<WarehouseId>,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM stock_snapshots \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR product_id = $2) \
               AND ($3::uuid IS NULL OR warehouse_id = $3) \
             ORDER BY product_id, warehouse_id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_id.map(Uuid::from))
            .bind(warehouse_id.map(Uuid::from))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_snapshots", e))?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

/// Transaction over [`PostgresLedgerStore`]. Dropping it without commit rolls back.
pub struct PostgresTransaction<'a> {
    store: &'a PostgresLedgerStore,
    tx: Transaction<'static, Postgres>,
    rows: HashMap<SnapshotKey, StockSnapshot>,
}

impl LedgerStore for PostgresLedgerStore {
    type Tx<'a> = PostgresTransaction<'a>;

    fn begin(&self) -> LedgerResult<Self::Tx<'_>> {
        let mut tx = run("begin", self.pool.begin())?;
        run(
            "set_lock_timeout",
            sqlx::query(&lock_timeout_sql(self.lock_timeout)).execute(&mut *tx),
        )?;
        Ok(PostgresTransaction {
            store: self,
            tx,
            rows: HashMap::new(),
        })
    }
}

impl LedgerTransaction for PostgresTransaction<'_> {
    fn check_or_reserve(&mut self, tenant_id: TenantId, key: &str) -> LedgerResult<IdempotencyOutcome> {
        run(
            "set_idempotency_wait",
            sqlx::query(&lock_timeout_sql(self.store.idempotency_wait)).execute(&mut *self.tx),
        )?;

        let acquired = run(
            "idempotency_lock",
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(advisory_key(tenant_id, key))
                .execute(&mut *self.tx),
        );
        match acquired {
            Ok(_) => {}
            Err(StoreError::Timeout(_)) => {
                return Err(LedgerError::DuplicateIdempotencyKeyInFlight {
                    key: key.to_string(),
                });
            }
            Err(other) => return Err(other.into()),
        }

        run(
            "reset_lock_timeout",
            sqlx::query(&lock_timeout_sql(self.store.lock_timeout)).execute(&mut *self.tx),
        )?;

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE tenant_id = $1 AND idempotency_key = $2"
        );
        let row = run(
            "find_by_idempotency_key",
            sqlx::query(&sql)
                .bind(tenant_id.as_uuid())
                .bind(key)
                .fetch_optional(&mut *self.tx),
        )?;

        Ok(match row.as_ref().map(movement_from_row).transpose()? {
            Some(existing) => IdempotencyOutcome::AlreadyApplied(existing),
            None => IdempotencyOutcome::Reserved,
        })
    }

    fn find_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> LedgerResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 AND reference_kind = $2 AND reference_id = $3 ORDER BY id ASC"
        );
        let rows = run(
            "find_by_reference",
            sqlx::query(&sql)
                .bind(tenant_id.as_uuid())
                .bind(reference.kind.as_str())
                .bind(&reference.id)
                .fetch_all(&mut *self.tx),
        )?;
        Ok(rows.iter().map(movement_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    fn lock_snapshot(&mut self, key: SnapshotKey) -> LedgerResult<StockSnapshot> {
        if let Some(snapshot) = self.rows.get(&key) {
            return Ok(snapshot.clone());
        }

        run(
            "create_snapshot",
            sqlx::query(
                "INSERT INTO stock_snapshots (tenant_id, product_id, warehouse_id) VALUES ($1, $2, $3) \
                 ON CONFLICT (tenant_id, product_id, warehouse_id) DO NOTHING",
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .execute(&mut *self.tx),
        )?;

        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM stock_snapshots \
             WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3 FOR UPDATE"
        );
        let row = run(
            "lock_snapshot",
            sqlx::query(&sql)
                .bind(key.tenant_id.as_uuid())
                .bind(key.product_id.as_uuid())
                .bind(key.warehouse_id.as_uuid())
                .fetch_one(&mut *self.tx),
        )?;

        let snapshot = snapshot_from_row(&row)?;
        self.rows.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    fn save_snapshot(&mut self, snapshot: StockSnapshot) -> LedgerResult<()> {
        let key = snapshot.key();
        if !self.rows.contains_key(&key) {
            return Err(StoreError::InvalidAppend(format!("snapshot {key} is not locked by this transaction")).into());
        }

        run(
            "save_snapshot",
            sqlx::query(
                "UPDATE stock_snapshots SET quantity = $4, version = $5, updated_at = $6 \
                 WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3",
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .bind(snapshot.quantity)
            .bind(snapshot.version as i64)
            .bind(snapshot.updated_at)
            .execute(&mut *self.tx),
        )?;

        self.rows.insert(key, snapshot);
        Ok(())
    }

    fn append(&mut self, movement: NewMovement) -> LedgerResult<StockMovement> {
        movement.validate()?;

        let key = movement.key();
        let locked = self.rows.get(&key).ok_or_else(|| {
            StoreError::InvalidAppend(format!("snapshot {key} is not locked by this transaction"))
        })?;
        if locked.quantity != movement.after_qty {
            return Err(LedgerError::validation(format!(
                "after_qty ({}) does not match the locked snapshot quantity ({})",
                movement.after_qty, locked.quantity
            )));
        }

        let row = run(
            "append_movement",
            sqlx::query(INSERT_MOVEMENT)
                .bind(movement.tenant_id.as_uuid())
                .bind(movement.product_id.as_uuid())
                .bind(movement.warehouse_id.as_uuid())
                .bind(movement.movement_type.as_str())
                .bind(movement.quantity)
                .bind(movement.before_qty)
                .bind(movement.after_qty)
                .bind(movement.reference.as_ref().map(|r| r.kind.as_str().to_string()))
                .bind(movement.reference.as_ref().map(|r| r.id.clone()))
                .bind(movement.idempotency_key.as_deref())
                .bind(movement.description.as_deref())
                .bind(movement.created_by.as_uuid())
                .fetch_one(&mut *self.tx),
        )?;

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("append_movement", e))?;
        let created_at: DateTime<Utc> =
            row.try_get("created_at").map_err(|e| map_sqlx_error("append_movement", e))?;

        Ok(movement.into_movement(MovementId(id), created_at))
    }

    fn commit(self) -> LedgerResult<()> {
        run("commit", self.tx.commit())?;
        Ok(())
    }
}

impl MovementReader for PostgresLedgerStore {
    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        block_on(self.fetch_by_idempotency_key(tenant_id, key))?
    }

    fn query(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        order: SortOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        block_on(self.query_movements(tenant_id, filter, order, pagination))?
    }

    fn movements_for(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        block_on(self.fetch_movements_for(tenant_id))?
    }
}

impl SnapshotReader for PostgresLedgerStore {
    fn snapshot(&self, key: SnapshotKey) -> Result<Option<StockSnapshot>, StoreError> {
        let rows = block_on(self.fetch_snapshots(key.tenant_id, Some(key.product_id), Some(key.warehouse_id)))??;
        Ok(rows.into_iter().next())
    }

    fn snapshots_for_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        block_on(self.fetch_snapshots(tenant_id, Some(product_id), None))?
    }

    fn snapshots_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<StockSnapshot>, StoreError> {
        block_on(self.fetch_snapshots(tenant_id, None, None))?
    }
}

/// Drive a future to completion from synchronous code inside a tokio runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output, StoreError> {
    let unavailable =
        || StoreError::Unavailable("PostgresLedgerStore requires a multi-threaded tokio runtime".to_string());

    let handle = tokio::runtime::Handle::try_current().map_err(|_| unavailable())?;
    // block_in_place panics on a current-thread runtime.
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(unavailable());
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}

fn run<T>(
    operation: &str,
    future: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, StoreError> {
    block_on(future)?.map_err(|e| map_sqlx_error(operation, e))
}

fn lock_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1))
}

fn advisory_key(tenant_id: TenantId, key: &str) -> String {
    format!("stock_movement:{tenant_id}:{key}")
}

fn bind_filter<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    tenant_id: TenantId,
    filter: &MovementFilter,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(*tenant_id.as_uuid())
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.date_from)
        .bind(filter.date_to)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40P01") => StoreError::Conflict(msg),
                Some("23514") | Some("22003") => StoreError::InvalidAppend(msg),
                Some("55P03") => StoreError::Timeout(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(format!("connection pool timed out in {operation}")),
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_movement", e);

    let movement_type: String = row.try_get("movement_type").map_err(get)?;
    let movement_type: MovementType = movement_type
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{e}")))?;

    let reference_kind: Option<String> = row.try_get("reference_kind").map_err(get)?;
    let reference_id: Option<String> = row.try_get("reference_id").map_err(get)?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(MovementReference::new(ReferenceKind::from(kind), id)),
        _ => None,
    };

    Ok(StockMovement {
        id: MovementId(row.try_get("id").map_err(get)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(get)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(get)?),
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        movement_type,
        quantity: row.try_get::<Decimal, _>("quantity").map_err(get)?,
        before_qty: row.try_get::<Decimal, _>("before_qty").map_err(get)?,
        after_qty: row.try_get::<Decimal, _>("after_qty").map_err(get)?,
        reference,
        idempotency_key: row.try_get("idempotency_key").map_err(get)?,
        description: row.try_get("description").map_err(get)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(get)?),
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<StockSnapshot, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_snapshot", e);
    let version: i64 = row.try_get("version").map_err(get)?;

    Ok(StockSnapshot {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(get)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(get)?),
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        quantity: row.try_get("quantity").map_err(get)?,
        reserved: row.try_get("reserved").map_err(get)?,
        version: version.max(0) as u64,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}
