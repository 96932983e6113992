//! At-most-once application per `(tenant, idempotency_key)`.
//!
//! A key is reserved by the first request that presents it and stays reserved until that
//! request's transaction ends. Later requests with the same key wait for the holder, then
//! either find the committed movement (replay) or, if the holder rolled back, take over
//! the reservation. Keys never expire.

use std::sync::Arc;
use std::time::Duration;

use stockledger_core::TenantId;
use stockledger_inventory::StockMovement;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_store::StoreError;
use crate::locks::{KeyGuard, KeyedLocks};

type Scope = (TenantId, String);

/// Outcome of presenting a key to the guard.
#[derive(Debug)]
pub enum Claim {
    /// Unseen key; held until the reservation is dropped.
    Reserved(Reservation),
    /// The key already produced this movement.
    AlreadyApplied(StockMovement),
}

/// Exclusive hold on an idempotency key. Dropping it releases the key.
#[derive(Debug)]
pub struct Reservation {
    _guard: KeyGuard<Scope>,
}

/// In-process idempotency guard backed by the keyed lock table.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    in_flight: Arc<KeyedLocks<Scope>>,
    wait: Duration,
}

impl IdempotencyGuard {
    pub fn new(wait: Duration) -> Self {
        Self {
            in_flight: KeyedLocks::new(),
            wait,
        }
    }

    /// Reserve `key` or report the movement it already produced.
    ///
    /// `lookup` must read committed movements only; it runs while the key is held, so a
    /// concurrent holder has either committed (visible) or rolled back (absent).
    pub fn check_or_reserve(
        &self,
        tenant_id: TenantId,
        key: &str,
        lookup: impl FnOnce() -> Result<Option<StockMovement>, StoreError>,
    ) -> LedgerResult<Claim> {
        let guard = self
            .in_flight
            .acquire((tenant_id, key.to_string()), self.wait)
            .ok_or_else(|| LedgerError::DuplicateIdempotencyKeyInFlight {
                key: key.to_string(),
            })?;

        match lookup()? {
            Some(existing) => Ok(Claim::AlreadyApplied(existing)),
            None => Ok(Claim::Reserved(Reservation { _guard: guard })),
        }
    }

    pub fn is_in_flight(&self, tenant_id: TenantId, key: &str) -> bool {
        self.in_flight.is_held(&(tenant_id, key.to_string()))
    }
}
