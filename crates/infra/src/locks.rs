//! In-process keyed lock table.
//!
//! Serializes work per key (a snapshot row, an idempotency key) without a table-wide
//! lock: unrelated keys never wait on each other. Guards are owned values so they can
//! live inside a transaction object and be released when it is dropped.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Set of currently held keys plus a condition variable signalled on every release.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire `key`, waiting up to `timeout` for the current holder to release it.
    ///
    /// Returns `None` on timeout. Not reentrant: acquiring a key already held by the
    /// caller waits for itself.
    pub fn acquire(self: &Arc<Self>, key: K, timeout: Duration) -> Option<KeyGuard<K>> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();

        while held.contains(&key) {
            if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(&key) {
                return None;
            }
        }

        held.insert(key.clone());
        Some(KeyGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.held.lock().contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Exclusive hold on one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    locks: Arc<KeyedLocks<K>>,
    key: K,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
        self.locks.released.notify_all();
    }
}
