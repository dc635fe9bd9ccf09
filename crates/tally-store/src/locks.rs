//! Per-account locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tally_core::AccountId;

use crate::error::{Result, StoreError};

/// Map size below which idle locks are never pruned.
const PRUNE_FLOOR: usize = 1024;

/// Hands out one lock per account.
///
/// The map itself is only locked long enough to fetch or insert an entry, so
/// callers on different accounts never wait on each other. Locks nobody holds
/// are dropped whenever the map has doubled since the last prune, so the map
/// tracks busy accounts rather than every account ever seen.
///
/// `L` is the lock type: a blocking mutex for ledger writes, an async one for
/// callers that hold the lock across `.await`.
#[derive(Debug)]
pub struct AccountLocks<L = Mutex<()>> {
    inner: Mutex<LockTable<L>>,
}

#[derive(Debug)]
struct LockTable<L> {
    locks: HashMap<AccountId, Arc<L>>,
    prune_at: usize,
}

impl<L> Default for AccountLocks<L> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(LockTable {
                locks: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
        }
    }
}

impl<L: Default> AccountLocks<L> {
    /// The lock for `account_id`, created on first use.
    pub fn get(&self, account_id: &AccountId) -> Result<Arc<L>> {
        let mut table = self.inner.lock().map_err(|_| StoreError::poisoned())?;

        if table.locks.len() >= table.prune_at && !table.locks.contains_key(account_id) {
            // Only the map holds a count of 1, and cloning needs the map lock.
            table.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            table.prune_at = (table.locks.len() * 2).max(PRUNE_FLOOR);
        }

        Ok(Arc::clone(table.locks.entry(*account_id).or_default()))
    }

    /// Number of accounts currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |table| table.locks.len())
    }

    /// Whether no account is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
