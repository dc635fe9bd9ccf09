//! Balance-changed notifications.

use std::sync::Arc;

use rust_decimal::Decimal;
use tally_core::{AccountId, EntryKind, LedgerEntry};
use tokio::task::JoinHandle;

/// Published after an entry lands in an account's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChanged {
    /// The account whose balance moved.
    pub account_id: AccountId,
    /// Balance after the entry.
    pub balance: Decimal,
    /// Sequence of the entry.
    pub sequence: u64,
    /// What kind of entry caused the change.
    pub cause: EntryKind,
}

impl From<&LedgerEntry> for BalanceChanged {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            account_id: entry.account_id,
            balance: entry.balance_after,
            sequence: entry.sequence,
            cause: entry.kind,
        }
    }
}

/// Receives balance-changed notifications.
#[async_trait::async_trait]
pub trait BalanceListener: Send + Sync {
    /// Handle one change. Runs outside every ledger lock.
    async fn on_balance_changed(&self, event: BalanceChanged);
}

/// Fans balance changes out to listeners on the tokio runtime.
#[derive(Clone, Default)]
pub struct BalanceEvents {
    listeners: Vec<Arc<dyn BalanceListener>>,
}

impl BalanceEvents {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&mut self, listener: Arc<dyn BalanceListener>) {
        self.listeners.push(listener);
    }

    /// Spawn one task per listener. The caller may await or drop the handles.
    pub fn publish(&self, event: &BalanceChanged) -> Vec<JoinHandle<()>> {
        self.listeners
            .iter()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let event = event.clone();
                tokio::spawn(async move { listener.on_balance_changed(event).await })
            })
            .collect()
    }
}

impl std::fmt::Debug for BalanceEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceEvents")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
