//! Periodic ledger self-checks.

use std::sync::Arc;
use std::time::Duration;

use tally_core::Result;
use tally_store::{Reconciliation, Store};
use tokio::task::JoinHandle;

/// Reconcile every account, repairing cached balances that drifted from
/// the log. Returns the reports for accounts that needed attention.
pub fn reconcile_all(store: &dyn Store) -> Result<Vec<Reconciliation>> {
    let mut flagged = Vec::new();
    for account_id in store.list_account_ids()? {
        let report = store.reconcile(&account_id)?;
        if !report.consistent || report.repaired {
            tracing::warn!(
                account_id = %account_id,
                cached = %report.cached_balance,
                replayed = %report.replayed_balance,
                sequence_contiguous = report.sequence_contiguous,
                repaired = report.repaired,
                "Ledger reconciliation found drift"
            );
            flagged.push(report);
        }
    }
    Ok(flagged)
}

/// Run [`reconcile_all`] every `interval` on the tokio runtime.
pub fn spawn_reconciler(store: Arc<dyn Store>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays fast.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || reconcile_all(store.as_ref())).await {
                Ok(Ok(flagged)) => {
                    tracing::info!(flagged = flagged.len(), "Reconciliation sweep finished");
                }
                Ok(Err(e)) => tracing::error!(error = %e, "Reconciliation sweep failed"),
                Err(e) => tracing::error!(error = %e, "Reconciliation task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_core::{Account, AccountId, NewEntry};
    use tally_store::memory::MemoryStore;

    #[test]
    fn consistent_accounts_are_not_flagged() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            let account = Account::new(AccountId::generate());
            store.create_account(&account).unwrap();
            store
                .append(&NewEntry::adjustment(account.account_id, dec!(2), "seed".into()))
                .unwrap();
        }

        assert!(reconcile_all(&store).unwrap().is_empty());
    }
}
