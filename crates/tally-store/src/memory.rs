//! In-memory storage implementation.
//!
//! Holds every table in one `RwLock`. Writers follow the same lock order as
//! the `RocksDB` backend: account lock, then the index lock when a global
//! uniqueness index is involved, then the table lock for the final commit.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tally_core::{
    Account, AccountId, AccountSettings, BillingPeriod, EntryKind, LedgerEntry, NewEntry,
    ReferralCode, ReferralRecord, UsageId, UsageRecord, YearMonth,
};

use crate::error::{Result, StoreError};
use crate::ledger::{plan_append, IndexFacts};
use crate::locks::AccountLocks;
use crate::{LedgerHead, Reconciliation, Store};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    ledgers: HashMap<AccountId, Vec<LedgerEntry>>,
    welcome_bonuses: HashSet<AccountId>,
    payment_refs: HashMap<String, (AccountId, u64)>,
    usage: HashMap<UsageId, UsageRecord>,
    usage_entries: HashMap<UsageId, (AccountId, u64)>,
    referral_codes: HashMap<String, ReferralCode>,
    codes_by_account: HashMap<AccountId, String>,
    referrals: HashMap<AccountId, ReferralRecord>,
    periods: HashMap<(AccountId, YearMonth), BillingPeriod>,
}

impl Tables {
    fn account(&self, account_id: &AccountId) -> Result<&Account> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }

    fn entries(&self, account_id: &AccountId) -> &[LedgerEntry] {
        self.ledgers.get(account_id).map(Vec::as_slice).unwrap_or_default()
    }

    fn head(&self, account_id: &AccountId) -> LedgerHead {
        LedgerHead::of(self.entries(account_id).last())
    }

    fn entry_at(&self, (account_id, sequence): (AccountId, u64)) -> Option<LedgerEntry> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.entries(&account_id).get(index).cloned()
    }

    fn commit_entry(&mut self, entry: &LedgerEntry) {
        let location = (entry.account_id, entry.sequence);
        if entry.kind == EntryKind::WelcomeBonus {
            self.welcome_bonuses.insert(entry.account_id);
        }
        if let Some(payment_ref) = &entry.related_payment_ref {
            self.payment_refs.insert(payment_ref.clone(), location);
        }
        if let Some(usage_id) = entry.related_usage_id {
            self.usage_entries.insert(usage_id, location);
        }
        if let Some(account) = self.accounts.get_mut(&entry.account_id) {
            account.balance = entry.balance_after;
            account.updated_at = entry.created_at;
        }
        self.ledgers
            .entry(entry.account_id)
            .or_default()
            .push(entry.clone());
    }
}

/// In-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: AccountLocks,
    index_lock: Mutex<()>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::poisoned())
    }

    /// Run the append protocol for `entry`.
    ///
    /// `precheck` sees the tables before planning; `commit` writes extra
    /// records in the same table write as the entry.
    fn append_with<P, C>(
        &self,
        entry: &NewEntry,
        uses_index: bool,
        precheck: P,
        commit: C,
    ) -> Result<LedgerEntry>
    where
        P: FnOnce(&Tables) -> Result<()>,
        C: FnOnce(&mut Tables, &LedgerEntry),
    {
        let account_lock = self.locks.get(&entry.account_id)?;
        let _account_guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;
        let _index_guard = if uses_index || entry.related_payment_ref.is_some() {
            Some(self.index_lock.lock().map_err(|_| StoreError::poisoned())?)
        } else {
            None
        };

        let planned = {
            let guard = self.read()?;
            let tables: &Tables = &guard;
            let account = tables.account(&entry.account_id)?;
            precheck(tables)?;
            let facts = IndexFacts {
                welcome_bonus_issued: tables.welcome_bonuses.contains(&entry.account_id),
                payment_ref_taken: entry
                    .related_payment_ref
                    .as_ref()
                    .is_some_and(|r| tables.payment_refs.contains_key(r)),
            };
            plan_append(account, tables.head(&entry.account_id), entry, facts)?
        };

        let mut tables = self.write()?;
        tables.commit_entry(&planned);
        commit(&mut *tables, &planned);

        tracing::debug!(
            account_id = %planned.account_id,
            sequence = planned.sequence,
            kind = %planned.kind,
            amount = %planned.amount,
            balance_after = %planned.balance_after,
            "ledger entry appended"
        );

        Ok(planned)
    }
}

impl Store for MemoryStore {
    fn create_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.write()?;
        if tables.accounts.contains_key(&account.account_id) {
            return Err(StoreError::AccountExists {
                account_id: account.account_id.to_string(),
            });
        }
        tables.accounts.insert(account.account_id, account.clone());
        tables.ledgers.insert(account.account_id, Vec::new());
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    fn update_settings(
        &self,
        account_id: &AccountId,
        settings: &AccountSettings,
    ) -> Result<Account> {
        let account_lock = self.locks.get(account_id)?;
        let _guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;

        let mut tables = self.write()?;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        account.settings = settings.clone();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    fn list_account_ids(&self) -> Result<Vec<AccountId>> {
        Ok(self.read()?.accounts.keys().copied().collect())
    }

    fn append(&self, entry: &NewEntry) -> Result<LedgerEntry> {
        self.append_with(entry, false, |_| Ok(()), |_, _| {})
    }

    fn head(&self, account_id: &AccountId) -> Result<LedgerHead> {
        let tables = self.read()?;
        tables.account(account_id)?;
        Ok(tables.head(account_id))
    }

    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .read()?
            .entries(account_id)
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.entries(account_id).to_vec())
    }

    fn find_entry_by_payment_ref(&self, payment_ref: &str) -> Result<Option<LedgerEntry>> {
        let tables = self.read()?;
        Ok(tables
            .payment_refs
            .get(payment_ref)
            .and_then(|location| tables.entry_at(*location)))
    }

    fn find_entry_by_usage(&self, usage_id: &UsageId) -> Result<Option<LedgerEntry>> {
        let tables = self.read()?;
        Ok(tables
            .usage_entries
            .get(usage_id)
            .and_then(|location| tables.entry_at(*location)))
    }

    fn settle_usage(&self, record: &UsageRecord, entry: &NewEntry) -> Result<LedgerEntry> {
        if record.account_id != entry.account_id || entry.related_usage_id != Some(record.id) {
            return Err(StoreError::InvalidEntry(
                "usage entry does not match its record".into(),
            ));
        }
        if !record.is_completed() {
            return Err(StoreError::InvalidEntry(
                "only completed usage is settled".into(),
            ));
        }

        self.append_with(
            entry,
            true,
            |tables| {
                if tables.usage.contains_key(&record.id) {
                    return Err(StoreError::DuplicateUsage {
                        usage_id: record.id.to_string(),
                    });
                }
                Ok(())
            },
            |tables, _| {
                tables.usage.insert(record.id, record.clone());
            },
        )
    }

    fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let _index_guard = self.index_lock.lock().map_err(|_| StoreError::poisoned())?;
        let mut tables = self.write()?;
        tables.account(&record.account_id)?;
        if tables.usage.contains_key(&record.id) {
            return Err(StoreError::DuplicateUsage {
                usage_id: record.id.to_string(),
            });
        }
        tables.usage.insert(record.id, record.clone());
        Ok(())
    }

    fn get_usage(&self, usage_id: &UsageId) -> Result<Option<UsageRecord>> {
        Ok(self.read()?.usage.get(usage_id).cloned())
    }

    fn list_usage(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let tables = self.read()?;
        let mut records: Vec<UsageRecord> = tables
            .usage
            .values()
            .filter(|r| r.account_id == *account_id && r.created_at >= from && r.created_at < to)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    fn get_or_create_referral_code(&self, code: &ReferralCode) -> Result<ReferralCode> {
        let account_lock = self.locks.get(&code.account_id)?;
        let _account_guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;
        let _index_guard = self.index_lock.lock().map_err(|_| StoreError::poisoned())?;

        let mut tables = self.write()?;
        tables.account(&code.account_id)?;
        if let Some(existing) = tables
            .codes_by_account
            .get(&code.account_id)
            .and_then(|c| tables.referral_codes.get(c))
        {
            return Ok(existing.clone());
        }
        if tables.referral_codes.contains_key(&code.code) {
            return Err(StoreError::ReferralCodeTaken {
                code: code.code.clone(),
            });
        }
        tables
            .codes_by_account
            .insert(code.account_id, code.code.clone());
        tables.referral_codes.insert(code.code.clone(), code.clone());
        Ok(code.clone())
    }

    fn find_referral_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        Ok(self.read()?.referral_codes.get(code).cloned())
    }

    fn get_referral(&self, referred: &AccountId) -> Result<Option<ReferralRecord>> {
        Ok(self.read()?.referrals.get(referred).cloned())
    }

    fn redeem_referral(&self, record: &ReferralRecord, bonus: &NewEntry) -> Result<LedgerEntry> {
        if bonus.account_id != record.referrer_account_id {
            return Err(StoreError::InvalidEntry(
                "referral bonus must credit the referrer".into(),
            ));
        }

        self.append_with(
            bonus,
            true,
            |tables| {
                tables.account(&record.referred_account_id)?;
                if tables.referrals.contains_key(&record.referred_account_id) {
                    return Err(StoreError::ReferralAlreadyRedeemed {
                        account_id: record.referred_account_id.to_string(),
                    });
                }
                Ok(())
            },
            |tables, _| {
                let mut stored = record.clone();
                stored.bonus_issued = true;
                tables.referrals.insert(record.referred_account_id, stored);
            },
        )
    }

    fn put_billing_period(&self, period: &BillingPeriod) -> Result<()> {
        self.write()?
            .periods
            .insert((period.account_id, period.year_month), period.clone());
        Ok(())
    }

    fn get_billing_period(
        &self,
        account_id: &AccountId,
        year_month: YearMonth,
    ) -> Result<Option<BillingPeriod>> {
        Ok(self.read()?.periods.get(&(*account_id, year_month)).cloned())
    }

    fn reconcile(&self, account_id: &AccountId) -> Result<Reconciliation> {
        let account_lock = self.locks.get(account_id)?;
        let _guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;

        let mut tables = self.write()?;
        let report =
            Reconciliation::from_log(tables.account(account_id)?, tables.entries(account_id));
        if report.repaired {
            if let Some(account) = tables.accounts.get_mut(account_id) {
                account.balance = report.replayed_balance;
                account.updated_at = Utc::now();
            }
        }
        Ok(report)
    }
}
