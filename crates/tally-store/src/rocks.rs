//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Every operation that writes more than one key builds a single `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use tally_core::{
    Account, AccountId, AccountSettings, BillingPeriod, EntryKind, LedgerEntry, NewEntry,
    ReferralCode, ReferralRecord, UsageId, UsageRecord, YearMonth,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ledger::{plan_append, IndexFacts};
use crate::locks::AccountLocks;
use crate::schema::{all_column_families, cf};
use crate::{LedgerHead, Reconciliation, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: AccountLocks,
    index_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: AccountLocks::default(),
            index_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        self.get_raw(cf_name, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn contains(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get_raw(cf_name, key)?.is_some())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn require_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))?
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }

    fn lock_index(&self) -> Result<MutexGuard<'_, ()>> {
        self.index_lock.lock().map_err(|_| StoreError::poisoned())
    }

    /// The newest entry of an account's log, found by seeking backwards from
    /// the largest possible key under the account prefix.
    fn last_entry(&self, account_id: &AccountId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::LEDGER)?;
        let prefix = keys::account_prefix(account_id);
        let upper = keys::entry_key(account_id, u64::MAX);

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                if key.starts_with(&prefix) {
                    Self::deserialize(&value).map(Some)
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Entries under the account prefix, walking in `direction`.
    fn scan_entries(
        &self,
        account_id: &AccountId,
        direction: Direction,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(cf::LEDGER)?;
        let prefix = keys::account_prefix(account_id);
        let start = match direction {
            Direction::Forward => keys::entry_key(account_id, 0),
            Direction::Reverse => keys::entry_key(account_id, u64::MAX),
        };

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, direction));
        for item in iter.skip(offset) {
            if entries.len() >= limit {
                break;
            }
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(Self::deserialize(&value)?);
        }
        Ok(entries)
    }

    fn entry_at(&self, location: &[u8]) -> Result<Option<LedgerEntry>> {
        self.get_value(cf::LEDGER, location)
    }

    /// Run the append protocol for `entry`.
    ///
    /// `precheck` runs under the locks before planning; `extra` adds records
    /// to the batch that writes the entry.
    fn append_with<P, C>(
        &self,
        entry: &NewEntry,
        uses_index: bool,
        precheck: P,
        extra: C,
    ) -> Result<LedgerEntry>
    where
        P: FnOnce() -> Result<()>,
        C: FnOnce(&mut WriteBatch, &LedgerEntry) -> Result<()>,
    {
        let account_lock = self.locks.get(&entry.account_id)?;
        let _account_guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;
        let _index_guard = if uses_index || entry.related_payment_ref.is_some() {
            Some(self.lock_index()?)
        } else {
            None
        };

        let mut account = self.require_account(&entry.account_id)?;
        precheck()?;

        let account_key = keys::account_key(&entry.account_id);
        let facts = IndexFacts {
            welcome_bonus_issued: entry.kind == EntryKind::WelcomeBonus
                && self.contains(cf::WELCOME_BONUSES, &account_key)?,
            payment_ref_taken: match &entry.related_payment_ref {
                Some(payment_ref) => {
                    self.contains(cf::PAYMENT_REFS, &keys::payment_ref_key(payment_ref))?
                }
                None => false,
            },
        };
        let head = LedgerHead::of(self.last_entry(&entry.account_id)?.as_ref());
        let planned = plan_append(&account, head, entry, facts)?;

        account.balance = planned.balance_after;
        account.updated_at = planned.created_at;

        let entry_key = keys::entry_key(&planned.account_id, planned.sequence);
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(cf::LEDGER)?, &entry_key, Self::serialize(&planned)?);
        batch.put_cf(&self.cf(cf::ACCOUNTS)?, &account_key, Self::serialize(&account)?);
        if planned.kind == EntryKind::WelcomeBonus {
            batch.put_cf(&self.cf(cf::WELCOME_BONUSES)?, &account_key, []);
        }
        if let Some(payment_ref) = &planned.related_payment_ref {
            batch.put_cf(
                &self.cf(cf::PAYMENT_REFS)?,
                keys::payment_ref_key(payment_ref),
                &entry_key,
            );
        }
        if let Some(usage_id) = &planned.related_usage_id {
            batch.put_cf(
                &self.cf(cf::USAGE_ENTRIES)?,
                keys::usage_key(usage_id),
                &entry_key,
            );
        }
        extra(&mut batch, &planned)?;
        self.write(batch)?;

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

    fn put_usage(&self, batch: &mut WriteBatch, record: &UsageRecord) -> Result<()> {
        batch.put_cf(
            &self.cf(cf::USAGE)?,
            keys::usage_key(&record.id),
            Self::serialize(record)?,
        );
        batch.put_cf(
            &self.cf(cf::USAGE_BY_ACCOUNT)?,
            keys::account_usage_key(&record.account_id, &record.id),
            [],
        );
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn create_account(&self, account: &Account) -> Result<()> {
        let account_lock = self.locks.get(&account.account_id)?;
        let _guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;

        let key = keys::account_key(&account.account_id);
        if self.contains(cf::ACCOUNTS, &key)? {
            return Err(StoreError::AccountExists {
                account_id: account.account_id.to_string(),
            });
        }

        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, key, Self::serialize(account)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn update_settings(
        &self,
        account_id: &AccountId,
        settings: &AccountSettings,
    ) -> Result<Account> {
        let account_lock = self.locks.get(account_id)?;
        let _guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;

        let mut account = self.require_account(account_id)?;
        account.settings = settings.clone();
        account.updated_at = Utc::now();

        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(account_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(account)
    }

    fn list_account_ids(&self) -> Result<Vec<AccountId>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if let Some(account_id) = keys::account_id_from_key(&key) {
                ids.push(account_id);
            }
        }
        Ok(ids)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn append(&self, entry: &NewEntry) -> Result<LedgerEntry> {
        self.append_with(entry, false, || Ok(()), |_, _| Ok(()))
    }

    fn head(&self, account_id: &AccountId) -> Result<LedgerHead> {
        self.require_account(account_id)?;
        Ok(LedgerHead::of(self.last_entry(account_id)?.as_ref()))
    }

    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.scan_entries(account_id, Direction::Reverse, offset, limit)
    }

    fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.scan_entries(account_id, Direction::Forward, 0, usize::MAX)
    }

    fn find_entry_by_payment_ref(&self, payment_ref: &str) -> Result<Option<LedgerEntry>> {
        match self.get_raw(cf::PAYMENT_REFS, &keys::payment_ref_key(payment_ref))? {
            Some(location) => self.entry_at(&location),
            None => Ok(None),
        }
    }

    fn find_entry_by_usage(&self, usage_id: &UsageId) -> Result<Option<LedgerEntry>> {
        match self.get_raw(cf::USAGE_ENTRIES, &keys::usage_key(usage_id))? {
            Some(location) => self.entry_at(&location),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

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
            || {
                if self.contains(cf::USAGE, &keys::usage_key(&record.id))? {
                    return Err(StoreError::DuplicateUsage {
                        usage_id: record.id.to_string(),
                    });
                }
                Ok(())
            },
            |batch, _| self.put_usage(batch, record),
        )
    }

    fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let _index_guard = self.lock_index()?;
        self.require_account(&record.account_id)?;
        if self.contains(cf::USAGE, &keys::usage_key(&record.id))? {
            return Err(StoreError::DuplicateUsage {
                usage_id: record.id.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        self.put_usage(&mut batch, record)?;
        self.write(batch)
    }

    fn get_usage(&self, usage_id: &UsageId) -> Result<Option<UsageRecord>> {
        self.get_value(cf::USAGE, &keys::usage_key(usage_id))
    }

    fn list_usage(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let cf_index = self.cf(cf::USAGE_BY_ACCOUNT)?;
        let prefix = keys::account_prefix(account_id);

        let mut records = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf_index, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(usage_id) = keys::usage_id_from_account_key(&key) else {
                continue;
            };
            if let Some(record) = self.get_usage(&usage_id)? {
                if record.created_at >= from && record.created_at < to {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    // =========================================================================
    // Referral Operations
    // =========================================================================

    fn get_or_create_referral_code(&self, code: &ReferralCode) -> Result<ReferralCode> {
        let account_lock = self.locks.get(&code.account_id)?;
        let _account_guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;
        let _index_guard = self.lock_index()?;

        self.require_account(&code.account_id)?;
        let account_key = keys::account_key(&code.account_id);
        if let Some(existing) = self.get_raw(cf::REFERRAL_CODES_BY_ACCOUNT, &account_key)? {
            if let Some(stored) = self.get_value(cf::REFERRAL_CODES, &existing)? {
                return Ok(stored);
            }
        }

        let code_key = keys::referral_code_key(&code.code);
        if self.contains(cf::REFERRAL_CODES, &code_key)? {
            return Err(StoreError::ReferralCodeTaken {
                code: code.code.clone(),
            });
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(cf::REFERRAL_CODES)?, &code_key, Self::serialize(code)?);
        batch.put_cf(
            &self.cf(cf::REFERRAL_CODES_BY_ACCOUNT)?,
            &account_key,
            &code_key,
        );
        self.write(batch)?;
        Ok(code.clone())
    }

    fn find_referral_code(&self, code: &str) -> Result<Option<ReferralCode>> {
        self.get_value(cf::REFERRAL_CODES, &keys::referral_code_key(code))
    }

    fn get_referral(&self, referred: &AccountId) -> Result<Option<ReferralRecord>> {
        self.get_value(cf::REFERRALS, &keys::account_key(referred))
    }

    fn redeem_referral(&self, record: &ReferralRecord, bonus: &NewEntry) -> Result<LedgerEntry> {
        if bonus.account_id != record.referrer_account_id {
            return Err(StoreError::InvalidEntry(
                "referral bonus must credit the referrer".into(),
            ));
        }

        let referred_key = keys::account_key(&record.referred_account_id);
        self.append_with(
            bonus,
            true,
            || {
                self.require_account(&record.referred_account_id)?;
                if self.contains(cf::REFERRALS, &referred_key)? {
                    return Err(StoreError::ReferralAlreadyRedeemed {
                        account_id: record.referred_account_id.to_string(),
                    });
                }
                Ok(())
            },
            |batch, _| {
                let mut stored = record.clone();
                stored.bonus_issued = true;
                batch.put_cf(
                    &self.cf(cf::REFERRALS)?,
                    &referred_key,
                    Self::serialize(&stored)?,
                );
                Ok(())
            },
        )
    }

    // =========================================================================
    // Billing Periods
    // =========================================================================

    fn put_billing_period(&self, period: &BillingPeriod) -> Result<()> {
        let cf = self.cf(cf::BILLING_PERIODS)?;
        self.db
            .put_cf(
                &cf,
                keys::billing_period_key(&period.account_id, period.year_month),
                Self::serialize(period)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_billing_period(
        &self,
        account_id: &AccountId,
        year_month: YearMonth,
    ) -> Result<Option<BillingPeriod>> {
        self.get_value(
            cf::BILLING_PERIODS,
            &keys::billing_period_key(account_id, year_month),
        )
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    fn reconcile(&self, account_id: &AccountId) -> Result<Reconciliation> {
        let account_lock = self.locks.get(account_id)?;
        let _guard = account_lock.lock().map_err(|_| StoreError::poisoned())?;

        let mut account = self.require_account(account_id)?;
        let entries = self.all_entries(account_id)?;
        let report = Reconciliation::from_log(&account, &entries);

        if report.repaired {
            account.balance = report.replayed_balance;
            account.updated_at = Utc::now();
            let cf = self.cf(cf::ACCOUNTS)?;
            self.db
                .put_cf(&cf, keys::account_key(account_id), Self::serialize(&account)?)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn with_account(store: &RocksStore) -> AccountId {
        let account_id = AccountId::generate();
        store.create_account(&Account::new(account_id)).unwrap();
        account_id
    }

    fn completed(account_id: AccountId, cost: rust_decimal::Decimal) -> (UsageRecord, NewEntry) {
        let record = UsageRecord::completed(
            UsageId::generate(),
            account_id,
            "smart_extraction",
            "gpt-4o",
            500,
            200,
            cost,
            1,
        );
        let entry = NewEntry::usage(account_id, cost, record.id, record.ledger_description());
        (record, entry)
    }

    #[test]
    fn account_lifecycle() {
        let (store, _dir) = create_test_store();
        let account_id = with_account(&store);

        assert!(matches!(
            store.create_account(&Account::new(account_id)),
            Err(StoreError::AccountExists { .. })
        ));

        let mut settings = AccountSettings::default();
        settings.auto_top_up.enabled = true;
        let updated = store.update_settings(&account_id, &settings).unwrap();
        assert!(updated.settings.auto_top_up.enabled);

        let retrieved = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(retrieved.settings, settings);
        assert_eq!(store.list_account_ids().unwrap(), vec![account_id]);
    }

    #[test]
    fn ledger_append_and_listing() {
        let (store, _dir) = create_test_store();
        let account_id = with_account(&store);

        store
            .append(&NewEntry::welcome_bonus(account_id, dec!(10)))
            .unwrap();
        store
            .append(&NewEntry::purchase(account_id, dec!(20), "pi_1"))
            .unwrap();
        let (record, entry) = completed(account_id, dec!(0.5));
        store.settle_usage(&record, &entry).unwrap();

        let head = store.head(&account_id).unwrap();
        assert_eq!(head.sequence, 3);
        assert_eq!(head.balance, dec!(29.5));

        let newest = store.list_entries(&account_id, 2, 0).unwrap();
        assert_eq!(newest.iter().map(|e| e.sequence).collect::<Vec<_>>(), [3, 2]);
        let oldest = store.list_entries(&account_id, 2, 2).unwrap();
        assert_eq!(oldest.iter().map(|e| e.sequence).collect::<Vec<_>>(), [1]);

        let all = store.all_entries(&account_id).unwrap();
        assert_eq!(all.iter().map(|e| e.sequence).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn logs_of_neighbouring_accounts_stay_separate() {
        let (store, _dir) = create_test_store();
        let a = with_account(&store);
        let b = with_account(&store);

        store.append(&NewEntry::welcome_bonus(a, dec!(10))).unwrap();
        assert_eq!(store.head(&b).unwrap(), LedgerHead::default());
        assert!(store.all_entries(&b).unwrap().is_empty());
    }

    #[test]
    fn guarded_append_rules() {
        let (store, _dir) = create_test_store();
        let account_id = with_account(&store);

        store
            .append(&NewEntry::welcome_bonus(account_id, dec!(1)))
            .unwrap();
        assert!(matches!(
            store.append(&NewEntry::welcome_bonus(account_id, dec!(1))),
            Err(StoreError::DuplicateWelcomeBonus { .. })
        ));

        store
            .append(&NewEntry::auto_purchase(account_id, dec!(20), "pi_dup"))
            .unwrap();
        assert!(matches!(
            store.append(&NewEntry::auto_purchase(account_id, dec!(20), "pi_dup")),
            Err(StoreError::DuplicatePaymentRef { .. })
        ));

        let (record, entry) = completed(account_id, dec!(50));
        assert!(matches!(
            store.settle_usage(&record, &entry),
            Err(StoreError::WouldGoNegative { .. })
        ));
        assert!(store.get_usage(&record.id).unwrap().is_none());
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(21));
    }

    #[test]
    fn usage_idempotency_and_lookup() {
        let (store, _dir) = create_test_store();
        let account_id = with_account(&store);
        store
            .append(&NewEntry::welcome_bonus(account_id, dec!(10)))
            .unwrap();

        let (record, entry) = completed(account_id, dec!(0.25));
        let settled = store.settle_usage(&record, &entry).unwrap();
        assert!(matches!(
            store.settle_usage(&record, &entry),
            Err(StoreError::DuplicateUsage { .. })
        ));

        assert_eq!(store.find_entry_by_usage(&record.id).unwrap(), Some(settled));
        let month = YearMonth::of(record.created_at);
        let listed = store
            .list_usage(&account_id, month.start(), month.end())
            .unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[test]
    fn referral_round() {
        let (store, _dir) = create_test_store();
        let referrer = with_account(&store);
        let referred = with_account(&store);

        let code = store
            .get_or_create_referral_code(&ReferralCode::generate(referrer))
            .unwrap();
        assert_eq!(
            store
                .get_or_create_referral_code(&ReferralCode::generate(referrer))
                .unwrap(),
            code
        );

        let record = ReferralRecord::issued(referrer, code.code.clone(), referred);
        let bonus = NewEntry::referral_bonus(referrer, dec!(5), referred);
        store.redeem_referral(&record, &bonus).unwrap();
        assert!(matches!(
            store.redeem_referral(&record, &bonus),
            Err(StoreError::ReferralAlreadyRedeemed { .. })
        ));
        assert_eq!(store.get_balance(&referrer).unwrap(), dec!(5));
        assert_eq!(
            store.get_referral(&referred).unwrap().unwrap().code,
            code.code
        );
    }

    #[test]
    fn survives_reopen_and_reconciles() {
        let dir = TempDir::new().unwrap();
        let account_id = AccountId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.create_account(&Account::new(account_id)).unwrap();
            store
                .append(&NewEntry::welcome_bonus(account_id, dec!(10)))
                .unwrap();
            store
                .append(&NewEntry::adjustment(account_id, dec!(-2.5), "fix".into()))
                .unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(7.5));

        let report = store.reconcile(&account_id).unwrap();
        assert!(report.consistent);
        assert_eq!(report.entry_count, 2);
        assert_eq!(report.replayed_balance, dec!(7.5));
    }
}
