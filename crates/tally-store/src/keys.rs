//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.

use tally_core::{AccountId, UsageId, YearMonth};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Decode an account key.
#[must_use]
pub fn account_id_from_key(key: &[u8]) -> Option<AccountId> {
    let bytes: [u8; 16] = key.get(..16)?.try_into().ok()?;
    Some(AccountId::from_bytes(bytes))
}

/// Create a ledger key.
///
/// Format: `account_id (16 bytes) || sequence (8 bytes, big-endian)`
///
/// Big-endian sequences make byte order equal to append order.
#[must_use]
pub fn entry_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Create a prefix for iterating everything keyed under an account.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the sequence from a ledger key.
#[must_use]
pub fn sequence_from_entry_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(16..24)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Create a payment reference index key.
#[must_use]
pub fn payment_ref_key(payment_ref: &str) -> Vec<u8> {
    payment_ref.as_bytes().to_vec()
}

/// Create a usage record key from a usage ID.
#[must_use]
pub fn usage_key(usage_id: &UsageId) -> Vec<u8> {
    usage_id.to_bytes().to_vec()
}

/// Create an account-usage index key.
///
/// Format: `account_id (16 bytes) || usage_id (16 bytes)`
///
/// Since ULIDs are time-ordered, an account's usage sorts by creation time.
#[must_use]
pub fn account_usage_key(account_id: &AccountId, usage_id: &UsageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&usage_id.to_bytes());
    key
}

/// Extract the usage ID from an account-usage index key.
#[must_use]
pub fn usage_id_from_account_key(key: &[u8]) -> Option<UsageId> {
    let bytes: [u8; 16] = key.get(16..32)?.try_into().ok()?;
    Some(UsageId::from_bytes(bytes))
}

/// Create a referral code key.
#[must_use]
pub fn referral_code_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Create a billing period key.
///
/// Format: `account_id (16 bytes) || "YYYY-MM"`
#[must_use]
pub fn billing_period_key(account_id: &AccountId, year_month: YearMonth) -> Vec<u8> {
    let mut key = Vec::with_capacity(23);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(year_month.to_string().as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keys_sort_by_sequence() {
        let account_id = AccountId::generate();
        let k2 = entry_key(&account_id, 2);
        let k10 = entry_key(&account_id, 10);
        let k256 = entry_key(&account_id, 256);

        assert_eq!(k2.len(), 24);
        assert!(k2 < k10);
        assert!(k10 < k256);
        assert!(k2.starts_with(&account_prefix(&account_id)));
    }

    #[test]
    fn entry_key_roundtrip() {
        let account_id = AccountId::generate();
        let key = entry_key(&account_id, 42);

        assert_eq!(account_id_from_key(&key), Some(account_id));
        assert_eq!(sequence_from_entry_key(&key), Some(42));
        assert_eq!(sequence_from_entry_key(&key[..20]), None);
    }

    #[test]
    fn account_usage_key_format() {
        let account_id = AccountId::generate();
        let usage_id = UsageId::generate();
        let key = account_usage_key(&account_id, &usage_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(usage_id_from_account_key(&key), Some(usage_id));
    }

    #[test]
    fn billing_period_key_format() {
        let account_id = AccountId::generate();
        let key = billing_period_key(&account_id, YearMonth::new(2026, 3).unwrap());

        assert_eq!(key.len(), 23);
        assert_eq!(&key[16..], b"2026-03");
    }
}
