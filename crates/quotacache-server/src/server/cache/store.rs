//! In-memory cache with per-account key quotas.
//!
//! [`CacheStore`] owns two maps behind one mutex: the entries themselves and
//! the usage ledger counting how many distinct keys each account has created.
//! `put` performs its read-check-increment-write sequence while holding the
//! lock, so concurrent stores for the same account can never both pass the
//! quota check on the last free slot.
//!
//! Conflicting stores of the same key resolve last-writer-wins: the value left
//! in the cache is the one from whichever `put` took the lock last. The key
//! stays charged to the account that created it.

use bytes::Bytes;
use parking_lot::Mutex;
use quotacache_core::AppError;
use std::collections::HashMap;
use tonic::Code;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Bytes>,
    usage: HashMap<String, i64>,
}

/// Volatile key-value store shared by all in-flight requests.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: Mutex<Inner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    ///
    /// A miss is reported as a temporary `NotFound`: a concurrent `Store` may
    /// create the key, so callers are allowed to retry.
    pub fn get(&self, key: &str) -> Result<Bytes, AppError> {
        self.inner
            .lock()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::new(Code::NotFound, true, format!("key not found {key:?}")))
    }

    /// Stores `value` under `key`, charging a newly created key to `token`.
    ///
    /// Fails with a non-temporary `FailedPrecondition` when `key` is new and
    /// the account already owns `max_cache_keys` keys. With `dry_run` set the
    /// quota check still runs but nothing is written.
    pub fn put(
        &self,
        token: &str,
        max_cache_keys: i64,
        key: &str,
        value: Bytes,
        dry_run: bool,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock();

        let count = inner.usage.get(token).copied().unwrap_or(0);
        let is_new = !inner.entries.contains_key(key);
        if is_new && count >= max_cache_keys {
            return Err(AppError::new(
                Code::FailedPrecondition,
                false,
                format!("account {token:?} exceeds max key limit {max_cache_keys}"),
            ));
        }

        if dry_run {
            return Ok(());
        }

        if is_new {
            *inner.usage.entry(token.to_string()).or_insert(0) += 1;
        }
        inner.entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Point-in-time copy of every entry, in no particular order.
    pub fn dump(&self) -> Vec<(String, Bytes)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Number of keys created under `token` so far.
    pub fn usage(&self, token: &str) -> i64 {
        self.inner.lock().usage.get(token).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
