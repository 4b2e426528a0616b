use quotacache_core::{AppError, proto::Account};
use std::collections::HashMap;
use tonic::Code;

/// Read-only mapping of account tokens to their quotas.
///
/// Built once at startup and shared behind an `Arc`; there is no mutation
/// path, so lookups need no locking.
#[derive(Clone, Debug, Default)]
pub struct AccountDirectory {
    accounts: HashMap<String, Account>,
}

impl AccountDirectory {
    pub fn new<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let accounts = accounts
            .into_iter()
            .map(|(token, max_cache_keys)| (token.into(), Account { max_cache_keys }))
            .collect();
        Self { accounts }
    }

    /// Exact-match lookup. Unknown tokens are a permanent `NotFound`.
    pub fn get_by_token(&self, token: &str) -> Result<Account, AppError> {
        self.accounts.get(token).cloned().ok_or_else(|| {
            AppError::new(Code::NotFound, false, format!("token not found {token:?}"))
        })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
