use quotacache_core::{
    Result,
    client::{AccountsClient, CallOptions},
    proto::Account,
};
use std::time::Instant;

/// Resolves an account token to its quota.
///
/// The cache service only sees the directory through this trait. The
/// production implementation is [`AccountsClient`], a retrying gRPC client,
/// so every `Store` performs a real service-to-service call.
#[tonic::async_trait]
pub trait AccountLookup: Send + Sync + 'static {
    /// Looks `token` up, giving up at `deadline`.
    async fn get_by_token(&self, token: &str, deadline: Option<Instant>) -> Result<Account>;
}

#[tonic::async_trait]
impl AccountLookup for AccountsClient {
    async fn get_by_token(&self, token: &str, deadline: Option<Instant>) -> Result<Account> {
        let opts = CallOptions::default().with_deadline(deadline);
        AccountsClient::get_by_token(self, token, &opts).await
    }
}
