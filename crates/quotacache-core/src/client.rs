//! Retrying clients for the `Cache` and `Accounts` services.
//!
//! Both wrap the generated tonic clients and route every call through
//! [`Retry::run`]. Failures come back as [`Error`], with the `rpc-error`
//! envelope already decoded into [`Error::App`] when one was sent.

use crate::{
    Error, Result, metadata,
    proto::{
        self, Account, DumpItem, DumpReq, GetByTokenReq, GetReq, StoreReq,
        accounts_client::AccountsClient as RawAccountsClient,
        cache_client::CacheClient as RawCacheClient,
    },
    retry::Retry,
};
use bytes::Bytes;
use core::time::Duration;
use std::time::Instant;
use tonic::{
    Request, Response, Status,
    codec::CompressionEncoding,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
};

const CACHE_GET: &str = "/quotacache.Cache/Get";
const CACHE_STORE: &str = "/quotacache.Cache/Store";
const CACHE_DUMP: &str = "/quotacache.Cache/Dump";
const ACCOUNTS_GET_BY_TOKEN: &str = "/quotacache.Accounts/GetByToken";

/// Trust settings for an encrypted channel.
#[derive(Clone, Debug)]
pub struct ClientTls {
    /// PEM-encoded CA certificate(s) the server certificate must chain to.
    pub ca_pem: Vec<u8>,
    /// Name the server certificate must be valid for.
    pub domain: String,
}

/// Builds an endpoint for `url`, encrypted when `tls` is given.
pub fn endpoint(url: &str, tls: Option<&ClientTls>) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(url.to_string())?;
    match tls {
        Some(tls) => Ok(endpoint.tls_config(
            ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(&tls.ca_pem))
                .domain_name(tls.domain.clone()),
        )?),
        None => Ok(endpoint),
    }
}

/// Connects to `url` eagerly.
pub async fn connect(url: &str, tls: Option<&ClientTls>) -> Result<Channel> {
    Ok(endpoint(url, tls)?.connect().await?)
}

/// Returns a channel that connects on first use.
///
/// Used by the server to reach its own `Accounts` endpoint before it has
/// started listening.
pub fn connect_lazy(url: &str, tls: Option<&ClientTls>) -> Result<Channel> {
    Ok(endpoint(url, tls)?.connect_lazy())
}

/// Per-call settings.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Point in time after which no further attempt is started.
    pub deadline: Option<Instant>,
    /// Sends `dry-run: 1` with the request.
    pub dry_run: bool,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    fn request<T>(&self, message: T, timeout: Option<Duration>) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }
        if self.dry_run {
            metadata::set_dry_run(request.metadata_mut());
        }
        request
    }
}

/// Retrying client for the `Cache` service.
#[derive(Clone, Debug)]
pub struct CacheClient {
    inner: RawCacheClient<Channel>,
    retry: Retry,
}

impl CacheClient {
    pub fn new(channel: Channel) -> Self {
        let inner = RawCacheClient::new(channel)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip);
        Self {
            inner,
            retry: Retry::default(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub async fn get(&self, key: &str, opts: &CallOptions) -> Result<Bytes> {
        let resp = self
            .retry
            .run(CACHE_GET, opts.deadline, |timeout| {
                let mut client = self.inner.clone();
                let request = opts.request(
                    GetReq {
                        key: key.to_string(),
                    },
                    timeout,
                );
                async move { client.get(request).await }
            })
            .await
            .map_err(Error::from)?;
        Ok(resp.into_inner().val)
    }

    pub async fn store(
        &self,
        account_token: &str,
        key: &str,
        val: Bytes,
        opts: &CallOptions,
    ) -> Result<()> {
        self.retry
            .run(CACHE_STORE, opts.deadline, |timeout| {
                let mut client = self.inner.clone();
                let request = opts.request(
                    StoreReq {
                        account_token: account_token.to_string(),
                        key: key.to_string(),
                        val: val.clone(),
                    },
                    timeout,
                );
                async move { client.store(request).await }
            })
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn dump(&self, opts: &CallOptions) -> Result<Vec<DumpItem>> {
        let resp = self
            .retry
            .run(CACHE_DUMP, opts.deadline, |timeout| {
                let mut client = self.inner.clone();
                let request = opts.request(DumpReq {}, timeout);
                async move { client.dump(request).await }
            })
            .await
            .map_err(Error::from)?;
        Ok(resp.into_inner().items)
    }
}

/// Retrying client for the `Accounts` service.
#[derive(Clone, Debug)]
pub struct AccountsClient {
    inner: RawAccountsClient<Channel>,
    retry: Retry,
}

impl AccountsClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: RawAccountsClient::new(channel),
            retry: Retry::default(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub async fn get_by_token(&self, token: &str, opts: &CallOptions) -> Result<Account> {
        let resp: Response<proto::GetByTokenResp> = self
            .retry
            .run(ACCOUNTS_GET_BY_TOKEN, opts.deadline, |timeout| {
                let mut client = self.inner.clone();
                let request = opts.request(
                    GetByTokenReq {
                        token: token.to_string(),
                    },
                    timeout,
                );
                async move { client.get_by_token(request).await }
            })
            .await
            .map_err(Error::from)?;

        resp.into_inner()
            .account
            .ok_or_else(|| Error::Rpc(Status::internal("GetByToken response has no account")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_options_forward_timeout_and_dry_run() {
        let opts = CallOptions::default().dry_run();
        let request = opts.request((), Some(Duration::from_millis(250)));
        assert!(metadata::is_dry_run(request.metadata()));
        assert_eq!(
            metadata::timeout(request.metadata()),
            Some(Duration::from_millis(250))
        );

        let plain = CallOptions::default().request((), None);
        assert!(!metadata::is_dry_run(plain.metadata()));
        assert_eq!(metadata::timeout(plain.metadata()), None);
    }

    #[test]
    fn timeout_sets_a_future_deadline() {
        let opts = CallOptions::timeout(Duration::from_secs(1));
        assert!(opts.deadline.unwrap() > Instant::now());
    }

    #[test]
    fn rejects_invalid_urls() {
        let err = endpoint("not a url", None).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}
