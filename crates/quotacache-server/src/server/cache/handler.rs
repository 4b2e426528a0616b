//! `quotacache.Cache` service implementation.
//!
//! [`CacheService`] orchestrates a `Store` in three steps:
//!
//! 1. resolve the caller's account through [`AccountLookup`] (a gRPC call to
//!    the `Accounts` service), bounded by the caller's own deadline,
//! 2. check the account's quota and the `dry-run` flag,
//! 3. write to the shared [`CacheStore`].
//!
//! Failures of the nested lookup are summarized as `Unknown` rather than
//! forwarded, except when the caller's deadline ran out, which is reported as
//! `DeadlineExceeded`. `Get` and `Dump` read the store directly.

use crate::server::{
    accounts::lookup::AccountLookup, cache::store::CacheStore, dispatch::Dispatch, telemetry,
};
use core::time::Duration;
use quotacache_core::{
    AppError, Error, metadata,
    proto::{
        DumpItem, DumpReq, DumpResp, GetReq, GetResp, StoreReq, StoreResp, cache_server::Cache,
    },
};
use std::{sync::Arc, time::Instant};
use tonic::{Code, Request, Response, Status};

const GET: &str = "/quotacache.Cache/Get";
const STORE: &str = "/quotacache.Cache/Store";
const DUMP: &str = "/quotacache.Cache/Dump";

/// Quota-enforcing front of the [`CacheStore`].
#[derive(Clone)]
pub struct CacheService {
    store: Arc<CacheStore>,
    accounts: Arc<dyn AccountLookup>,
    dispatch: Dispatch,
    lookup_timeout: Duration,
}

impl CacheService {
    /// `lookup_timeout` caps the nested account lookup when the caller sent no
    /// deadline, or a longer one.
    pub fn new(
        store: Arc<CacheStore>,
        accounts: Arc<dyn AccountLookup>,
        dispatch: Dispatch,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            accounts,
            dispatch,
            lookup_timeout,
        }
    }

    async fn handle_store(&self, req: Request<StoreReq>) -> Result<StoreResp, Error> {
        let received = Instant::now();
        let dry_run = metadata::is_dry_run(req.metadata());
        let deadline = metadata::timeout(req.metadata()).map(|timeout| received + timeout);
        let lookup_deadline = match deadline {
            Some(deadline) => deadline.min(received + self.lookup_timeout),
            None => received + self.lookup_timeout,
        };
        let StoreReq {
            account_token,
            key,
            val,
        } = req.into_inner();

        let lookup = self.accounts.get_by_token(&account_token, Some(lookup_deadline));
        let account = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline.into(), lookup).await {
                    Ok(result) => result,
                    Err(_) => return Err(deadline_exceeded(&account_token)),
                }
            }
            None => lookup.await,
        };

        let account = account.map_err(|err| {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return deadline_exceeded(&account_token);
            }
            tracing::debug!(token = %account_token, "account lookup failed: {err}");
            AppError::new(
                Code::Unknown,
                false,
                format!("failed to get token {account_token:?}: {err}"),
            )
            .into()
        })?;

        self.store
            .put(&account_token, account.max_cache_keys, &key, val, dry_run)
            .inspect_err(|_| telemetry::increment_quota_rejections())?;

        if dry_run {
            telemetry::increment_dry_runs();
            tracing::debug!(%key, "dry run, store skipped");
        }

        Ok(StoreResp {})
    }
}

fn deadline_exceeded(token: &str) -> Error {
    AppError::new(
        Code::DeadlineExceeded,
        false,
        format!("deadline exceeded while resolving token {token:?}"),
    )
    .into()
}

#[tonic::async_trait]
impl Cache for CacheService {
    #[tracing::instrument(skip_all, fields(key = %req.get_ref().key))]
    async fn get(&self, req: Request<GetReq>) -> Result<Response<GetResp>, Status> {
        self.dispatch
            .unary(GET, req, |req| async move {
                let val = self.store.get(&req.get_ref().key)?;
                Ok(GetResp { val })
            })
            .await
    }

    #[tracing::instrument(skip_all, fields(key = %req.get_ref().key))]
    async fn store(&self, req: Request<StoreReq>) -> Result<Response<StoreResp>, Status> {
        self.dispatch
            .unary(STORE, req, |req| self.handle_store(req))
            .await
    }

    async fn dump(&self, req: Request<DumpReq>) -> Result<Response<DumpResp>, Status> {
        self.dispatch
            .unary(DUMP, req, |_| async move {
                let items = self
                    .store
                    .dump()
                    .into_iter()
                    .map(|(key, val)| DumpItem { key, val })
                    .collect();
                Ok(DumpResp { items })
            })
            .await
    }
}
