//! Server side of quotacache.
//!
//! - [`accounts`] - account directory and the `Accounts` service.
//! - [`cache`] - quota-bounded store and the `Cache` service.
//! - [`dispatch`] - middleware stack every handler runs through.
//! - [`config`] - CLI and environment configuration.
//! - [`telemetry`] - logging and optional OpenTelemetry export.
//!
//! [`serve`] wires them into one tonic server.

pub mod accounts;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod telemetry;

use accounts::{directory::AccountDirectory, handler::AccountsService, lookup::AccountLookup};
use cache::{handler::CacheService, store::CacheStore};
use config::ServerConfig;
use dispatch::{Dispatch, Instrumented};
use futures::Stream;
use quotacache_core::{
    client::{AccountsClient, connect_lazy},
    proto::{FILE_DESCRIPTOR_SET, accounts_server::AccountsServer, cache_server::CacheServer},
    retry::Retry,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Identity, Server, ServerTlsConfig, server::Connected},
};
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Serves the `Cache`, `Accounts`, health and reflection services on
/// `incoming` until `shutdown` is cancelled.
///
/// Account lookups made by `Store` go over gRPC to `config.accounts_url`,
/// which by default is this very server. The channel connects lazily, so it
/// is fine that the listener only starts accepting once this future runs.
pub async fn serve<I, IO, IE>(
    config: ServerConfig,
    incoming: I,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<CacheServer<CacheService>>()
        .await;
    health_reporter
        .set_serving::<AccountsServer<AccountsService>>()
        .await;

    let dispatch = Dispatch::builder().layer(Instrumented).build();

    let directory = Arc::new(AccountDirectory::new(config.accounts.clone()));
    let lookup: Arc<dyn AccountLookup> = Arc::new(
        AccountsClient::new(connect_lazy(
            &config.accounts_url,
            config.accounts_tls.as_ref(),
        )?)
        .with_retry(Retry::new(config.max_attempts)),
    );

    let cache = CacheService::new(
        Arc::new(CacheStore::new()),
        lookup,
        dispatch.clone(),
        config.lookup_timeout,
    );
    let accounts = AccountsService::new(Arc::clone(&directory), dispatch);

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let mut builder = Server::builder();
    if let Some(tls) = &config.tls {
        builder = builder.tls_config(
            ServerTlsConfig::new().identity(Identity::from_pem(&tls.cert_pem, &tls.key_pem)),
        )?;
    }

    log_startup_info(&config, directory.len());

    builder
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_cache_service(cache))
        .add_service(build_accounts_service(accounts))
        .serve_with_incoming_shutdown(incoming, async move {
            shutdown.cancelled().await;
            tracing::info!("Shutdown requested, draining in-flight calls");
            health_reporter
                .set_not_serving::<CacheServer<CacheService>>()
                .await;
            health_reporter
                .set_not_serving::<AccountsServer<AccountsService>>()
                .await;
        })
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig, accounts: usize) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting quotacache on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.server_addr,
            accounts_url = %config.accounts_url,
            accounts,
            tls = config.tls.is_some(),
            "Starting quotacache"
        );
    }
}

fn build_cache_service(service: CacheService) -> CacheServer<CacheService> {
    CacheServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}

fn build_accounts_service(service: AccountsService) -> AccountsServer<AccountsService> {
    AccountsServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}
