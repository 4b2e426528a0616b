use bytes::Bytes;
use core::time::Duration;
use quotacache_core::{
    client::{AccountsClient, CacheClient, CallOptions, connect},
    proto::{GetReq, cache_client::CacheClient as RawCacheClient},
    retry::Retry,
};
use quotacache_server::server::{config::ServerConfig, serve};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(accounts: &[(&str, i64)]) -> Self {
        Self::start_with(accounts, |_| {}).await
    }

    async fn start_with(
        accounts: &[(&str, i64)],
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = ServerConfig::plaintext(addr, accounts.iter().copied());
        configure(&mut config);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(
            config,
            TcpListenerStream::new(listener),
            shutdown.clone(),
        ));

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn cache(&self) -> CacheClient {
        CacheClient::new(connect(&self.url(), None).await.unwrap())
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn opts() -> CallOptions {
    CallOptions::timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn stores_within_quota_then_rejects() {
    let server = TestServer::start(&[("token", 2)]).await;
    let client = server.cache().await;

    client
        .store("token", "a", Bytes::from_static(b"1"), &opts())
        .await
        .unwrap();
    client
        .store("token", "b", Bytes::from_static(b"2"), &opts())
        .await
        .unwrap();

    let err = client
        .store("token", "c", Bytes::from_static(b"3"), &opts())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(!err.is_temporary());

    assert_eq!(
        client.get("a", &opts()).await.unwrap(),
        Bytes::from_static(b"1")
    );
    assert_eq!(client.dump(&opts()).await.unwrap().len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn unknown_token_is_unknown_and_writes_nothing() {
    let server = TestServer::start(&[("token", 2)]).await;
    let client = server.cache().await;

    let err = client
        .store("badtoken", "x", Bytes::from_static(b"1"), &opts())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unknown);
    assert!(err.message().contains("badtoken"));

    let err = client
        .get("x", &CallOptions::timeout(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(err.is_temporary());

    server.stop().await;
}

#[tokio::test]
async fn dry_run_store_is_not_visible() {
    let server = TestServer::start(&[("token", 2)]).await;
    let client = server.cache().await;

    client
        .store("token", "d", Bytes::from_static(b"4"), &opts().dry_run())
        .await
        .unwrap();

    let err = client.get("d", &opts()).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(client.dump(&opts()).await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn accounts_service_answers_directly() {
    let server = TestServer::start(&[("token", 2), ("team", 100)]).await;
    let accounts = AccountsClient::new(connect(&server.url(), None).await.unwrap());

    let account = accounts.get_by_token("team", &opts()).await.unwrap();
    assert_eq!(account.max_cache_keys, 100);

    let err = accounts.get_by_token("nobody", &opts()).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(!err.is_temporary());

    server.stop().await;
}

#[tokio::test]
async fn temporary_misses_are_retried_up_to_the_budget() {
    let server = TestServer::start(&[("token", 2)]).await;
    let channel = connect(&server.url(), None).await.unwrap();
    let raw = RawCacheClient::new(channel);

    let attempts = AtomicUsize::new(0);
    let status = Retry::new(3)
        .run("/quotacache.Cache/Get", None, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            let mut raw = raw.clone();
            async move {
                raw.get(Request::new(GetReq {
                    key: "missing".to_string(),
                }))
                .await
            }
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    server.stop().await;
}

#[tokio::test]
async fn concurrent_stores_never_exceed_the_quota() {
    const MAX: i64 = 4;
    let server = TestServer::start(&[("token", MAX)]).await;
    let client = Arc::new(server.cache().await);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .store("token", &format!("k{i}"), Bytes::new(), &opts())
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(err) => assert_eq!(err.code(), Code::FailedPrecondition),
        }
    }

    assert_eq!(accepted, MAX);
    assert_eq!(client.dump(&opts()).await.unwrap().len(), MAX as usize);

    server.stop().await;
}

#[tokio::test]
async fn short_client_deadline_fails_fast() {
    let server = TestServer::start(&[("token", 2)]).await;
    let client = server.cache().await;

    let deadline = Instant::now();
    let err = client
        .get("a", &CallOptions::default().with_deadline(Some(deadline)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    server.stop().await;
}

/// Accepts connections and never answers on them.
async fn silent_endpoint() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (addr, handle)
}

#[tokio::test]
async fn deadline_expiring_during_the_account_lookup() {
    let (accounts_addr, silent) = silent_endpoint().await;
    let server = TestServer::start_with(&[("token", 2)], |config| {
        config.accounts_url = format!("http://{accounts_addr}");
        config.lookup_timeout = Duration::from_secs(10);
    })
    .await;
    let client = server.cache().await;

    let started = Instant::now();
    let err = client
        .store(
            "token",
            "z",
            Bytes::from_static(b"1"),
            &CallOptions::timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded, "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(client.dump(&opts()).await.unwrap().is_empty());

    silent.abort();
    server.stop().await;
}
