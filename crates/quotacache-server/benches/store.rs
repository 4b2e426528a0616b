use bytes::Bytes;
use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quotacache_core::client::{CacheClient, CallOptions, connect};
use quotacache_server::server::{cache::store::CacheStore, config::ServerConfig, serve};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, runtime::Builder};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;

const VALUE: &[u8] = &[7; 64];

fn store_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/in_memory");
    group.throughput(Throughput::Elements(1));

    let store = CacheStore::new();
    let value = Bytes::from_static(VALUE);
    store.put("bench", 1, "hot", value.clone(), false).unwrap();

    group.bench_function("overwrite", |b| {
        b.iter(|| {
            store
                .put("bench", 1, black_box("hot"), value.clone(), false)
                .unwrap();
        });
    });

    group.bench_function("dry_run", |b| {
        b.iter(|| {
            store
                .put("bench", 1, black_box("hot"), value.clone(), true)
                .unwrap();
        });
    });

    group.bench_function("get", |b| {
        b.iter(|| black_box(store.get(black_box("hot")).unwrap()));
    });

    group.bench_function("quota_rejection", |b| {
        b.iter(|| {
            black_box(
                store
                    .put("bench", 1, black_box("cold"), value.clone(), false)
                    .unwrap_err(),
            )
        });
    });

    group.finish();
}

fn grpc_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let shutdown = CancellationToken::new();
    let url = rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("missing local addr");
        let config = ServerConfig::plaintext(addr, [("bench", i64::MAX)]);
        tokio::spawn(serve(
            config,
            TcpListenerStream::new(listener),
            shutdown.clone(),
        ));
        format!("http://{addr}")
    });

    let client = Arc::new(rt.block_on(async {
        CacheClient::new(connect(&url, None).await.expect("failed to connect"))
    }));
    let next_key = Arc::new(AtomicU64::new(0));

    let mut group = c.benchmark_group("store/grpc");
    group
        .sample_size(20)
        .measurement_time(Duration::from_secs(10));

    for concurrency in [1, 16] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("concurrency={concurrency}")),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let client = Arc::clone(&client);
                    let next_key = Arc::clone(&next_key);
                    async move {
                        let calls = (0..concurrency).map(|_| {
                            let key = next_key.fetch_add(1, Ordering::Relaxed).to_string();
                            let client = Arc::clone(&client);
                            async move {
                                client
                                    .store(
                                        "bench",
                                        &key,
                                        Bytes::from_static(VALUE),
                                        &CallOptions::default(),
                                    )
                                    .await
                            }
                        });
                        for result in futures::future::join_all(calls).await {
                            result.expect("store failed");
                        }
                    }
                });
            },
        );
    }

    group.finish();
    shutdown.cancel();
}

criterion_group!(benches, store_bench, grpc_bench);
criterion_main!(benches);
