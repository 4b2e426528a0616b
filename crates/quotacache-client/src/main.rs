#![doc = include_str!("../README.md")]

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use core::time::Duration;
use quotacache_core::client::{CacheClient, CallOptions, ClientTls, connect};
use std::path::PathBuf;
use tonic::Code;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "quotacache-client",
    version,
    about = "Stores, reads and dumps a few keys on a quotacache server"
)]
struct Args {
    /// Endpoint of the quotacache server.
    ///
    /// Environment variable: `SERVER_URL`
    #[arg(long, env = "SERVER_URL", default_value_t = String::from("http://127.0.0.1:50051"))]
    server_url: String,

    /// Account token the stores are charged to.
    ///
    /// Environment variable: `ACCOUNT_TOKEN`
    #[arg(long, env = "ACCOUNT_TOKEN", default_value_t = String::from("token"))]
    account_token: String,

    /// PEM CA bundle for an `https://` server.
    ///
    /// Environment variable: `TLS_CA`
    #[arg(long, env = "TLS_CA")]
    tls_ca: Option<PathBuf>,

    /// Name the server certificate must be valid for.
    ///
    /// Environment variable: `TLS_DOMAIN`
    #[arg(long, env = "TLS_DOMAIN", default_value_t = String::from("localhost"))]
    tls_domain: String,

    /// Deadline for each logical call, retries included.
    ///
    /// Environment variable: `TIMEOUT_MS`
    #[arg(long, env = "TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_target(false)
        .init();

    let args = Args::parse();
    let tls = match &args.tls_ca {
        Some(path) => Some(ClientTls {
            ca_pem: std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            domain: args.tls_domain.clone(),
        }),
        None => None,
    };

    let channel = connect(&args.server_url, tls.as_ref())
        .await
        .with_context(|| format!("failed to connect to {}", args.server_url))?;
    let client = CacheClient::new(channel);
    let timeout = Duration::from_millis(args.timeout_ms);
    let opts = || CallOptions::timeout(timeout);
    let token = args.account_token.as_str();

    client
        .store(token, "a", Bytes::from_static(b"1"), &opts())
        .await
        .context("store a")?;
    println!("stored a = 1");

    client
        .store(token, "d", Bytes::from_static(b"4"), &opts().dry_run())
        .await
        .context("dry-run store d")?;
    println!("validated d = 4 (dry run)");

    let val = client.get("a", &opts()).await.context("get a")?;
    println!("get a = {}", String::from_utf8_lossy(&val));

    match client.get("d", &opts()).await {
        Err(err) if err.code() == Code::NotFound => println!("get d: not found, as expected"),
        Err(err) => return Err(err).context("get d"),
        Ok(val) => anyhow::bail!(
            "dry-run key d was written: {}",
            String::from_utf8_lossy(&val)
        ),
    }

    let items = client.dump(&opts()).await.context("dump")?;
    println!("dump: {} item(s)", items.len());
    for item in items {
        println!("  {} = {}", item.key, String::from_utf8_lossy(&item.val));
    }

    Ok(())
}
