use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use quotacache_core::{client::ClientTls, retry::DEFAULT_MAX_ATTEMPTS};
use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    path::PathBuf,
};

/// Runtime configuration for the `quotacache-server` binary.
///
/// Every setting can come from a CLI flag or the environment variable named
/// next to it; a `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "quotacache-server",
    version,
    about = "A gRPC key-value cache with per-account key quotas"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Endpoint of the `Accounts` service used to resolve tokens during
    /// `Store`. Defaults to this server's own address.
    ///
    /// Example: "http://accounts.internal:50051"
    ///
    /// Environment variable: `ACCOUNTS_ADDR`
    #[arg(long, env = "ACCOUNTS_ADDR")]
    pub accounts_addr: Option<String>,

    /// Accounts served by the directory, as a comma-separated `token:max`
    /// list where `max` is the number of keys the account may create.
    ///
    /// Environment variable: `ACCOUNTS`
    #[arg(long, env = "ACCOUNTS", default_value_t = String::from("token:2"))]
    pub accounts: String,

    /// PEM certificate chain presented by the server. Requires `TLS_KEY`.
    ///
    /// Environment variable: `TLS_CERT`
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `TLS_CERT`.
    ///
    /// Environment variable: `TLS_KEY`
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// PEM CA bundle trusted when dialing the `Accounts` service. Enables TLS
    /// on that connection.
    ///
    /// Environment variable: `TLS_CA`
    #[arg(long, env = "TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Name the `Accounts` certificate must be valid for.
    ///
    /// Environment variable: `TLS_DOMAIN`
    #[arg(long, env = "TLS_DOMAIN", default_value_t = String::from("localhost"))]
    pub tls_domain: String,

    /// Upper bound, in milliseconds, on the nested account lookup of a
    /// `Store`. The caller's own deadline wins when it is shorter.
    ///
    /// Environment variable: `LOOKUP_TIMEOUT_MS`
    #[arg(long, env = "LOOKUP_TIMEOUT_MS", default_value_t = 1000)]
    pub lookup_timeout_ms: u64,

    /// Attempts made for each nested account lookup when the directory
    /// reports a temporary failure.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,
}

/// PEM material for the server identity.
#[derive(Clone)]
pub struct ServerTls {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl core::fmt::Debug for ServerTls {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerTls")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub accounts_url: String,
    pub accounts: Vec<(String, i64)>,
    pub tls: Option<ServerTls>,
    pub accounts_tls: Option<ClientTls>,
    pub lookup_timeout: Duration,
    pub max_attempts: usize,
}

impl ServerConfig {
    /// Plaintext configuration for a server already bound to `addr`, dialing
    /// itself for account lookups.
    pub fn plaintext<I, S>(addr: SocketAddr, accounts: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            server_addr: addr.to_string(),
            accounts_url: format!("http://{}", dialable(addr)),
            accounts: accounts
                .into_iter()
                .map(|(token, max)| (token.into(), max))
                .collect(),
            tls: None,
            accounts_tls: None,
            lookup_timeout: Duration::from_millis(1000),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_attempts == 0 {
            bail!("MAX_ATTEMPTS must be greater than 0");
        }

        if args.lookup_timeout_ms == 0 {
            bail!("LOOKUP_TIMEOUT_MS must be greater than 0");
        }

        let accounts = parse_accounts(&args.accounts)?;

        let tls = match (&args.tls_cert, &args.tls_key) {
            (Some(cert), Some(key)) => Some(ServerTls {
                cert_pem: read_pem(cert)?,
                key_pem: read_pem(key)?,
            }),
            (None, None) => None,
            _ => bail!("TLS_CERT and TLS_KEY must be set together"),
        };

        let accounts_tls = match &args.tls_ca {
            Some(ca) => Some(ClientTls {
                ca_pem: read_pem(ca)?,
                domain: args.tls_domain.clone(),
            }),
            None => None,
        };

        let scheme = if accounts_tls.is_some() {
            "https"
        } else {
            "http"
        };

        let accounts_url = match args.accounts_addr {
            Some(addr) if addr.contains("://") => addr,
            Some(addr) => format!("{scheme}://{addr}"),
            None => {
                if tls.is_some() && accounts_tls.is_none() {
                    bail!("TLS_CA is required to reach the server's own Accounts service over TLS");
                }
                let own = match args.server_addr.parse::<SocketAddr>() {
                    Ok(addr) => dialable(addr).to_string(),
                    Err(_) => args.server_addr.clone(),
                };
                format!("{scheme}://{own}")
            }
        };

        Ok(Self {
            server_addr: args.server_addr,
            accounts_url,
            accounts,
            tls,
            accounts_tls,
            lookup_timeout: Duration::from_millis(args.lookup_timeout_ms),
            max_attempts: args.max_attempts,
        })
    }
}

/// Parses a `token:max[,token:max...]` list.
pub fn parse_accounts(list: &str) -> anyhow::Result<Vec<(String, i64)>> {
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((token, max)) = entry.rsplit_once(':') else {
            bail!("account {entry:?} must look like token:max");
        };
        let token = token.trim();
        if token.is_empty() {
            bail!("account {entry:?} has an empty token");
        }
        let max: i64 = max
            .trim()
            .parse()
            .with_context(|| format!("account {entry:?} has an invalid max key count"))?;
        if max < 0 {
            bail!("account {entry:?} has a negative max key count");
        }
        if !seen.insert(token.to_string()) {
            bail!("account token {token:?} is listed twice");
        }
        accounts.push((token.to_string(), max));
    }

    Ok(accounts)
}

fn read_pem(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Maps a wildcard listen address to the loopback address of the same family.
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}
