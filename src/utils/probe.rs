/// DNS and TCP reachability checks used by the provisioning gates
use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveResult;
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network observations the orchestrator waits on
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Current A records for a hostname
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>>;

    /// Whether a TCP connection to ip:port can be established
    async fn port_open(&self, ip: IpAddr, port: u16) -> bool;
}

/// Probe backed by the host's resolvers and real sockets
pub struct SystemProbe {
    resolver: TokioAsyncResolver,
}

impl SystemProbe {
    pub fn new() -> Self {
        let (config, opts) = resolver_settings(read_system_conf());
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

/// The host's resolv.conf, or Cloudflare when it cannot be read. Caching is off
/// either way, so a freshly created record is seen on the next attempt.
fn resolver_settings(
    system: ResolveResult<(ResolverConfig, ResolverOpts)>,
) -> (ResolverConfig, ResolverOpts) {
    let (config, mut opts) = match system {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Cannot read system resolver configuration, using Cloudflare: {}", e);
            (ResolverConfig::cloudflare(), ResolverOpts::default())
        }
    };
    opts.cache_size = 0;
    (config, opts)
}

#[async_trait]
impl NetworkProbe for SystemProbe {
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>> {
        let lookup = self
            .resolver
            .ipv4_lookup(host)
            .await
            .with_context(|| format!("DNS lookup for {} failed", host))?;
        Ok(lookup.iter().map(|a| a.0).collect())
    }

    async fn port_open(&self, ip: IpAddr, port: u16) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((ip, port))).await,
            Ok(Ok(_))
        )
    }
}

/// True when the lookup returned the expected address and nothing else
pub fn resolves_exactly(addrs: &[Ipv4Addr], expected: Ipv4Addr) -> bool {
    !addrs.is_empty() && addrs.iter().all(|a| *a == expected)
}
