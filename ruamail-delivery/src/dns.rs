//! MX resolution for direct delivery.
//!
//! Implements MX record lookups with A/AAAA fallback per RFC 5321 section 5.1,
//! cached using the record TTLs within configurable bounds. The transport
//! selector only sees the [`MxLookup`] trait.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider, proto::rr::Record,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// TTL assumed when a lookup carries no records to take one from
const FALLBACK_TTL: u32 = 300;

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// No MX, A, or AAAA records found for the domain.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

/// Configuration for the DNS resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cache TTL override in seconds
    ///
    /// If set, replaces the record TTL for every cached entry.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Minimum cache TTL in seconds (default: 60)
    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Maximum cache TTL in seconds (default: 3600)
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    60
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
        }
    }
}

impl DnsConfig {
    /// How long a lookup answered with `dns_ttl` stays cached
    #[must_use]
    pub fn cache_ttl(&self, dns_ttl: u32) -> Duration {
        let secs = self.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(dns_ttl).clamp(
                self.min_cache_ttl_secs,
                self.max_cache_ttl_secs.max(self.min_cache_ttl_secs),
            )
        });
        Duration::from_secs(secs)
    }
}

/// A mail exchanger with its preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServer {
    /// Host name (without the trailing root dot) or IP address
    pub host: String,
    /// MX preference, lower first. 0 for the A/AAAA fallback.
    pub priority: u16,
}

impl MailServer {
    #[must_use]
    pub fn new(host: impl Into<String>, priority: u16) -> Self {
        let host = host.into();
        Self {
            host: host.strip_suffix('.').map(str::to_string).unwrap_or(host),
            priority,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResult {
    servers: Arc<Vec<MailServer>>,
    expires_at: Instant,
}

/// Caching MX resolver over the system DNS configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedResult>,
    config: DnsConfig,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn with_dns_config(config: DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            config,
        })
    }

    /// Resolves mail servers for a domain following RFC 5321 section 5.1.
    ///
    /// MX records sorted by preference, or the domain's addresses when it
    /// publishes no MX. Answers are cached per domain.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if no mail server can be found or the query fails.
    pub async fn resolve_mail_servers(
        &self,
        domain: &str,
    ) -> Result<Arc<Vec<MailServer>>, DnsError> {
        let key = domain.to_ascii_lowercase();

        if let Some(cached) = self.cache.get(&key) {
            if cached.expires_at > Instant::now() {
                debug!("Cache hit for {domain}, {} server(s)", cached.servers.len());
                return Ok(Arc::clone(&cached.servers));
            }
            debug!("Cache entry expired for {domain}");
        }

        let (servers, dns_ttl) = self.lookup(&key).await?;
        let servers = Arc::new(servers);
        let ttl = self.config.cache_ttl(dns_ttl);

        self.cache.insert(
            key,
            CachedResult {
                servers: Arc::clone(&servers),
                expires_at: Instant::now() + ttl,
            },
        );

        debug!(
            "Cached {} server(s) for {domain}, DNS TTL {dns_ttl}s, cache TTL {}s",
            servers.len(),
            ttl.as_secs()
        );

        Ok(servers)
    }

    async fn lookup(&self, domain: &str) -> Result<(Vec<MailServer>, u32), DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(mx_lookup) => {
                let ttl = mx_lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(Record::ttl)
                    .min()
                    .unwrap_or(FALLBACK_TTL);

                let mut servers: Vec<MailServer> = mx_lookup
                    .iter()
                    .map(|mx| MailServer::new(mx.exchange().to_utf8(), mx.preference()))
                    .collect();

                if servers.is_empty() {
                    return self.lookup_addresses(domain).await;
                }

                servers.sort_by_key(|server| server.priority);
                Ok((servers, ttl))
            }
            Err(err) if err.is_no_records_found() => {
                debug!("No MX records for {domain}, falling back to A/AAAA");
                self.lookup_addresses(domain).await
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }

    /// Implicit MX: the domain's own addresses
    async fn lookup_addresses(&self, domain: &str) -> Result<(Vec<MailServer>, u32), DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(ip_lookup) => {
                let ttl = ip_lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(Record::ttl)
                    .min()
                    .unwrap_or(FALLBACK_TTL);

                let servers: Vec<MailServer> = ip_lookup
                    .iter()
                    .map(|ip| MailServer::new(ip.to_string(), 0))
                    .collect();

                if servers.is_empty() {
                    Err(DnsError::NoMailServers(domain.to_string()))
                } else {
                    Ok((servers, ttl))
                }
            }
            Err(err) if err.is_no_records_found() => {
                Err(DnsError::NoMailServers(domain.to_string()))
            }
            Err(err) => {
                warn!("A/AAAA lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}

/// Looks up the mail exchangers of a domain.
#[async_trait]
pub trait MxLookup: Send + Sync + std::fmt::Debug {
    /// Mail servers for `domain`, most preferred first
    ///
    /// # Errors
    ///
    /// Returns a [`DnsError`] when no server can be determined.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MailServer>, DnsError>;
}

#[async_trait]
impl MxLookup for DnsResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
        self.resolve_mail_servers(domain)
            .await
            .map(|servers| servers.as_ref().clone())
    }
}
