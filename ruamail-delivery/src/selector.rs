//! Transport selection.
//!
//! Selection order:
//! 1. A registered [`SelectFn`] decides alone.
//! 2. A configured smarthost yields one persistent submission candidate.
//! 3. Otherwise the recipient domain's first MX is tried with STARTTLS, then
//!    in plain text.
//!
//! Only the first MX host is used. Lower preference exchangers are never
//! tried.

use std::{
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};

use ruamail_common::{Report, config::SmtpConfig, tracing};

use crate::dns::MxLookup;

/// Connection security of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Upgrade with STARTTLS before sending; fail if it is not offered
    StartTls,
    None,
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartTls => "starttls",
            Self::None => "none",
        })
    }
}

/// One way of reaching the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCandidate {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    /// Bound on one complete SMTP session over this candidate
    pub timeout: Duration,
    pub credentials: Option<(String, String)>,
    /// Keep the connection open for later messages
    pub persistent: bool,
}

impl TransportCandidate {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, encryption: Encryption, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            encryption,
            timeout,
            credentials: None,
            persistent: false,
        }
    }

    /// `host:port`, bracketing IPv6 literals
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What a selection function gets to decide on.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub recipient: &'a str,
    /// Domain part of the recipient address
    pub domain: &'a str,
    pub report: Option<&'a Report>,
}

/// A caller supplied selection function, replacing the built-in rules.
pub type SelectFn = Arc<dyn Fn(&SelectionContext<'_>) -> Vec<TransportCandidate> + Send + Sync>;

/// Chooses the ordered transport candidates for a recipient.
pub struct TransportSelector {
    config: SmtpConfig,
    mx: Arc<dyn MxLookup>,
    custom: Option<SelectFn>,
    smarthost: OnceLock<TransportCandidate>,
}

impl fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSelector")
            .field("smarthost", &self.config.smarthost)
            .field("custom", &self.custom.is_some())
            .finish_non_exhaustive()
    }
}

impl TransportSelector {
    #[must_use]
    pub fn new(config: SmtpConfig, mx: Arc<dyn MxLookup>) -> Self {
        Self {
            config,
            mx,
            custom: None,
            smarthost: OnceLock::new(),
        }
    }

    /// Register a selection function that replaces the built-in rules
    #[must_use]
    pub fn with_select_fn(mut self, select: SelectFn) -> Self {
        self.custom = Some(select);
        self
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// The smarthost candidate, built on first use
    fn smarthost(&self, smarthost: &str) -> &TransportCandidate {
        self.smarthost.get_or_init(|| {
            let (host, port) = split_host_port(smarthost, self.config.submission_port);
            let mut candidate =
                TransportCandidate::new(host, port, Encryption::StartTls, self.timeout());
            candidate.credentials = self.config.credentials();
            candidate.persistent = true;
            candidate
        })
    }

    /// Ordered candidates for one delivery
    pub async fn select(&self, context: &SelectionContext<'_>) -> Vec<TransportCandidate> {
        if let Some(select) = &self.custom {
            return select(context);
        }

        if let Some(smarthost) = self.config.smarthost.as_deref().filter(|s| !s.trim().is_empty()) {
            return vec![self.smarthost(smarthost.trim()).clone()];
        }

        if context.domain.is_empty() {
            return Vec::new();
        }

        let host = match self.mx.lookup_mx(context.domain).await {
            Ok(servers) if !servers.is_empty() => servers[0].host.clone(),
            Ok(_) => context.domain.to_string(),
            Err(e) => {
                tracing::debug!(domain = context.domain, "MX lookup failed, using the domain itself: {e}");
                context.domain.to_string()
            }
        };

        let port = self.config.mx_port;
        vec![
            TransportCandidate::new(host.clone(), port, Encryption::StartTls, self.timeout()),
            TransportCandidate::new(host, port, Encryption::None, self.timeout()),
        ]
    }
}

/// Split `host[:port]`, leaving bare IPv6 literals alone
fn split_host_port(value: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|port| port.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (value.to_string(), default_port),
        },
        _ => (value.to_string(), default_port),
    }
}

/// The domain part of an address, lowercased
#[must_use]
pub fn recipient_domain(recipient: &str) -> String {
    recipient
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().trim_end_matches('>').to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dns::{DnsError, MailServer};

    #[derive(Debug, Default)]
    struct StaticMx {
        servers: Vec<MailServer>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MxLookup for StaticMx {
        async fn lookup_mx(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.servers.is_empty() {
                Err(DnsError::NoMailServers(domain.to_string()))
            } else {
                Ok(self.servers.clone())
            }
        }
    }

    fn context<'a>(recipient: &'a str, domain: &'a str) -> SelectionContext<'a> {
        SelectionContext {
            recipient,
            domain,
            report: None,
        }
    }

    #[tokio::test]
    async fn test_mx_candidates_starttls_then_plain() {
        let mx = Arc::new(StaticMx {
            servers: vec![
                MailServer::new("mx1.example.com.", 10),
                MailServer::new("mx2.example.com.", 20),
            ],
            ..StaticMx::default()
        });
        let selector = TransportSelector::new(SmtpConfig::default(), mx);

        let candidates = selector
            .select(&context("dmarc@example.com", "example.com"))
            .await;

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].address(), "mx1.example.com:25");
        assert_eq!(candidates[0].encryption, Encryption::StartTls);
        assert_eq!(candidates[1].address(), "mx1.example.com:25");
        assert_eq!(candidates[1].encryption, Encryption::None);
        assert!(candidates.iter().all(|c| !c.persistent && c.credentials.is_none()));
        assert_eq!(candidates[0].timeout, Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_failed_lookup_uses_domain() {
        let selector = TransportSelector::new(SmtpConfig::default(), Arc::new(StaticMx::default()));

        let candidates = selector
            .select(&context("dmarc@example.org", "example.org"))
            .await;

        assert_eq!(candidates[0].host, "example.org");
    }

    #[tokio::test]
    async fn test_smarthost_is_built_once() {
        let mx = Arc::new(StaticMx::default());
        let config = SmtpConfig {
            smarthost: Some("relay.example.net:2525".to_string()),
            smartuser: Some("relay".to_string()),
            smartpass: Some("secret".to_string()),
            ..SmtpConfig::default()
        };
        let selector = TransportSelector::new(config, Arc::clone(&mx) as Arc<dyn MxLookup>);

        let first = selector.select(&context("a@example.com", "example.com")).await;
        let second = selector.select(&context("b@example.org", "example.org")).await;

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].address(), "relay.example.net:2525");
        assert_eq!(first[0].encryption, Encryption::StartTls);
        assert!(first[0].persistent);
        assert_eq!(
            first[0].credentials,
            Some(("relay".to_string(), "secret".to_string()))
        );
        assert!(std::ptr::eq(
            selector.smarthost.get().unwrap(),
            selector.smarthost("ignored")
        ));
        assert_eq!(mx.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_smarthost_default_port() {
        let config = SmtpConfig {
            smarthost: Some("relay.example.net".to_string()),
            ..SmtpConfig::default()
        };
        let selector = TransportSelector::new(config, Arc::new(StaticMx::default()));

        let candidates = selector.select(&context("a@example.com", "example.com")).await;
        assert_eq!(candidates[0].port, 587);
        assert_eq!(candidates[0].credentials, None);
    }

    #[tokio::test]
    async fn test_custom_select_fn_wins() {
        let config = SmtpConfig {
            smarthost: Some("relay.example.net".to_string()),
            ..SmtpConfig::default()
        };
        let selector = TransportSelector::new(config, Arc::new(StaticMx::default()))
            .with_select_fn(Arc::new(|context: &SelectionContext<'_>| {
                vec![TransportCandidate::new(
                    format!("mx.{}", context.domain),
                    2525,
                    Encryption::None,
                    Duration::from_secs(1),
                )]
            }));

        let candidates = selector.select(&context("a@example.com", "example.com")).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address(), "mx.example.com:2525");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("relay", 587), ("relay".to_string(), 587));
        assert_eq!(split_host_port("relay:25", 587), ("relay".to_string(), 25));
        assert_eq!(split_host_port("[::1]:2525", 587), ("::1".to_string(), 2525));
        assert_eq!(split_host_port("::1", 587), ("::1".to_string(), 587));
    }

    #[test]
    fn test_recipient_domain() {
        assert_eq!(recipient_domain("dmarc@Example.COM"), "example.com");
        assert_eq!(recipient_domain("nobody"), "");
        assert_eq!(
            TransportCandidate::new("::1", 25, Encryption::None, Duration::ZERO).address(),
            "[::1]:25"
        );
    }
}
