//! Report receivers and the `rua` resolver.
//!
//! A policy's `rua` tag is a comma separated list of URIs, each optionally
//! followed by `!size` with a `k`, `m`, `g` or `t` unit (RFC 7489 section 6.4):
//!
//! ```text
//! rua=mailto:dmarc@example.com!10m, mailto:backup@example.net
//! ```

use crate::error::ResolveError;

/// A destination for an aggregate report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    /// Scheme-qualified URI (`mailto:`, `http:`, `https:`)
    pub uri: String,
    /// Inclusive upper bound on the compressed report size
    pub max_bytes: Option<u64>,
}

/// How a receiver is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverScheme {
    /// `mailto:`, delivered over SMTP
    Mailto,
    /// `http:` or `https:`, not delivered yet
    Http,
    /// Anything else, skipped
    Other,
}

impl Receiver {
    #[must_use]
    pub fn new(uri: impl Into<String>, max_bytes: Option<u64>) -> Self {
        Self {
            uri: uri.into(),
            max_bytes,
        }
    }

    #[must_use]
    pub fn scheme(&self) -> ReceiverScheme {
        let scheme = self
            .uri
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase());

        match scheme.as_deref() {
            Some("mailto") => ReceiverScheme::Mailto,
            Some("http" | "https") => ReceiverScheme::Http,
            _ => ReceiverScheme::Other,
        }
    }

    /// The address of a `mailto:` receiver, without any `?query` part
    ///
    /// Returns `None` for other schemes. The address may be empty.
    #[must_use]
    pub fn mailto_address(&self) -> Option<&str> {
        if self.scheme() != ReceiverScheme::Mailto {
            return None;
        }

        let (_, rest) = self.uri.split_once(':')?;
        let address = rest.split_once('?').map_or(rest, |(address, _)| address);
        Some(address.trim())
    }

    /// Whether a payload of `len` bytes is over this receiver's limit
    #[must_use]
    pub fn rejects(&self, len: u64) -> bool {
        self.max_bytes.is_some_and(|max| len > max)
    }
}

/// Turns a `rua` value into receivers.
pub trait ReceiverResolver: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// Returns a [`ResolveError`] describing the first malformed entry.
    fn resolve_receivers(&self, rua: &str) -> Result<Vec<Receiver>, ResolveError>;
}

/// Resolver for RFC 7489 `rua` URI lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuaResolver;

impl RuaResolver {
    fn parse_limit(uri: &str, limit: &str) -> Result<u64, ResolveError> {
        let invalid = || ResolveError::InvalidLimit {
            uri: uri.to_string(),
            limit: limit.to_string(),
        };

        let (digits, shift) = match limit.as_bytes().last().map(u8::to_ascii_lowercase) {
            Some(b'k') => (&limit[..limit.len() - 1], 10),
            Some(b'm') => (&limit[..limit.len() - 1], 20),
            Some(b'g') => (&limit[..limit.len() - 1], 30),
            Some(b't') => (&limit[..limit.len() - 1], 40),
            _ => (limit, 0),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        digits
            .parse::<u64>()
            .ok()
            .and_then(|value| value.checked_mul(1 << shift))
            .ok_or_else(invalid)
    }

    /// Characters that never appear in a usable receiver URI and would end up
    /// inside SMTP commands or headers
    fn is_forbidden(c: char) -> bool {
        c.is_control() || c.is_whitespace() || c == '<' || c == '>'
    }
}

impl ReceiverResolver for RuaResolver {
    fn resolve_receivers(&self, rua: &str) -> Result<Vec<Receiver>, ResolveError> {
        rua.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (uri, max_bytes) = match entry.rsplit_once('!') {
                    Some((uri, limit)) => (uri.trim(), Some(Self::parse_limit(uri, limit.trim())?)),
                    None => (entry, None),
                };

                match uri.split_once(':') {
                    Some((scheme, _)) if !scheme.is_empty() => {}
                    _ => return Err(ResolveError::MissingScheme(uri.to_string())),
                }

                if uri.chars().any(Self::is_forbidden) {
                    return Err(ResolveError::InvalidAddress(uri.to_string()));
                }

                Ok(Receiver::new(uri, max_bytes))
            })
            .collect()
    }
}
