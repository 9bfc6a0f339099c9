//! DKIM signing (RFC 6376) with Ed25519 keys (RFC 8463).
//!
//! The [`Signer`] loads its key through a [`KeyLoader`] the first time a
//! message is signed, and keeps it for the rest of its lifetime.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer as _, SigningKey};
use once_cell::sync::OnceCell;
use ruamail_common::config::DkimConfig;
use sha2::{Digest, Sha256};

use crate::error::{KeyError, SignError};

/// The only algorithm supported
pub const ED25519_SHA256: &str = "ed25519-sha256";

/// Headers covered by the signature, when present
const SIGNED_HEADERS: [&str; 7] = [
    "From",
    "To",
    "Subject",
    "Date",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
];

/// Header or body canonicalization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonicalization {
    Simple,
    Relaxed,
}

impl Canonicalization {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl FromStr for Canonicalization {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "relaxed" => Ok(Self::Relaxed),
            _ => Err(KeyError::InvalidMethod(s.to_string())),
        }
    }
}

/// The `c=` tag: header and body canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    pub header: Canonicalization,
    pub body: Canonicalization,
}

impl Default for Method {
    fn default() -> Self {
        Self {
            header: Canonicalization::Relaxed,
            body: Canonicalization::Relaxed,
        }
    }
}

impl FromStr for Method {
    type Err = KeyError;

    /// `header/body`; a single value sets the header and leaves the body `simple`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, body) = match s.split_once('/') {
            Some((header, body)) => (header.parse()?, body.parse()?),
            None => (s.parse()?, Canonicalization::Simple),
        };
        Ok(Self { header, body })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.header.as_str(), self.body.as_str())
    }
}

/// A private key able to sign DKIM hashes.
pub trait DkimKey: Send + Sync + fmt::Debug {
    /// Value of the `a=` tag
    fn algorithm(&self) -> &'static str;

    /// Sign the canonicalized header data
    ///
    /// # Errors
    ///
    /// Returns [`SignError::Crypto`] if the key cannot produce a signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// Loads the signing key. Called at most once per [`Signer`].
pub trait KeyLoader: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Any failure is fatal to the run.
    fn load(&self) -> Result<Arc<dyn DkimKey>, KeyError>;
}

/// Ed25519 key for `a=ed25519-sha256`.
pub struct Ed25519Key(SigningKey);

impl Ed25519Key {
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    /// The public key, base64 encoded, as published in the `p=` tag of the
    /// selector's DNS record
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.0.verifying_key().as_bytes())
    }
}

impl fmt::Debug for Ed25519Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ed25519Key").field(&"<redacted>").finish()
    }
}

impl DkimKey for Ed25519Key {
    fn algorithm(&self) -> &'static str {
        ED25519_SHA256
    }

    /// RFC 8463: the Ed25519 signature is computed over the SHA-256 hash
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError> {
        let digest = Sha256::digest(data);
        Ok(self.0.sign(&digest).to_bytes().to_vec())
    }
}

/// Reads an Ed25519 key from a file: 32 raw bytes, or the same as base64 text.
#[derive(Debug, Clone)]
pub struct FileKeyLoader {
    path: PathBuf,
    algorithm: String,
}

impl FileKeyLoader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, algorithm: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            algorithm: algorithm.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn invalid(&self, reason: impl Into<String>) -> KeyError {
        KeyError::Invalid {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

impl KeyLoader for FileKeyLoader {
    fn load(&self) -> Result<Arc<dyn DkimKey>, KeyError> {
        if !self.algorithm.eq_ignore_ascii_case(ED25519_SHA256) {
            return Err(KeyError::UnsupportedAlgorithm(self.algorithm.clone()));
        }

        let bytes = std::fs::read(&self.path).map_err(|source| KeyError::Read {
            path: self.path.clone(),
            source,
        })?;

        let key: [u8; 32] = if bytes.len() == 32 {
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| self.invalid("expected 32 bytes"))?
        } else {
            let text =
                std::str::from_utf8(&bytes).map_err(|_| self.invalid("not raw bytes or base64"))?;
            let decoded = BASE64
                .decode(text.trim().as_bytes())
                .map_err(|e| self.invalid(format!("invalid base64: {e}")))?;
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| self.invalid(format!("expected 32 bytes, found {}", decoded.len())))?
        };

        tracing::debug!(path = %self.path.display(), "Loaded DKIM signing key");

        Ok(Arc::new(Ed25519Key::from_bytes(&key)))
    }
}

/// Signs outgoing messages, loading the key lazily.
#[derive(Debug)]
pub struct Signer {
    domain: String,
    selector: String,
    method: Method,
    loader: Arc<dyn KeyLoader>,
    key: OnceCell<Arc<dyn DkimKey>>,
}

impl Signer {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        selector: impl Into<String>,
        method: Method,
        loader: Arc<dyn KeyLoader>,
    ) -> Self {
        Self {
            domain: domain.into(),
            selector: selector.into(),
            method,
            loader,
            key: OnceCell::new(),
        }
    }

    /// Build a signer reading its key from the configured file
    ///
    /// # Errors
    ///
    /// Returns an error if the canonicalization method is not recognised.
    pub fn from_config(config: &DkimConfig) -> Result<Self, KeyError> {
        Ok(Self::new(
            config.domain.clone(),
            config.selector.clone(),
            config.method.parse()?,
            Arc::new(FileKeyLoader::new(&config.keyfile, &config.algorithm)),
        ))
    }

    /// The key, loaded on first use
    ///
    /// # Errors
    ///
    /// Returns the loader's error; the next call tries again.
    pub fn key(&self) -> Result<&Arc<dyn DkimKey>, KeyError> {
        self.key.get_or_try_init(|| self.loader.load())
    }

    /// Sign `message`, returning it with CRLF line endings and a
    /// `DKIM-Signature` header prepended.
    ///
    /// # Errors
    ///
    /// The outer error is a key load failure, fatal to the run. The inner
    /// error means this message could not be signed.
    pub fn sign(&self, message: &str) -> Result<Result<String, SignError>, KeyError> {
        let key = self.key()?;
        Ok(self.sign_with(key.as_ref(), message, chrono::Utc::now().timestamp()))
    }

    fn sign_with(&self, key: &dyn DkimKey, message: &str, timestamp: i64) -> Result<String, SignError> {
        let message = normalize_line_endings(message);

        let (header_block, body) = match message.find("\r\n\r\n") {
            Some(index) => (&message[..index + 2], &message[index + 4..]),
            None if message.ends_with("\r\n") => (message.as_str(), ""),
            None => return Err(SignError::MissingHeaders),
        };

        let headers = split_headers(header_block);
        if headers.is_empty() {
            return Err(SignError::MissingHeaders);
        }

        let body_hash = BASE64.encode(Sha256::digest(canonicalize_body(self.method.body, body)));

        let mut signed_names = Vec::new();
        let mut data = String::new();

        for name in SIGNED_HEADERS {
            if let Some(header) = headers
                .iter()
                .rev()
                .find(|header| header_name(header).eq_ignore_ascii_case(name))
            {
                signed_names.push(name.to_ascii_lowercase());
                data.push_str(&canonicalize_header(self.method.header, header));
            }
        }

        if !signed_names.iter().any(|name| name == "from") {
            return Err(SignError::MissingFrom);
        }

        let value = format!(
            "v=1; a={}; c={}; d={}; s={}; t={timestamp}; h={}; bh={body_hash}; b=",
            key.algorithm(),
            self.method,
            self.domain,
            self.selector,
            signed_names.join(":"),
        );
        let unsigned = format!("DKIM-Signature: {value}");

        let canonical = canonicalize_header(self.method.header, &unsigned);
        data.push_str(canonical.trim_end_matches("\r\n"));

        let signature = BASE64.encode(key.sign(data.as_bytes())?);

        Ok(format!("{unsigned}{signature}\r\n{message}"))
    }
}

/// Convert bare LF (and bare CR) line endings to CRLF
#[must_use]
pub fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }

    out
}

/// Split a CRLF header block into unfolded-as-written header fields
/// (continuation lines stay attached, without the final CRLF)
fn split_headers(block: &str) -> Vec<&str> {
    let mut headers = Vec::new();
    let mut start = None;
    let mut offset = 0;

    for line in block.split_inclusive("\r\n") {
        let continuation = line.starts_with([' ', '\t']);

        if !continuation {
            if let Some(begin) = start {
                headers.push(block[begin..offset].trim_end_matches("\r\n"));
            }
            start = Some(offset);
        }

        offset += line.len();
    }

    if let Some(begin) = start {
        headers.push(block[begin..offset].trim_end_matches("\r\n"));
    }

    headers
}

fn header_name(header: &str) -> &str {
    header.split_once(':').map_or(header, |(name, _)| name).trim()
}

/// Canonical form of one header field, CRLF terminated
fn canonicalize_header(method: Canonicalization, header: &str) -> String {
    match method {
        Canonicalization::Simple => format!("{header}\r\n"),
        Canonicalization::Relaxed => {
            let (name, value) = header.split_once(':').unwrap_or((header, ""));
            let value = value.replace("\r\n", "");
            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("{}:{value}\r\n", name.trim().to_ascii_lowercase())
        }
    }
}

/// Canonical form of the body
fn canonicalize_body(method: Canonicalization, body: &str) -> String {
    let mut lines: Vec<String> = body
        .split("\r\n")
        .map(|line| match method {
            Canonicalization::Simple => line.to_string(),
            Canonicalization::Relaxed => {
                let mut compressed = String::with_capacity(line.len());
                let mut in_whitespace = false;
                for c in line.chars() {
                    if c == ' ' || c == '\t' {
                        in_whitespace = true;
                    } else {
                        if in_whitespace {
                            compressed.push(' ');
                            in_whitespace = false;
                        }
                        compressed.push(c);
                    }
                }
                compressed
            }
        })
        .collect();

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    if lines.is_empty() {
        return match method {
            Canonicalization::Simple => "\r\n".to_string(),
            Canonicalization::Relaxed => String::new(),
        };
    }

    let mut canonical = lines.join("\r\n");
    canonical.push_str("\r\n");
    canonical
}
