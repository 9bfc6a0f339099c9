//! Typed error handling for the delivery pipeline.
//!
//! Errors fall into three groups:
//! - [`FatalError`]: configuration or programming errors, the only errors
//!   that leave [`crate::Dispatcher::dispatch`] and [`crate::BatchRunner::run`]
//! - [`SendError`] and [`SignError`]: per-attempt failures, classified into a
//!   [`crate::Outcome`] by the delivery engine
//! - [`ResolveError`]: malformed receiver lists, which get the report deleted

use std::{fmt, path::PathBuf};

use ruamail_spool::SpoolError;
use thiserror::Error;

use crate::smtp::ClientError;

/// A failed send attempt against one transport candidate.
///
/// `code` is the SMTP reply code when the server sent one; local failures
/// (connection refused, timeout, TLS) carry none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SendError {
    pub code: Option<u16>,
    pub message: String,
}

impl SendError {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// An error that never reached an SMTP reply
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Returns `true` for 5xx replies.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code, Some(500..=599))
    }

    /// The code as it appears in joined error lists
    #[must_use]
    pub fn code_label(&self) -> String {
        self.code.map_or_else(|| "none".to_string(), |code| code.to_string())
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Convert from SMTP `ClientError` to `SendError`.
///
/// Server replies keep their code so that 5xx answers are classified as
/// permanent; everything else is a local, transient failure.
impl From<ClientError> for SendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => Self::new(code, message),
            ClientError::Io(e) => Self::local(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => Self::local("Connection closed unexpectedly"),
            ClientError::TlsError(msg) => Self::local(format!("TLS error: {msg}")),
            ClientError::InvalidArgument(arg) => {
                Self::local(format!("Refusing to send line break in command: {arg:?}"))
            }
            ClientError::ParseError(msg) => Self::local(format!("SMTP protocol parse error: {msg}")),
            ClientError::Utf8Error(e) => Self::local(format!("UTF-8 decoding error: {e}")),
        }
    }
}

/// The signing key could not be loaded. Fatal to the run.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unable to read DKIM key {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("DKIM key {path} is not valid: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Unsupported DKIM algorithm {0:?}, only ed25519-sha256 is supported")]
    UnsupportedAlgorithm(String),

    #[error("Invalid DKIM canonicalization {0:?}")]
    InvalidMethod(String),
}

/// A message could not be signed. The attempt is abandoned, the key is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    #[error("Message has no header section")]
    MissingHeaders,

    #[error("Message has no From header")]
    MissingFrom,

    #[error("Signing failed: {0}")]
    Crypto(String),
}

/// The `rua` value could not be turned into receivers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Receiver {0:?} has no URI scheme")]
    MissingScheme(String),

    #[error("Receiver {0:?} contains characters not allowed in an address")]
    InvalidAddress(String),

    #[error("Receiver {uri:?} has an invalid size limit {limit:?}")]
    InvalidLimit { uri: String, limit: String },
}

/// Errors that stop processing of a report, and possibly the whole run.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Unable to load signing key: {0}")]
    KeyLoad(#[from] KeyError),

    #[error("Delivery requested without a recipient")]
    MissingRecipient,

    #[error("Report store error: {0}")]
    Store(#[from] SpoolError),
}

impl FatalError {
    /// Whether the batch runner must stop instead of moving on to the next report
    #[must_use]
    pub const fn aborts_run(&self) -> bool {
        matches!(self, Self::KeyLoad(_) | Self::MissingRecipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_keeps_reply_code() {
        let error = SendError::from(ClientError::SmtpError {
            code: 550,
            message: "No such user".to_string(),
        });
        assert_eq!(error.code, Some(550));
        assert!(error.is_permanent());
        assert_eq!(error.to_string(), "550 No such user");
    }

    #[test]
    fn test_local_errors_are_transient() {
        let error = SendError::from(ClientError::ConnectionClosed);
        assert_eq!(error.code, None);
        assert!(!error.is_permanent());
        assert_eq!(error.code_label(), "none");

        let error = SendError::new(421, "Try again later");
        assert!(!error.is_permanent());
        assert_eq!(error.code_label(), "421");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FatalError::MissingRecipient.aborts_run());
        assert!(FatalError::KeyLoad(KeyError::UnsupportedAlgorithm("rsa-sha1".into())).aborts_run());
        assert!(
            !FatalError::Store(SpoolError::Internal("disk full".to_string())).aborts_run()
        );
    }
}
