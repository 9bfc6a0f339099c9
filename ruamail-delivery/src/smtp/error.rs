//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// A failed exchange with a receiving MTA or smarthost.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket read or write failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The reply was not a well-formed SMTP reply
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a code the current step does not expect.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// A 4xx or 5xx reply
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// STARTTLS negotiation failed
    #[error("TLS error: {0}")]
    TlsError(String),

    /// A command argument contained CR or LF
    #[error("Line break in SMTP command argument: {0:?}")]
    InvalidArgument(String),

    /// The peer hung up mid-session
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// The reply was not valid UTF-8
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// The SMTP reply code carried by this error, if the server sent one
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } | Self::UnexpectedResponse { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result of one SMTP client step
pub type Result<T> = std::result::Result<T, ClientError>;
