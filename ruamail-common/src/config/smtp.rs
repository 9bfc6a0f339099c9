//! Outbound SMTP settings.

use serde::{Deserialize, Serialize};

/// Courtesy-copy address shipped in the sample configuration.
///
/// A `cc` still set to this value is treated as unset.
pub const PLACEHOLDER_CC: &str = "set.this@for.a.while.example.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Name announced in EHLO
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Relay every message through this host instead of the recipient's MX
    #[serde(default)]
    pub smarthost: Option<String>,

    /// SASL user for the smarthost
    #[serde(default)]
    pub smartuser: Option<String>,

    /// SASL password for the smarthost
    #[serde(default)]
    pub smartpass: Option<String>,

    /// Send one copy of every report to this address
    #[serde(default)]
    pub cc: Option<String>,

    /// Port used for the smarthost
    ///
    /// Default: 587 (submission)
    #[serde(default = "default_submission_port")]
    pub submission_port: u16,

    /// Port used when delivering straight to an MX
    ///
    /// Default: 25
    #[serde(default = "default_mx_port")]
    pub mx_port: u16,

    /// Timeout for one transport candidate (in seconds)
    ///
    /// Default: 50 seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates (testing only)
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SmtpConfig {
    /// The courtesy-copy address, unless unset or still the placeholder
    #[must_use]
    pub fn courtesy_copy(&self) -> Option<&str> {
        self.cc
            .as_deref()
            .map(str::trim)
            .filter(|cc| !cc.is_empty() && *cc != PLACEHOLDER_CC)
    }

    /// Smarthost credentials, when both halves are configured
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.smartuser, &self.smartpass) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            smarthost: None,
            smartuser: None,
            smartpass: None,
            cc: None,
            submission_port: default_submission_port(),
            mx_port: default_mx_port(),
            timeout_secs: default_timeout(),
            accept_invalid_certs: false,
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

const fn default_submission_port() -> u16 {
    587
}

const fn default_mx_port() -> u16 {
    25
}

const fn default_timeout() -> u64 {
    50
}
