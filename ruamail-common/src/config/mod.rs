//! Configuration types shared across the ruamail crates.
//!
//! Every section deserialises from RON with per-field defaults, so a
//! configuration file only needs to name the values it changes.
//!
//! ## Modules
//!
//! - [`smtp`]: outbound SMTP settings (smarthost, credentials, courtesy copy)
//! - [`dkim`]: DKIM signing parameters

pub mod dkim;
pub mod smtp;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use dkim::DkimConfig;
pub use smtp::{PLACEHOLDER_CC, SmtpConfig};

/// The organisation submitting reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    /// Submitter name, used in the report subject and attachment name
    #[serde(default = "default_org_name")]
    pub name: String,

    /// Envelope and header sender of outgoing reports
    #[serde(default = "default_org_email")]
    pub email: String,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            name: default_org_name(),
            email: default_org_email(),
        }
    }
}

fn default_org_name() -> String {
    "localhost".to_string()
}

fn default_org_email() -> String {
    "noreply@localhost".to_string()
}

/// Pacing of the batch runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    /// Pause between batches (in seconds)
    ///
    /// Default: 5 seconds
    #[serde(default = "default_delay")]
    pub delay_secs: u64,

    /// Reports processed between pauses
    ///
    /// Default: 1
    #[serde(default = "default_batch")]
    pub batch: usize,

    /// Upper bound on the processing of a single report (in seconds)
    ///
    /// Default: 120 seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay(),
            batch: default_batch(),
            timeout_secs: default_timeout(),
        }
    }
}

const fn default_delay() -> u64 {
    5
}

const fn default_batch() -> usize {
    1
}

const fn default_timeout() -> u64 {
    120
}

/// Where the operational log is written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append operational log lines to this file instead of stderr
    #[serde(default)]
    pub oplog_path: Option<PathBuf>,
}
