//! Configuration file loading.

use std::path::{Path, PathBuf};

use ruamail_common::config::{
    DkimConfig, LoggingConfig, OrganizationConfig, SendConfig, SmtpConfig,
};
use ruamail_delivery::DnsConfig;
use ruamail_spool::SpoolConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "RUAMAIL_CONFIG";

/// Searched in order when neither `--config` nor [`CONFIG_ENV`] is given
pub const DEFAULT_PATHS: [&str; 2] = ["./ruamail.config.ron", "/etc/ruamail/ruamail.config.ron"];

/// The whole configuration file
///
/// ```ron
/// (
///     organization: (name: "example.net", email: "dmarc@example.net"),
///     smtp: (hostname: "mail.example.net", smarthost: Some("relay.example.net")),
///     spool: (type: "File", path: "/var/spool/ruamail"),
///     send: (delay_secs: 2, batch: 10),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub organization: OrganizationConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Reports are sent unsigned without this section
    #[serde(default)]
    pub dkim: Option<DkimConfig>,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a configuration file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid RON.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Load the configuration, falling back to built-in defaults when no
    /// file is found and none was asked for
    ///
    /// # Errors
    ///
    /// Fails if an explicitly named file is missing or any found file is invalid.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

        match find_config_file(explicit, env.as_deref())? {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. the path given on the command line
/// 2. `RUAMAIL_CONFIG`
/// 3. `./ruamail.config.ron`
/// 4. `/etc/ruamail/ruamail.config.ron`
///
/// # Errors
///
/// An explicit path or environment variable pointing at a missing file is an
/// error; not finding one of the default paths is not.
pub fn find_config_file(
    explicit: Option<&Path>,
    env: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    if let Some(path) = env {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    Ok(DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}
