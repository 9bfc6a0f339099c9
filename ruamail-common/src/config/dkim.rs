//! DKIM signing parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimConfig {
    /// Signing domain (`d=`)
    pub domain: String,

    /// Selector (`s=`)
    pub selector: String,

    /// Signature algorithm (`a=`)
    ///
    /// Default: `ed25519-sha256`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Canonicalization (`c=`), `header/body` or a single value for both
    ///
    /// Default: `relaxed/relaxed`
    #[serde(default = "default_method")]
    pub method: String,

    /// Private key: 32 raw bytes, or the same encoded as base64 text
    pub keyfile: PathBuf,
}

fn default_algorithm() -> String {
    "ed25519-sha256".to_string()
}

fn default_method() -> String {
    "relaxed/relaxed".to_string()
}
