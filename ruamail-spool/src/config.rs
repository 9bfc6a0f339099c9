use std::sync::Arc;

use serde::Deserialize;

use crate::{FileReportStore, MemoryReportStore, store::ReportStore};

/// Configuration for the report store
///
/// File-backed spool in RON config:
/// ```ron
/// spool: (
///     type: "File",
///     path: "/var/spool/ruamail",
/// ),
/// ```
///
/// Memory-backed spool (the queue is lost on exit):
/// ```ron
/// spool: (
///     type: "Memory",
///     capacity: Some(1000),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SpoolConfig {
    /// One RON file per report
    File(FileReportStore),
    /// In-memory queue
    Memory(MemoryConfig),
}

/// Configuration for the memory-backed store
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of reports to store (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File(FileReportStore::default())
    }
}

impl SpoolConfig {
    /// Get the filesystem path for file-backed spools, if applicable
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Build and initialise the configured store
    ///
    /// # Errors
    /// Returns an error if the spool directory cannot be created.
    pub async fn into_store(self) -> crate::Result<Arc<dyn ReportStore>> {
        match self {
            Self::File(store) => {
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(Arc::new(
                config
                    .capacity
                    .map_or_else(MemoryReportStore::new, MemoryReportStore::with_capacity),
            )),
        }
    }
}
