//! Queue of pending aggregate reports.
//!
//! The delivery pipeline consumes reports through the [`ReportStore`] trait:
//! one report at a time via [`ReportStore::next_pending`], then either
//! [`ReportStore::delete`] once it is dealt with or
//! [`ReportStore::record_error`] when it has to be retried later.

pub mod backends;
pub mod config;
pub mod error;
pub mod store;

pub use backends::{FileReportStore, FileReportStoreBuilder, MemoryReportStore};
pub use config::{MemoryConfig, SpoolConfig};
pub use error::{Result, SpoolError, ValidationError};
pub use store::ReportStore;
