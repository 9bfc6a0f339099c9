//! Backend storage implementations for the report queue
//!
//! - `memory`: In-memory storage for testing and one-shot runs
//! - `file`: One RON file per report, for production use

pub mod file;
pub mod memory;

pub use file::{FileReportStore, FileReportStoreBuilder};
pub use memory::MemoryReportStore;
