//! Types shared by the ruamail crates: the report model, configuration,
//! diagnostic logging and the operational log.

pub mod config;
pub mod logging;
pub mod oplog;
pub mod report;

pub use oplog::{LogRecord, LogSink, OpLog};
pub use report::{Report, ReportId};
pub use tracing;
