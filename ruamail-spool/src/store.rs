use async_trait::async_trait;
use ruamail_common::{Report, ReportId};

/// Trait for report queue backends
///
/// Reports are identified by their [`ReportId`]. Backends hand out pending
/// reports in identifier order, and each report at most once for the lifetime
/// of the store instance: a report that is neither deleted nor annotated is
/// simply left for the next run.
#[async_trait]
pub trait ReportStore: Send + Sync + std::fmt::Debug {
    /// Queue a report under its own identifier
    ///
    /// # Errors
    /// Fails if a report with the same identifier is already queued, or the
    /// backend cannot persist it.
    async fn enqueue(&self, report: Report) -> crate::Result<ReportId>;

    /// Take the next report that has not been handed out yet
    ///
    /// Returns `Ok(None)` once every queued report has been handed out.
    ///
    /// # Errors
    /// Fails if the backend cannot be read.
    async fn next_pending(&self) -> crate::Result<Option<Report>>;

    /// Remove a report from the queue
    ///
    /// # Errors
    /// Fails if the report does not exist or cannot be removed.
    async fn delete(&self, id: &ReportId) -> crate::Result<()>;

    /// Annotate a report with a delivery error, leaving it queued
    ///
    /// # Errors
    /// Fails if the report does not exist or the annotation cannot be stored.
    async fn record_error(&self, id: &ReportId, message: &str) -> crate::Result<()>;

    /// Errors recorded against a report, oldest first
    ///
    /// # Errors
    /// Fails if the annotations cannot be read.
    async fn recorded_errors(&self, id: &ReportId) -> crate::Result<Vec<String>>;

    /// Identifiers of all queued reports, sorted
    ///
    /// # Errors
    /// Fails if the backend cannot be read.
    async fn list(&self) -> crate::Result<Vec<ReportId>>;
}
