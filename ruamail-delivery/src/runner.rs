//! The run loop: one report at a time until the store has nothing pending.
//!
//! Each report is dispatched under its own deadline and panic boundary, so a
//! hung connection or a bug triggered by one report only costs that report.
//! After every `batch` reports the runner shows progress and pauses.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use ruamail_common::{LogRecord, OpLog, Report, config::SendConfig, tracing};
use ruamail_spool::ReportStore;

use crate::{dispatcher::Dispatcher, error::FatalError};

/// Pacing of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Pause after each batch
    pub delay: Duration,
    /// Reports per batch, at least 1
    pub batch: usize,
    /// Deadline for one report's dispatch
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&SendConfig::default())
    }
}

impl From<&SendConfig> for RunConfig {
    fn from(config: &SendConfig) -> Self {
        Self {
            delay: Duration::from_secs(config.delay_secs),
            batch: config.batch.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Reports taken from the store
    pub processed: usize,
    pub deleted: usize,
    /// Reports whose dispatch hit the deadline
    pub timed_out: usize,
    /// Reports whose dispatch returned a contained error
    pub failed: usize,
    pub panicked: usize,
}

/// Drains the store through a [`Dispatcher`].
#[derive(Debug)]
pub struct BatchRunner {
    store: Arc<dyn ReportStore>,
    dispatcher: Dispatcher,
    config: RunConfig,
    oplog: OpLog,
}

impl BatchRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn ReportStore>,
        dispatcher: Dispatcher,
        config: RunConfig,
        oplog: OpLog,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config: RunConfig {
                batch: config.batch.max(1),
                ..config
            },
            oplog,
        }
    }

    /// Process every pending report.
    ///
    /// # Errors
    ///
    /// Stops at the first error that makes further reports pointless: a
    /// signing key that cannot be loaded, a delivery without a recipient, or a
    /// store that cannot list pending reports.
    pub async fn run(&self) -> Result<RunSummary, FatalError> {
        let mut summary = RunSummary::default();
        let mut pause_due = false;

        while let Some(report) = self.store.next_pending().await? {
            if pause_due {
                self.oplog.progress();
                tokio::time::sleep(self.config.delay).await;
                pause_due = false;
            }

            self.process(&report, &mut summary).await?;
            summary.processed += 1;

            if summary.processed % self.config.batch == 0 {
                pause_due = true;
            }
        }

        tracing::info!(
            processed = summary.processed,
            deleted = summary.deleted,
            timed_out = summary.timed_out,
            "Run complete"
        );

        Ok(summary)
    }

    async fn process(&self, report: &Report, summary: &mut RunSummary) -> Result<(), FatalError> {
        let dispatch = AssertUnwindSafe(self.dispatcher.dispatch(report)).catch_unwind();

        match tokio::time::timeout(self.config.timeout, dispatch).await {
            Ok(Ok(Ok(dispatched))) => {
                if dispatched.deleted {
                    summary.deleted += 1;
                }
                tracing::debug!(id = %report.id, ?dispatched, "Report processed");
            }
            Ok(Ok(Err(e))) if e.aborts_run() => return Err(e),
            Ok(Ok(Err(e))) => {
                summary.failed += 1;
                tracing::error!(id = %report.id, "Report failed: {e}");
                self.contain(report, "failed", &e.to_string()).await;
            }
            Ok(Err(panic)) => {
                summary.panicked += 1;
                let message = panic_message(panic.as_ref());
                tracing::error!(id = %report.id, "Report processing panicked: {message}");
                self.contain(report, "panicked", &message).await;
            }
            Err(_) => {
                summary.timed_out += 1;
                let message = format!("timed out after {}s", self.config.timeout.as_secs());
                tracing::warn!(id = %report.id, "Report {message}");
                self.contain(report, "transient", &message).await;
            }
        }

        Ok(())
    }

    /// Log a contained failure and annotate the report, which stays queued
    async fn contain(&self, report: &Report, result: &str, message: &str) {
        self.oplog.log(
            &LogRecord::new()
                .with("id", &report.id)
                .with("domain", &report.domain)
                .with("result", result)
                .with("errors", message),
        );

        if let Err(e) = self.store.record_error(&report.id, message).await {
            tracing::warn!(id = %report.id, "Unable to record error: {e}");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
