//! Fan-out of one report to its receivers.
//!
//! A report leaves the store when:
//! - its `rua` yields no usable receiver
//! - any receiver accepted it
//! - any receiver rejected it permanently
//!
//! A report whose only outcomes are transient failures or size rejections
//! stays queued for a later run. Size rejections additionally get a
//! "too big" notice sent to each oversized `mailto:` receiver.

use std::sync::Arc;

use ruamail_common::{LogRecord, OpLog, Report, tracing};
use ruamail_spool::ReportStore;

use crate::{
    engine::{DeliveryEngine, Outcome, Payload},
    error::FatalError,
    notice::TooBigNotice,
    receiver::{Receiver, ReceiverResolver, ReceiverScheme},
    render::RenderedReport,
};

/// What happened to one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Receivers resolved from `rua`
    pub receivers: usize,
    /// Accepted deliveries, HTTP placeholders included
    pub delivered: usize,
    /// Deliveries refused with a 5xx reply
    pub permanent: usize,
    /// Deliveries that ran out of candidates
    pub transient: usize,
    /// Receivers whose size limit the report exceeds
    pub too_big: usize,
    /// Receivers with an empty address or unsupported scheme
    pub skipped: usize,
    pub courtesy_copies: usize,
    /// Too-big notices handed to the engine
    pub notices: usize,
    /// Whether the report was removed from the store
    pub deleted: bool,
}

/// Delivers reports to the receivers named in their `rua`.
#[derive(Debug)]
pub struct Dispatcher {
    resolver: Arc<dyn ReceiverResolver>,
    engine: DeliveryEngine,
    store: Arc<dyn ReportStore>,
    courtesy_copy: Option<String>,
    oplog: OpLog,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn ReceiverResolver>,
        engine: DeliveryEngine,
        store: Arc<dyn ReportStore>,
        oplog: OpLog,
    ) -> Self {
        Self {
            resolver,
            engine,
            store,
            courtesy_copy: None,
            oplog,
        }
    }

    /// Also send every report once to `address`
    #[must_use]
    pub fn with_courtesy_copy(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.courtesy_copy = (!address.trim().is_empty()).then_some(address);
        self
    }

    #[must_use]
    pub const fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    fn record(report: &Report) -> LogRecord {
        LogRecord::new()
            .with("id", &report.id)
            .with("domain", &report.domain)
    }

    /// Deliver `report` to all of its receivers and update the store.
    ///
    /// # Errors
    ///
    /// Returns fatal errors from the engine, and store failures while deleting.
    #[tracing::instrument(skip_all, fields(id = %report.id, domain = %report.domain))]
    pub async fn dispatch(&self, report: &Report) -> Result<DispatchSummary, FatalError> {
        let mut summary = DispatchSummary::default();

        let receivers = match self.resolver.resolve_receivers(&report.rua) {
            Ok(receivers) if !receivers.is_empty() => receivers,
            Ok(_) => {
                self.oplog.log(
                    &Self::record(report)
                        .with("rua", &report.rua)
                        .with("result", "no-receivers"),
                );
                return self.delete(report, summary).await;
            }
            Err(e) => {
                self.oplog.log(
                    &Self::record(report)
                        .with("rua", &report.rua)
                        .with("result", "invalid-receivers")
                        .with("errors", &e),
                );
                return self.delete(report, summary).await;
            }
        };
        summary.receivers = receivers.len();

        let rendered = match RenderedReport::render(report) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("Unable to compress report: {e}");
                self.oplog.log(
                    &Self::record(report)
                        .with("result", "render-failed")
                        .with("errors", &e),
                );
                if let Err(e) = self
                    .store
                    .record_error(&report.id, &format!("compression failed: {e}"))
                    .await
                {
                    tracing::warn!("Unable to record render error: {e}");
                }
                return Ok(summary);
            }
        };

        let mut oversized = Vec::new();
        let mut copy_sent = false;

        for receiver in &receivers {
            if receiver.rejects(rendered.len()) {
                self.oplog.log(
                    &Self::record(report)
                        .with("uri", &receiver.uri)
                        .with("size", rendered.len())
                        .with_opt("max", receiver.max_bytes)
                        .with("result", "too-big"),
                );
                summary.too_big += 1;
                oversized.push(receiver.uri.clone());
                continue;
            }

            match receiver.scheme() {
                ReceiverScheme::Mailto => {
                    let Some(address) = receiver.mailto_address().filter(|a| !a.is_empty()) else {
                        self.skip(report, receiver, "empty-address");
                        summary.skipped += 1;
                        continue;
                    };

                    let payload = Payload::Report {
                        rendered: &rendered,
                        report,
                    };

                    match self.engine.deliver(address, payload).await? {
                        Outcome::Delivered(_) => summary.delivered += 1,
                        Outcome::PermanentFailure(_) => summary.permanent += 1,
                        Outcome::TransientFailure(_) => summary.transient += 1,
                    }

                    if !copy_sent {
                        copy_sent = true;
                        if let Some(cc) = &self.courtesy_copy {
                            let copy = Payload::CourtesyCopy {
                                rendered: &rendered,
                                report,
                            };
                            let outcome = self.engine.deliver(cc, copy).await?;
                            tracing::debug!(cc = %cc, "Courtesy copy: {outcome}");
                            summary.courtesy_copies += 1;
                        }
                    }
                }
                ReceiverScheme::Http => {
                    self.oplog.log(
                        &Self::record(report)
                            .with("uri", &receiver.uri)
                            .with("result", "unimplemented"),
                    );
                    summary.delivered += 1;
                }
                ReceiverScheme::Other => {
                    self.skip(report, receiver, "unsupported-scheme");
                    summary.skipped += 1;
                }
            }
        }

        if summary.delivered > 0 {
            return self.delete(report, summary).await;
        }

        if !oversized.is_empty() {
            summary.notices = self.notify_too_big(&oversized, rendered.len(), report).await?;
        }

        let nothing_usable = summary.skipped == summary.receivers;
        if summary.permanent > 0 || nothing_usable {
            return self.delete(report, summary).await;
        }

        Ok(summary)
    }

    /// Tell each oversized `mailto:` receiver that `report` was withheld.
    ///
    /// Returns the number of notices handed to the engine.
    ///
    /// # Errors
    ///
    /// Returns fatal errors from the engine.
    pub async fn notify_too_big(
        &self,
        oversized_uris: &[String],
        byte_length: u64,
        report: &Report,
    ) -> Result<usize, FatalError> {
        let mut sent = 0;

        for uri in oversized_uris {
            let receiver = Receiver::new(uri.as_str(), None);
            let Some(address) = receiver.mailto_address().filter(|a| !a.is_empty()) else {
                tracing::debug!(uri = %uri, "No notice for non-mailto receiver");
                continue;
            };

            let body = TooBigNotice {
                sender: self.engine.sender(),
                submitter: self.engine.submitter(),
                uri,
                size: byte_length,
                report,
            }
            .build(address, chrono::Utc::now());

            let outcome = self
                .engine
                .deliver(
                    address,
                    Payload::Prebuilt {
                        body: &body,
                        report: Some(report),
                    },
                )
                .await?;
            tracing::debug!(uri = %uri, "Too-big notice: {outcome}");
            sent += 1;
        }

        Ok(sent)
    }

    fn skip(&self, report: &Report, receiver: &Receiver, reason: &str) {
        self.oplog.log(
            &Self::record(report)
                .with("uri", &receiver.uri)
                .with("result", "skipped")
                .with("errors", reason),
        );
    }

    async fn delete(
        &self,
        report: &Report,
        mut summary: DispatchSummary,
    ) -> Result<DispatchSummary, FatalError> {
        self.store.delete(&report.id).await?;
        summary.deleted = true;
        tracing::debug!("Report removed from the store");
        Ok(summary)
    }
}
