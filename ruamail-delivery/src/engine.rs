//! Delivery of one message to one recipient.
//!
//! The engine builds (or takes) the message, signs it when a key is
//! configured, and walks the selector's candidates in order:
//!
//! - a reply from any candidate ends the walk with [`Outcome::Delivered`]
//! - a 5xx reply ends it with [`Outcome::PermanentFailure`]
//! - anything else is recorded against the report and the next candidate is
//!   tried; running out of candidates is an [`Outcome::TransientFailure`]
//!
//! Every call emits exactly one operational log record.

use std::{fmt, sync::Arc};

use ruamail_common::{LogRecord, OpLog, Report, tracing};
use ruamail_spool::ReportStore;

use crate::{
    dkim::Signer,
    error::{FatalError, SendError},
    message::MessageBuilder,
    render::RenderedReport,
    selector::{SelectionContext, TransportSelector, recipient_domain},
    transport::Transport,
};

/// What to deliver.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// An aggregate report, sent as a gzip attachment
    Report {
        rendered: &'a RenderedReport,
        report: &'a Report,
    },
    /// The same report sent to the courtesy-copy address
    ///
    /// Failures are logged but never recorded against the report.
    CourtesyCopy {
        rendered: &'a RenderedReport,
        report: &'a Report,
    },
    /// A complete message, sent as is
    Prebuilt {
        body: &'a str,
        report: Option<&'a Report>,
    },
}

impl<'a> Payload<'a> {
    const fn report(&self) -> Option<&'a Report> {
        match *self {
            Self::Report { report, .. } | Self::CourtesyCopy { report, .. } => Some(report),
            Self::Prebuilt { report, .. } => report,
        }
    }

    /// The report that transient failures are recorded against
    const fn annotated(&self) -> Option<&'a Report> {
        match *self {
            Self::CourtesyCopy { .. } => None,
            _ => self.report(),
        }
    }
}

/// Result of one delivery, with a reason fit for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted, with the server's final reply
    Delivered(String),
    /// Refused with a 5xx reply; the report will not be retried
    PermanentFailure(String),
    /// Every candidate failed otherwise; the report stays queued
    TransientFailure(String),
}

impl Outcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentFailure(_))
    }

    /// Value of the `result` log field
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::PermanentFailure(_) => "permanent",
            Self::TransientFailure(_) => "transient",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Delivered(reason)
            | Self::PermanentFailure(reason)
            | Self::TransientFailure(reason) => reason,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.reason())
    }
}

/// Sends messages through the selected transports.
#[derive(Debug)]
pub struct DeliveryEngine {
    sender: String,
    submitter: String,
    signer: Option<Signer>,
    selector: TransportSelector,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ReportStore>,
    oplog: OpLog,
}

impl DeliveryEngine {
    /// `sender` is the envelope and header From, `submitter` the reporting
    /// organisation named in subjects and attachment names.
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        submitter: impl Into<String>,
        selector: TransportSelector,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ReportStore>,
        oplog: OpLog,
    ) -> Self {
        Self {
            sender: sender.into(),
            submitter: submitter.into(),
            signer: None,
            selector,
            transport,
            store,
            oplog,
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn submitter(&self) -> &str {
        &self.submitter
    }

    /// The multipart message carrying a report to `recipient`
    #[must_use]
    pub fn report_message(&self, recipient: &str, rendered: &RenderedReport, report: &Report) -> String {
        MessageBuilder::new()
            .from(&self.sender)
            .to(recipient)
            .subject(format!(
                "Report Domain: {} Submitter: {} Report-ID: <{}>",
                report.domain, self.submitter, report.id
            ))
            .body(format!(
                "This is an aggregate report from {} for {}.\n",
                self.submitter, report.domain
            ))
            .attach(
                report.attachment_name(&self.submitter),
                "application/gzip",
                rendered.bytes().to_vec(),
            )
            .build()
    }

    /// Deliver `payload` to `recipient`.
    ///
    /// # Errors
    ///
    /// Only fatal errors: an empty recipient, or a signing key that cannot be
    /// loaded. Every delivery failure is an [`Outcome`].
    pub async fn deliver(&self, recipient: &str, payload: Payload<'_>) -> Result<Outcome, FatalError> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(FatalError::MissingRecipient);
        }

        let report = payload.report();
        let destination = recipient_domain(recipient);

        let mut record = LogRecord::new()
            .with("to", recipient)
            .with("dest", &destination)
            .with_opt("id", report.map(|report| &report.id))
            .with_opt("domain", report.map(|report| &report.domain))
            .with(
                "kind",
                match payload {
                    Payload::Report { .. } => "report",
                    Payload::CourtesyCopy { .. } => "copy",
                    Payload::Prebuilt { .. } => "notice",
                },
            );

        let body = match payload {
            Payload::Report { rendered, report } | Payload::CourtesyCopy { rendered, report } => {
                self.report_message(recipient, rendered, report)
            }
            Payload::Prebuilt { body, .. } => body.to_string(),
        };

        let body = match &self.signer {
            Some(signer) => match signer.sign(&body)? {
                Ok(signed) => signed,
                Err(e) => {
                    tracing::error!(to = recipient, error = ?e, "Unable to sign message");
                    let outcome = Outcome::TransientFailure(format!("signing failed: {e}"));
                    record.insert("result", outcome.label());
                    record.insert("errors", outcome.reason());
                    self.oplog.log(&record);
                    return Ok(outcome);
                }
            },
            None => body,
        };

        let context = SelectionContext {
            recipient,
            domain: &destination,
            report,
        };
        let candidates = self.selector.select(&context).await;

        let mut codes = Vec::new();
        let mut errors = Vec::new();
        let mut outcome = None;

        for candidate in &candidates {
            let address = candidate.address();
            record.insert("host", &address);

            match self.transport.send(candidate, &self.sender, recipient, &body).await {
                Ok(reply) => {
                    tracing::debug!(to = recipient, host = %address, "Delivered: {reply}");
                    record.insert("reply", &reply);
                    outcome = Some(Outcome::Delivered(reply));
                    break;
                }
                Err(e) if e.is_permanent() => {
                    tracing::info!(to = recipient, host = %address, "Permanent failure: {e}");
                    codes.push(e.code_label());
                    errors.push(e.message.clone());
                    outcome = Some(Outcome::PermanentFailure(e.to_string()));
                    break;
                }
                Err(e) => {
                    tracing::debug!(to = recipient, host = %address, "Transient failure: {e}");
                    self.annotate(payload.annotated(), &address, &e).await;
                    codes.push(e.code_label());
                    errors.push(e.message);
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            if candidates.is_empty() {
                Outcome::TransientFailure("no transport available".to_string())
            } else {
                Outcome::TransientFailure(errors.join(", "))
            }
        });

        record.insert("result", outcome.label());
        if !codes.is_empty() {
            record.insert("codes", codes.join(", "));
            record.insert("errors", errors.join(", "));
        } else if !outcome.is_delivered() {
            record.insert("errors", outcome.reason());
        }
        self.oplog.log(&record);

        Ok(outcome)
    }

    /// Record a transient failure against the report, if there is one
    async fn annotate(&self, report: Option<&Report>, address: &str, error: &SendError) {
        let Some(report) = report else {
            return;
        };

        if let Err(e) = self
            .store
            .record_error(&report.id, &format!("{address}: {error}"))
            .await
        {
            tracing::warn!(id = %report.id, "Unable to record delivery error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use ruamail_common::{LogSink, ReportId, config::SmtpConfig, oplog::MemorySink};
    use ruamail_spool::MemoryReportStore;

    use super::*;
    use crate::{
        dkim::{DkimKey, KeyLoader, Method},
        dns::{DnsError, MailServer, MxLookup},
        error::{KeyError, SignError},
        selector::{Encryption, TransportCandidate},
    };

    #[derive(Debug)]
    struct NoMx;

    #[async_trait]
    impl MxLookup for NoMx {
        async fn lookup_mx(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
            Err(DnsError::NoMailServers(domain.to_string()))
        }
    }

    #[derive(Debug, Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(
            &self,
            candidate: &TransportCandidate,
            _from: &str,
            to: &str,
            body: &str,
        ) -> Result<String, SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((candidate.address(), format!("{to}\n{body}")));
            Ok("250 OK".to_string())
        }
    }

    #[derive(Debug)]
    struct BrokenKey;

    impl DkimKey for BrokenKey {
        fn algorithm(&self) -> &'static str {
            "ed25519-sha256"
        }

        fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, SignError> {
            Err(SignError::Crypto("hardware token unplugged".to_string()))
        }
    }

    #[derive(Debug)]
    struct BrokenKeyLoader;

    impl KeyLoader for BrokenKeyLoader {
        fn load(&self) -> Result<Arc<dyn DkimKey>, KeyError> {
            Ok(Arc::new(BrokenKey))
        }
    }

    fn report() -> Report {
        Report {
            id: ReportId::new("r1"),
            domain: "example.com".to_string(),
            rua: "mailto:dmarc@example.org".to_string(),
            begin: 1_700_000_000,
            end: 1_700_086_400,
            xml: "<feedback/>".to_string(),
        }
    }

    fn engine(transport: Arc<Recording>, sink: Arc<MemorySink>) -> DeliveryEngine {
        let selector = TransportSelector::new(SmtpConfig::default(), Arc::new(NoMx))
            .with_select_fn(Arc::new(|_: &SelectionContext<'_>| {
                vec![TransportCandidate::new(
                    "127.0.0.1",
                    2525,
                    Encryption::None,
                    Duration::from_secs(5),
                )]
            }));

        DeliveryEngine::new(
            "dmarc@reporter.example",
            "reporter.example",
            selector,
            transport,
            Arc::new(MemoryReportStore::new()),
            OpLog::with_sinks(Some(sink.clone() as Arc<dyn LogSink>), sink, false),
        )
    }

    #[tokio::test]
    async fn test_empty_recipient_is_fatal() {
        let transport = Arc::new(Recording::default());
        let engine = engine(transport.clone(), Arc::new(MemorySink::new()));
        let report = report();
        let rendered = RenderedReport::render(&report).unwrap();

        let result = engine
            .deliver(" ", Payload::Report { rendered: &rendered, report: &report })
            .await;

        assert!(matches!(result, Err(FatalError::MissingRecipient)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_message_layout() {
        let transport = Arc::new(Recording::default());
        let sink = Arc::new(MemorySink::new());
        let engine = engine(transport.clone(), sink.clone());
        let report = report();
        let rendered = RenderedReport::render(&report).unwrap();

        let outcome = engine
            .deliver(
                "dmarc@example.org",
                Payload::Report { rendered: &rendered, report: &report },
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Delivered("250 OK".to_string()));

        let sent = transport.sent.lock().unwrap();
        let (_, message) = sent[0].1.split_once('\n').unwrap();
        let parsed = mailparse::parse_mail(message.as_bytes()).unwrap();
        let subject = parsed
            .headers
            .iter()
            .find(|header| header.get_key() == "Subject")
            .unwrap()
            .get_value();
        assert_eq!(
            subject,
            "Report Domain: example.com Submitter: reporter.example Report-ID: <r1>"
        );

        let attachment = &parsed.subparts[1];
        assert_eq!(attachment.ctype.mimetype, "application/gzip");
        assert_eq!(attachment.get_body_raw().unwrap(), rendered.bytes());
        assert_eq!(
            attachment.ctype.params.get("name").map(String::as_str),
            Some("reporter.example!example.com!1700000000!1700086400!r1.xml.gz")
        );

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("result=delivered"));
        assert!(lines[0].contains("id=r1"));
        assert!(lines[0].contains("dest=example.org"));
    }

    #[tokio::test]
    async fn test_signing_failure_skips_network() {
        let transport = Arc::new(Recording::default());
        let sink = Arc::new(MemorySink::new());
        let engine = engine(transport.clone(), sink.clone()).with_signer(Signer::new(
            "reporter.example",
            "dmarc",
            Method::default(),
            Arc::new(BrokenKeyLoader),
        ));

        let outcome = engine
            .deliver(
                "dmarc@example.org",
                Payload::Prebuilt {
                    body: "From: a@reporter.example\r\n\r\nhello\r\n",
                    report: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::TransientFailure(ref reason) if reason.contains("hardware token")));
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(sink.lines()[0].contains("result=transient"));
    }
}
