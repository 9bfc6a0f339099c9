//! In-process stand-ins for the pipeline's collaborators.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use ruamail_common::{LogSink, OpLog, Report, ReportId, config::SmtpConfig, oplog::MemorySink};
use ruamail_delivery::{
    DeliveryEngine, Dispatcher, DkimKey, DnsError, Ed25519Key, Encryption, KeyError, KeyLoader,
    MailServer, Method, MxLookup, RuaResolver, SelectionContext, SendError, Signer, Transport,
    TransportCandidate, TransportSelector,
};
use ruamail_spool::{MemoryReportStore, ReportStore};

/// One message handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub host: String,
    pub to: String,
    pub body: String,
}

/// Replays scripted results in order, then accepts everything.
///
/// Sends to `hang_for` never complete; sends to `panic_for` panic.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, SendError>>>,
    sent: Mutex<Vec<Sent>>,
    hang_for: Option<String>,
    panic_for: Option<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<String, SendError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn hanging_for(mut self, recipient: &str) -> Self {
        self.hang_for = Some(recipient.to_string());
        self
    }

    pub fn panicking_for(mut self, recipient: &str) -> Self {
        self.panic_for = Some(recipient.to_string());
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> usize {
        self.sent().iter().filter(|sent| sent.to == recipient).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        candidate: &TransportCandidate,
        _from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError> {
        self.sent.lock().unwrap().push(Sent {
            host: candidate.address(),
            to: to.to_string(),
            body: body.to_string(),
        });

        if self.hang_for.as_deref() == Some(to) {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        assert!(
            self.panic_for.as_deref() != Some(to),
            "transport blew up for {to}"
        );

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("250 2.0.0 Ok: queued".to_string()))
    }
}

/// MX lookup that never finds anything
#[derive(Debug)]
pub struct NoMx;

#[async_trait]
impl MxLookup for NoMx {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
        Err(DnsError::NoMailServers(domain.to_string()))
    }
}

/// Fixed Ed25519 key, counting how often it is loaded
#[derive(Debug, Default)]
pub struct CountingKeyLoader {
    pub loads: AtomicUsize,
}

impl CountingKeyLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl KeyLoader for CountingKeyLoader {
    fn load(&self) -> Result<Arc<dyn DkimKey>, KeyError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Ed25519Key::from_bytes(&[7; 32])))
    }
}

/// A key file that is never there
#[derive(Debug)]
pub struct MissingKeyLoader;

impl KeyLoader for MissingKeyLoader {
    fn load(&self) -> Result<Arc<dyn DkimKey>, KeyError> {
        Err(KeyError::Read {
            path: "/nonexistent/dkim.key".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
}

pub fn report(id: &str, rua: &str) -> Report {
    Report {
        id: ReportId::new(id),
        domain: "example.com".to_string(),
        rua: rua.to_string(),
        begin: 1_700_000_000,
        end: 1_700_086_400,
        xml: format!("<feedback><report_metadata><report_id>{id}</report_id></report_metadata></feedback>"),
    }
}

/// XML that stays large after compression
pub fn incompressible_xml(len: usize) -> String {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            char::from(b'a' + (state % 26) as u8)
        })
        .collect()
}

/// Candidates `mx1:25`, `mx2:25`, ... in that order
pub fn numbered_candidates(count: usize) -> ruamail_delivery::SelectFn {
    Arc::new(move |_: &SelectionContext<'_>| {
        (1..=count)
            .map(|i| {
                TransportCandidate::new(
                    format!("mx{i}.example.org"),
                    25,
                    Encryption::StartTls,
                    Duration::from_secs(30),
                )
            })
            .collect()
    })
}

/// A dispatcher wired to fakes, and handles to inspect them
pub struct Harness {
    pub store: Arc<MemoryReportStore>,
    pub transport: Arc<ScriptedTransport>,
    pub sink: Arc<MemorySink>,
    pub oplog: OpLog,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        let sink = Arc::new(MemorySink::new());
        let oplog = OpLog::with_sinks(
            Some(Arc::clone(&sink) as Arc<dyn LogSink>),
            Arc::clone(&sink) as Arc<dyn LogSink>,
            false,
        );

        Self {
            store: Arc::new(MemoryReportStore::new()),
            transport: Arc::new(transport),
            sink,
            oplog,
        }
    }

    pub fn store(&self) -> Arc<dyn ReportStore> {
        Arc::clone(&self.store) as Arc<dyn ReportStore>
    }

    pub fn engine(&self, candidates: usize) -> DeliveryEngine {
        let selector = TransportSelector::new(SmtpConfig::default(), Arc::new(NoMx))
            .with_select_fn(numbered_candidates(candidates));

        DeliveryEngine::new(
            "dmarc@reporter.example",
            "reporter.example",
            selector,
            Arc::clone(&self.transport) as Arc<dyn Transport>,
            self.store(),
            self.oplog.clone(),
        )
    }

    pub fn dispatcher(&self, engine: DeliveryEngine) -> Dispatcher {
        Dispatcher::new(Arc::new(RuaResolver), engine, self.store(), self.oplog.clone())
    }

    pub fn signer(loader: Arc<dyn KeyLoader>) -> Signer {
        Signer::new("reporter.example", "dmarc", Method::default(), loader)
    }

    pub async fn enqueue(&self, report: Report) {
        self.store.enqueue(report).await.unwrap();
    }

    /// Operational log lines whose `result` field is `result`
    pub fn lines_with(&self, result: &str) -> Vec<String> {
        let needle = format!("result={result}");
        self.sink
            .lines()
            .into_iter()
            .filter(|line| line.split(", ").any(|field| field == needle))
            .collect()
    }
}
