//! A controller over a throwaway file spool.

use std::{path::PathBuf, sync::Arc};

use ruamail::{Command, Config, Controller};
use ruamail_common::{LogSink, OpLog, config::SendConfig, oplog::MemorySink};
use ruamail_spool::{FileReportStore, ReportStore, SpoolConfig};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReportStore::builder()
            .path(dir.path().join("spool"))
            .build()
            .unwrap();

        let mut config = Config::default();
        config.organization.name = "reporter.example".to_string();
        config.organization.email = "dmarc@reporter.example".to_string();
        config.smtp.hostname = "reporter.example".to_string();
        config.spool = SpoolConfig::File(store);
        config.send = SendConfig {
            delay_secs: 0,
            batch: 10,
            timeout_secs: 30,
        };

        Self {
            dir,
            config,
            sink: Arc::new(MemorySink::new()),
        }
    }

    pub fn controller(&self) -> Controller {
        let oplog = OpLog::with_sinks(
            Some(Arc::clone(&self.sink) as Arc<dyn LogSink>),
            Arc::clone(&self.sink) as Arc<dyn LogSink>,
            false,
        );

        Controller::new(self.config.clone(), 1, 1).with_oplog(oplog)
    }

    /// Write `xml` next to the spool and return its path
    pub fn report_file(&self, xml: &str) -> PathBuf {
        let path = self.dir.path().join("report.xml");
        std::fs::write(&path, xml).unwrap();
        path
    }

    pub fn enqueue_command(&self, rua: &str) -> Command {
        Command::Enqueue {
            domain: "example.com".to_string(),
            rua: rua.to_string(),
            begin: 1_700_000_000,
            end: 1_700_086_400,
            file: self.report_file("<feedback/>"),
        }
    }

    /// A fresh view of the spool
    pub async fn store(&self) -> Arc<dyn ReportStore> {
        self.config.spool.clone().into_store().await.unwrap()
    }

    pub fn lines_with(&self, result: &str) -> Vec<String> {
        let needle = format!("result={result}");
        self.sink
            .lines()
            .into_iter()
            .filter(|line| line.split(", ").any(|field| field == needle))
            .collect()
    }
}
