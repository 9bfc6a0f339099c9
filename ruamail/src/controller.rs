use std::{path::Path, sync::Arc};

use ruamail_common::{
    OpLog, Report, ReportId, config::SendConfig, internal, logging, tracing,
};
use ruamail_delivery::{
    BatchRunner, DeliveryEngine, Dispatcher, DnsResolver, RuaResolver, RunConfig, RunSummary,
    Signer, SmtpTransport, TransportSelector,
};
use ruamail_spool::ReportStore;

use crate::{
    cli::{Cli, Command},
    config::Config,
};

/// Wires the configured components together and runs one command
#[derive(Debug)]
pub struct Controller {
    config: Config,
    send: SendConfig,
    verbosity: u8,
    syslog: u8,
    oplog: OpLog,
}

impl Controller {
    #[must_use]
    pub fn new(config: Config, verbosity: u8, syslog: u8) -> Self {
        Self {
            send: config.send.clone(),
            oplog: OpLog::new(verbosity, syslog),
            config,
            verbosity,
            syslog,
        }
    }

    /// Load the configuration and apply the command line overrides
    ///
    /// # Errors
    ///
    /// Fails if the configuration file cannot be found or parsed.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let config = Config::load(cli.config.as_deref())?;
        let send = cli.send_config(&config.send);

        Ok(Self::new(config, cli.verbosity(), cli.syslog).with_send_config(send))
    }

    #[must_use]
    pub const fn with_send_config(mut self, send: SendConfig) -> Self {
        self.send = send;
        self
    }

    /// Route operational records somewhere other than the default sinks
    #[must_use]
    pub fn with_oplog(mut self, oplog: OpLog) -> Self {
        self.oplog = oplog;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn send_config(&self) -> &SendConfig {
        &self.send
    }

    /// Initialise logging, then run `command`
    ///
    /// # Errors
    ///
    /// Fails if logging cannot be set up, or the command fails.
    pub async fn run(self, command: Command) -> anyhow::Result<()> {
        logging::init(
            self.verbosity,
            self.syslog > 0,
            self.config.logging.oplog_path.as_deref(),
        )?;

        internal!("Controller running");

        let summary = self.execute(command).await?;

        // Terminates the line of progress dots
        if summary.is_some_and(|summary| summary.processed > 0) && !self.oplog.is_verbose() {
            println!();
        }

        internal!("Shutting down...");

        Ok(())
    }

    /// Run `command` without touching the global logging setup
    ///
    /// Returns the run totals for [`Command::Send`].
    ///
    /// # Errors
    ///
    /// Fails if the store or signer cannot be set up, the report file cannot
    /// be read, or the run is aborted.
    pub async fn execute(&self, command: Command) -> anyhow::Result<Option<RunSummary>> {
        let store = self.config.spool.clone().into_store().await?;

        match command {
            Command::Send => self.send(store).await.map(Some),
            Command::Enqueue {
                domain,
                rua,
                begin,
                end,
                file,
            } => {
                let id = Self::enqueue(&store, domain, rua, begin, end, &file).await?;
                tracing::info!(%id, "Report queued");
                Ok(None)
            }
        }
    }

    /// Send every pending report in `store`
    ///
    /// # Errors
    ///
    /// Fails if the pipeline cannot be built or the run is aborted.
    #[tracing::instrument(skip_all, err)]
    pub async fn send(&self, store: Arc<dyn ReportStore>) -> anyhow::Result<RunSummary> {
        let runner = self.runner(store)?;

        Ok(runner.run().await?)
    }

    /// Build the batch runner over `store`
    ///
    /// # Errors
    ///
    /// Fails if the DNS resolver cannot be created or the DKIM section is invalid.
    pub fn runner(&self, store: Arc<dyn ReportStore>) -> anyhow::Result<BatchRunner> {
        let smtp = &self.config.smtp;

        let resolver = DnsResolver::with_dns_config(self.config.dns.clone())?;
        let selector = TransportSelector::new(smtp.clone(), Arc::new(resolver));
        let transport = SmtpTransport::new(smtp.hostname.clone())
            .accept_invalid_certs(smtp.accept_invalid_certs);

        let mut engine = DeliveryEngine::new(
            self.config.organization.email.clone(),
            self.config.organization.name.clone(),
            selector,
            Arc::new(transport),
            Arc::clone(&store),
            self.oplog.clone(),
        );

        if let Some(dkim) = &self.config.dkim {
            engine = engine.with_signer(Signer::from_config(dkim)?);
        }

        let mut dispatcher = Dispatcher::new(
            Arc::new(RuaResolver),
            engine,
            Arc::clone(&store),
            self.oplog.clone(),
        );

        if let Some(cc) = smtp.courtesy_copy() {
            dispatcher = dispatcher.with_courtesy_copy(cc);
        }

        Ok(BatchRunner::new(
            store,
            dispatcher,
            RunConfig::from(&self.send),
            self.oplog.clone(),
        ))
    }

    /// Queue the XML report in `file`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or the store rejects the report.
    pub async fn enqueue(
        store: &Arc<dyn ReportStore>,
        domain: String,
        rua: String,
        begin: u64,
        end: u64,
        file: &Path,
    ) -> anyhow::Result<ReportId> {
        let xml = tokio::fs::read_to_string(file).await.map_err(|e| {
            anyhow::anyhow!("Failed to read report from {}: {e}", file.display())
        })?;

        let report = Report {
            id: ReportId::generate(),
            domain,
            rua,
            begin,
            end,
            xml,
        };

        Ok(store.enqueue(report).await?)
    }
}
