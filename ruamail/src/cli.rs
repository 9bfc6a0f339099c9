//! Command line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use ruamail_common::config::SendConfig;

/// Send queued DMARC aggregate reports to their receivers
#[derive(Parser, Debug)]
#[command(name = "ruamail")]
#[command(about = "Send DMARC aggregate reports", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (overrides RUAMAIL_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More output; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Seconds to pause between batches
    #[arg(long)]
    pub delay: Option<u64>,

    /// Reports sent between pauses
    #[arg(long)]
    pub batch: Option<usize>,

    /// Seconds allowed for one report
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Write the operational log; repeat for more
    #[arg(long, action = ArgAction::Count, global = true)]
    pub syslog: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send every pending report (the default)
    Send,
    /// Queue an aggregate report for sending
    Enqueue {
        /// The policy domain the report is about
        #[arg(long)]
        domain: String,

        /// The domain's `rua` tag, as published
        #[arg(long)]
        rua: String,

        /// Start of the reporting period (Unix seconds)
        #[arg(long, default_value_t = 0)]
        begin: u64,

        /// End of the reporting period (Unix seconds)
        #[arg(long, default_value_t = 0)]
        end: u64,

        /// The report's XML body
        file: PathBuf,
    },
}

impl Cli {
    /// Console verbosity: 1, plus one per `-v`
    #[must_use]
    pub const fn verbosity(&self) -> u8 {
        self.verbose.saturating_add(1)
    }

    /// The `send` section with command line flags applied
    #[must_use]
    pub fn send_config(&self, config: &SendConfig) -> SendConfig {
        SendConfig {
            delay_secs: self.delay.unwrap_or(config.delay_secs),
            batch: self.batch.unwrap_or(config.batch),
            timeout_secs: self.timeout.unwrap_or(config.timeout_secs),
        }
    }

    #[must_use]
    pub fn action(&self) -> Command {
        self.command.clone().unwrap_or(Command::Send)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        <Cli as CommandFactory>::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["ruamail"]);

        assert_eq!(cli.verbosity(), 1);
        assert_eq!(cli.syslog, 0);
        assert_eq!(cli.action(), Command::Send);

        let send = cli.send_config(&SendConfig::default());
        assert_eq!(send.delay_secs, 5);
        assert_eq!(send.batch, 1);
        assert_eq!(send.timeout_secs, 120);
    }

    #[test]
    fn counted_flags() {
        let cli = Cli::parse_from(["ruamail", "-vv", "--syslog", "--syslog", "send"]);

        assert_eq!(cli.verbosity(), 3);
        assert_eq!(cli.syslog, 2);
        assert_eq!(cli.action(), Command::Send);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(["ruamail", "--batch", "50", "--timeout", "10"]);
        let config = SendConfig {
            delay_secs: 7,
            batch: 2,
            timeout_secs: 60,
        };

        let send = cli.send_config(&config);
        assert_eq!(send.delay_secs, 7);
        assert_eq!(send.batch, 50);
        assert_eq!(send.timeout_secs, 10);
    }

    #[test]
    fn enqueue() {
        let cli = Cli::parse_from([
            "ruamail",
            "enqueue",
            "--domain",
            "example.com",
            "--rua",
            "mailto:dmarc@example.com",
            "--begin",
            "1700000000",
            "--end",
            "1700086400",
            "report.xml",
        ]);

        assert_eq!(
            cli.action(),
            Command::Enqueue {
                domain: "example.com".to_string(),
                rua: "mailto:dmarc@example.com".to_string(),
                begin: 1_700_000_000,
                end: 1_700_086_400,
                file: PathBuf::from("report.xml"),
            }
        );
    }
}
