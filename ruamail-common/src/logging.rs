use std::{fs::OpenOptions, path::Path, str::FromStr, sync::Mutex};

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer,
    filter::FilterFn,
    fmt::{time::ChronoUtc, writer::BoxMakeWriter},
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::oplog::OPLOG_TARGET;

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Unable to open operational log {path}: {source}")]
    OpenOplog {
        path: String,
        source: std::io::Error,
    },

    #[error("Logging already initialised: {0}")]
    AlreadyInitialised(#[from] tracing_subscriber::util::TryInitError),
}

/// Map the command line verbosity onto a diagnostic level
///
/// The default verbosity of 1 only reports warnings, so a plain run stays quiet.
#[must_use]
pub const fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber
///
/// Diagnostics go to stderr, filtered to this workspace's crates. When
/// `oplog` is set, operational log lines are written there as well: to the
/// given file when one is configured, to stderr otherwise.
///
/// # Errors
///
/// Fails if the operational log file cannot be opened or a subscriber is
/// already installed.
pub fn init(verbosity: u8, oplog: bool, oplog_path: Option<&Path>) -> Result<(), LoggingError> {
    let default = level_for(verbosity);

    let level = std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or(default)
    });

    let oplog_layer = if oplog {
        let writer = match oplog_path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LoggingError::OpenOplog {
                        path: path.display().to_string(),
                        source,
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
            None => BoxMakeWriter::new(std::io::stderr),
        };

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_level(false)
                .with_timer(ChronoUtc::rfc_3339())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target() == OPLOG_TARGET
                })),
        )
    } else {
        None
    };

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("ruamail")
                        && metadata.target() != OPLOG_TARGET
                })),
        )
        .with(oplog_layer)
        .try_init()?;

    Ok(())
}
