//! Operational log
//!
//! Every pipeline event that an operator may want to grep for (report deleted,
//! delivery attempted, receiver rejected, ...) is emitted as a [`LogRecord`]: a
//! flat set of `key=value` pairs rendered on a single line.
//!
//! ## Line format
//!
//! - fields are sorted by key and rendered as `key=value`
//! - fields are joined with `", "`
//! - a literal comma inside a value is replaced with [`COMMA_SENTINEL`], so the
//!   line always splits on `", "` into exactly the original number of fields
//! - carriage returns and line feeds become [`CR_SENTINEL`] and [`LF_SENTINEL`],
//!   so one event is always one line
//!
//! ## Sinks
//!
//! Rendered lines go to the operational sink (when enabled) and are echoed to
//! the console sink in verbose mode. Non-verbose runs only print progress dots
//! on the console.

use std::{
    collections::BTreeMap,
    fmt,
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

/// `tracing` target used for operational log lines
pub const OPLOG_TARGET: &str = "ruamail::oplog";

/// Replacement for commas inside values
pub const COMMA_SENTINEL: &str = "#044";

/// Replacement for carriage returns inside values
pub const CR_SENTINEL: &str = "#013";

/// Replacement for line feeds inside values
pub const LF_SENTINEL: &str = "#010";

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ',' => escaped.push_str(COMMA_SENTINEL),
            '\r' => escaped.push_str(CR_SENTINEL),
            '\n' => escaped.push_str(LF_SENTINEL),
            c => escaped.push(c),
        }
    }
    escaped
}

/// A single operational event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    fields: BTreeMap<String, String>,
}

impl LogRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style insert that skips `None`
    #[must_use]
    pub fn with_opt<V: fmt::Display>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.fields.insert(key.into(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render the record as a single operational log line
    #[must_use]
    pub fn render(&self) -> String {
        self.fields
            .iter()
            .map(|(key, value)| format!("{key}={}", escape(value)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Destination for rendered operational log lines.
pub trait LogSink: Send + Sync + fmt::Debug {
    /// Write one rendered line
    fn emit(&self, line: &str);

    /// Show batch progress
    fn tick(&self) {}
}

/// Forwards lines to the `tracing` subscriber under [`OPLOG_TARGET`].
///
/// [`crate::logging::init`] routes that target to the operational log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "ruamail::oplog", "{line}");
    }
}

/// Writes lines, and progress dots, to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }

    fn tick(&self) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, ".");
        let _ = stdout.flush();
    }
}

/// Keeps lines in memory, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    ticks: Arc<Mutex<usize>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines emitted so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of progress ticks
    #[must_use]
    pub fn ticks(&self) -> usize {
        *self.ticks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }

    fn tick(&self) {
        *self.ticks.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

/// The operational logger handed to every pipeline component.
#[derive(Debug, Clone)]
pub struct OpLog {
    operational: Option<Arc<dyn LogSink>>,
    console: Arc<dyn LogSink>,
    echo: bool,
}

impl OpLog {
    /// Build the logger from the run-time options
    ///
    /// `verbosity` above 1 echoes every record to the console, and any non-zero
    /// `oplog` level enables the operational sink.
    #[must_use]
    pub fn new(verbosity: u8, oplog: u8) -> Self {
        Self::with_sinks(
            (oplog > 0).then(|| Arc::new(TracingSink) as Arc<dyn LogSink>),
            Arc::new(ConsoleSink),
            verbosity > 1,
        )
    }

    #[must_use]
    pub fn with_sinks(
        operational: Option<Arc<dyn LogSink>>,
        console: Arc<dyn LogSink>,
        echo: bool,
    ) -> Self {
        Self {
            operational,
            console,
            echo,
        }
    }

    /// Whether records are echoed to the console
    #[must_use]
    pub const fn is_verbose(&self) -> bool {
        self.echo
    }

    /// Render and route one record
    pub fn log(&self, record: &LogRecord) {
        if self.operational.is_none() && !self.echo {
            return;
        }

        let line = record.render();

        if let Some(sink) = &self.operational {
            sink.emit(&line);
        }

        if self.echo {
            self.console.emit(&line);
        }
    }

    /// Report batch progress to the console
    ///
    /// Verbose runs already print every record, so no dot is shown there.
    pub fn progress(&self) {
        if !self.echo {
            self.console.tick();
        }
    }
}

impl Default for OpLog {
    fn default() -> Self {
        Self::new(1, 0)
    }
}
