use std::io::Write;

use flate2::{Compression, write::GzEncoder};
use ruamail_common::Report;

/// A report body compressed for transport.
///
/// Produced once per report and shared by every receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    compressed: Vec<u8>,
}

impl RenderedReport {
    /// Gzip the report's XML body
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder fails.
    pub fn render(report: &Report) -> std::io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(report.xml.as_bytes())?;

        Ok(Self {
            compressed: encoder.finish()?,
        })
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.compressed
    }

    /// Compressed length, as compared against receiver size limits
    #[must_use]
    pub fn len(&self) -> u64 {
        self.compressed.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compressed.is_empty()
    }
}
