//! Aggregate report model shared by the spool and the delivery pipeline.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Identifier of a queued aggregate report.
///
/// Identifiers are opaque strings, ordered lexicographically. Locally generated
/// identifiers are ULIDs, so they also sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(Arc<str>);

impl ReportId {
    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Generate a fresh, time-ordered identifier
    #[must_use]
    pub fn generate() -> Self {
        Self::new(ulid::Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A pending aggregate report.
///
/// The XML body is produced upstream and treated as opaque here; the delivery
/// pipeline only compresses and transports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Unique identifier, also used as the RFC 7489 `Report-ID`
    pub id: ReportId,
    /// The policy domain the report is about
    pub domain: String,
    /// The `rua` tag of the domain's policy record, unparsed
    pub rua: String,
    /// Start of the reporting period (Unix seconds)
    #[serde(default)]
    pub begin: u64,
    /// End of the reporting period (Unix seconds)
    #[serde(default)]
    pub end: u64,
    /// Serialised XML report body
    pub xml: String,
}

impl Report {
    /// The attachment file name mandated by RFC 7489 section 7.2.1.1
    ///
    /// `receiver "!" policy-domain "!" begin "!" end "!" unique-id ".xml.gz"`
    #[must_use]
    pub fn attachment_name(&self, submitter: &str) -> String {
        format!(
            "{submitter}!{}!{}!{}!{}.xml.gz",
            self.domain, self.begin, self.end, self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_name_follows_rfc7489() {
        let report = Report {
            id: ReportId::new("abc123"),
            domain: "example.com".to_string(),
            rua: "mailto:dmarc@example.com".to_string(),
            begin: 1_700_000_000,
            end: 1_700_086_400,
            xml: String::new(),
        };

        assert_eq!(
            report.attachment_name("reporter.example.net"),
            "reporter.example.net!example.com!1700000000!1700086400!abc123.xml.gz"
        );
    }

    #[test]
    fn generated_ids_are_ordered() {
        let first = ReportId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ReportId::generate();
        assert!(first < second);
    }

    #[test]
    fn report_id_is_transparent_in_ron() {
        let id = ReportId::new("r-1");
        let text = ron::to_string(&id).unwrap();
        assert_eq!(text, "\"r-1\"");
    }
}
