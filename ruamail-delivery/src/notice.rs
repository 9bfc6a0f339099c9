//! "Report too large" notices (RFC 7489 section 7.2.2).
//!
//! Sent to a receiver whose `!size` limit is below the compressed report,
//! so its operator knows a report exists and how large it is.

use chrono::{DateTime, Utc};
use ruamail_common::Report;

use crate::message::MessageBuilder;

/// An error report telling a receiver that a report was withheld.
#[derive(Debug, Clone)]
pub struct TooBigNotice<'a> {
    pub sender: &'a str,
    pub submitter: &'a str,
    /// The receiver URI whose limit was exceeded
    pub uri: &'a str,
    /// Compressed report size in bytes
    pub size: u64,
    pub report: &'a Report,
}

impl TooBigNotice<'_> {
    /// Render the notice as a complete message to `recipient`
    #[must_use]
    pub fn build(&self, recipient: &str, date: DateTime<Utc>) -> String {
        let report = self.report;

        let body = format!(
            "The aggregate report for {domain} is {size} bytes compressed, which is \
             over the size limit set for {uri}. The report was not sent.\n\
             \n\
             Report-Date: {date}\n\
             Report-Domain: {domain}\n\
             Report-ID: {id}\n\
             Report-Size: {size}\n\
             Submitter: {submitter}\n\
             Submitting-URI: {uri}\n",
            domain = report.domain,
            size = self.size,
            uri = self.uri,
            date = date.to_rfc2822(),
            id = report.id,
            submitter = self.submitter,
        );

        MessageBuilder::new()
            .from(self.sender)
            .to(recipient)
            .subject(format!(
                "Report Domain: {} Submitter: {} Report-ID: <{}>",
                report.domain, self.submitter, report.id
            ))
            .date(date)
            .body(body)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ruamail_common::ReportId;

    use super::*;

    #[test]
    fn test_notice_carries_error_report_fields() {
        let report = Report {
            id: ReportId::new("r42"),
            domain: "example.com".to_string(),
            rua: "mailto:dmarc@example.org!1k".to_string(),
            begin: 0,
            end: 0,
            xml: String::new(),
        };
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let message = TooBigNotice {
            sender: "dmarc@reporter.example",
            submitter: "reporter.example",
            uri: "mailto:dmarc@example.org",
            size: 4096,
            report: &report,
        }
        .build("dmarc@example.org", date);

        let parsed = mailparse::parse_mail(message.as_bytes()).unwrap();
        assert_eq!(parsed.ctype.mimetype, "text/plain");

        let body = parsed.get_body().unwrap();
        assert!(body.contains(&format!("Report-Date: {}", date.to_rfc2822())));
        for field in [
            "Report-Domain: example.com",
            "Report-ID: r42",
            "Report-Size: 4096",
            "Submitter: reporter.example",
            "Submitting-URI: mailto:dmarc@example.org",
        ] {
            assert!(body.contains(field), "missing {field:?} in {body}");
        }
        assert!(message.contains("To: dmarc@example.org\r\n"));
    }
}
