//! Email message builder with support for headers, a text body and MIME
//! attachments.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};

/// Line length of base64 encoded attachment data
const BASE64_LINE: usize = 76;

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/gzip").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

/// Builder for RFC 5322 messages.
///
/// Messages without attachments are a single `text/plain` part; with
/// attachments they become `multipart/mixed`, attachments base64 encoded.
/// All lines end with CRLF.
///
/// ```
/// use ruamail_delivery::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("dmarc@example.net")
///     .to("rua@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build();
///
/// assert!(message.contains("Subject: Hello\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the Date header (default: the time of [`Self::build`]).
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the Message-ID, without angle brackets.
    ///
    /// Default: a ULID at the sender's domain.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Adds a custom header, kept in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Builds the final message.
    #[must_use]
    pub fn build(self) -> String {
        let mut message = String::with_capacity(2048);
        self.write_headers(&mut message);

        if self.attachments.is_empty() {
            let _ = write!(message, "Content-Type: text/plain; charset=utf-8\r\n\r\n");
            if let Some(body) = &self.body {
                message.push_str(&crlf(body));
            }
            return message;
        }

        let boundary = format!("----=_Part_{}", ulid::Ulid::new());

        let _ = write!(
            message,
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
        );
        let _ = write!(message, "This is a multi-part message in MIME format.\r\n\r\n");

        let _ = write!(message, "--{boundary}\r\n");
        let _ = write!(message, "Content-Type: text/plain; charset=utf-8\r\n\r\n");
        if let Some(body) = &self.body {
            message.push_str(&crlf(body));
        }
        message.push_str("\r\n");

        for attachment in &self.attachments {
            let _ = write!(message, "--{boundary}\r\n");
            let _ = write!(
                message,
                "Content-Type: {}; name=\"{}\"\r\n",
                attachment.content_type, attachment.filename
            );
            let _ = write!(message, "Content-Transfer-Encoding: base64\r\n");
            let _ = write!(
                message,
                "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                attachment.filename
            );
            message.push_str(&wrap_base64(&attachment.data));
        }

        let _ = write!(message, "--{boundary}--\r\n");

        message
    }

    fn write_headers(&self, message: &mut String) {
        if let Some(from) = &self.from {
            let _ = write!(message, "From: {from}\r\n");
        }

        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", self.to.join(", "));
        }

        if let Some(subject) = &self.subject {
            let _ = write!(message, "Subject: {subject}\r\n");
        }

        let date = self.date.unwrap_or_else(Utc::now);
        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());

        let message_id = self.message_id.clone().unwrap_or_else(|| {
            let domain = self
                .from
                .as_deref()
                .and_then(|from| from.rsplit_once('@'))
                .map_or("localhost", |(_, domain)| domain.trim_end_matches('>'));
            format!("{}@{domain}", ulid::Ulid::new())
        });
        let _ = write!(message, "Message-ID: <{message_id}>\r\n");

        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {value}\r\n");
        }

        let _ = write!(message, "MIME-Version: 1.0\r\n");
    }
}

/// Normalise bare LF line endings to CRLF
fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Base64 with CRLF line breaks every [`BASE64_LINE`] characters
fn wrap_base64(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);

    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        // base64 output is ASCII
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }

    wrapped
}
