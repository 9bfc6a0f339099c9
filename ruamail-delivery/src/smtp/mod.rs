//! SMTP delivery over `tokio`, with STARTTLS and AUTH PLAIN.
//!
//! [`SmtpTransport`] runs one complete session per send. Persistent
//! candidates keep their connection between sends; it is taken out of the
//! pool while in use and only put back after a successful send, so a
//! cancelled or failed session never leaves a half-used connection behind.

mod client;
mod error;
mod response;

use std::time::Duration;

use async_trait::async_trait;
use ruamail_common::tracing;
use tokio::sync::Mutex;

pub use self::{
    client::SmtpClient,
    error::ClientError,
    response::Response,
};
use crate::{
    error::SendError,
    selector::{Encryption, TransportCandidate},
    transport::Transport,
};

/// Bound on the QUIT exchange after a completed delivery
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// An idle persistent connection and the address it belongs to
#[derive(Debug)]
struct PooledConnection {
    address: String,
    client: SmtpClient,
}

/// [`Transport`] speaking SMTP to the candidate's host.
#[derive(Debug)]
pub struct SmtpTransport {
    helo: String,
    accept_invalid_certs: bool,
    persistent: Mutex<Option<PooledConnection>>,
}

impl SmtpTransport {
    /// `helo` is the name announced in EHLO.
    #[must_use]
    pub fn new(helo: impl Into<String>) -> Self {
        Self {
            helo: helo.into(),
            accept_invalid_certs: false,
            persistent: Mutex::new(None),
        }
    }

    /// Accept invalid TLS certificates (testing only)
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Connect, greet, and negotiate TLS and authentication as the candidate asks
    async fn open(&self, candidate: &TransportCandidate) -> Result<SmtpClient, SendError> {
        let address = candidate.address();
        let mut client = SmtpClient::connect(&address, candidate.host.clone())
            .await
            .map_err(|e| SendError::local(format!("Failed to connect to {address}: {e}")))?
            .accept_invalid_certs(self.accept_invalid_certs);

        client.read_greeting().await?;
        let ehlo = client.ehlo(&self.helo).await?;

        if candidate.encryption == Encryption::StartTls {
            if !ehlo.has_extension("STARTTLS") {
                return Err(SendError::local(format!(
                    "{address} does not offer STARTTLS"
                )));
            }

            // Upgrade failures are local: a refused STARTTLS is never permanent.
            client
                .starttls()
                .await
                .map_err(|e| SendError::local(format!("STARTTLS with {address} failed: {e}")))?;
            client.ehlo(&self.helo).await?;
        }

        if let Some((user, pass)) = &candidate.credentials {
            client.auth_plain(user, pass).await?;
        }

        Ok(client)
    }

    /// MAIL, RCPT and DATA on an open session
    async fn transaction(
        client: &mut SmtpClient,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError> {
        client.mail_from(from).await?;
        client.rcpt_to(to).await?;
        let reply = client.data(body).await?;
        Ok(reply.to_string())
    }

    /// Take the pooled connection for `address`, if it still answers RSET
    async fn checkout(&self, address: &str) -> Option<SmtpClient> {
        let pooled = self.persistent.lock().await.take()?;

        if pooled.address != address {
            return None;
        }

        let mut client = pooled.client;
        match client.rset().await {
            Ok(_) => Some(client),
            Err(e) => {
                tracing::debug!(address, "Pooled connection is stale, reconnecting: {e}");
                None
            }
        }
    }

    async fn send_persistent(
        &self,
        candidate: &TransportCandidate,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError> {
        let address = candidate.address();

        let mut client = match self.checkout(&address).await {
            Some(client) => client,
            None => self.open(candidate).await?,
        };

        let reply = Self::transaction(&mut client, from, to, body).await?;

        *self.persistent.lock().await = Some(PooledConnection { address, client });

        Ok(reply)
    }

    async fn send_once(
        &self,
        candidate: &TransportCandidate,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError> {
        let mut client = self.open(candidate).await?;
        let reply = Self::transaction(&mut client, from, to, body).await?;

        if let Err(e) = tokio::time::timeout(QUIT_TIMEOUT, client.quit()).await {
            tracing::debug!(address = %candidate.address(), "QUIT timed out after delivery: {e}");
        }

        Ok(reply)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        candidate: &TransportCandidate,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError> {
        if self.accept_invalid_certs && candidate.encryption == Encryption::StartTls {
            tracing::warn!(
                address = %candidate.address(),
                "TLS certificate validation is disabled for this connection"
            );
        }

        let session = async {
            if candidate.persistent {
                self.send_persistent(candidate, from, to, body).await
            } else {
                self.send_once(candidate, from, to, body).await
            }
        };

        tokio::time::timeout(candidate.timeout, session)
            .await
            .unwrap_or_else(|_| {
                Err(SendError::local(format!(
                    "Timed out after {}s talking to {}",
                    candidate.timeout.as_secs(),
                    candidate.address()
                )))
            })
    }
}
