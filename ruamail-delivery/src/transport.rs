use async_trait::async_trait;

use crate::{error::SendError, selector::TransportCandidate};

/// Sends one rendered message over one transport candidate.
///
/// Implementations must report server rejections with their reply code so
/// that 5xx answers can be told apart from transient failures.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Deliver `body` from `from` to `to`, returning the server's final reply
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] carrying the reply code when the server
    /// answered, or none for local failures.
    async fn send(
        &self,
        candidate: &TransportCandidate,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, SendError>;
}
