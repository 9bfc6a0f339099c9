//! Delivery pipeline for DMARC aggregate reports.
//!
//! Reports are taken from a [`ReportStore`](ruamail_spool::ReportStore) one
//! at a time by the [`BatchRunner`], fanned out to their `rua` receivers by
//! the [`Dispatcher`], and sent by the [`DeliveryEngine`] over the
//! candidates chosen by the [`TransportSelector`]:
//!
//! ```text
//! BatchRunner -> Dispatcher -> DeliveryEngine -> Signer
//!                                             -> TransportSelector -> MxLookup
//!                                             -> Transport
//! ```

pub mod dispatcher;
pub mod dkim;
pub mod dns;
pub mod engine;
mod error;
mod message;
pub mod notice;
pub mod receiver;
mod render;
pub mod runner;
pub mod selector;
pub mod smtp;
mod transport;

pub use dispatcher::{DispatchSummary, Dispatcher};
pub use dkim::{DkimKey, Ed25519Key, FileKeyLoader, KeyLoader, Method, Signer};
pub use dns::{DnsConfig, DnsError, DnsResolver, MailServer, MxLookup};
pub use engine::{DeliveryEngine, Outcome, Payload};
pub use error::{FatalError, KeyError, ResolveError, SendError, SignError};
pub use message::{Attachment, MessageBuilder};
pub use receiver::{Receiver, ReceiverResolver, ReceiverScheme, RuaResolver};
pub use render::RenderedReport;
pub use runner::{BatchRunner, RunConfig, RunSummary};
pub use selector::{Encryption, SelectFn, SelectionContext, TransportCandidate, TransportSelector};
pub use smtp::SmtpTransport;
pub use transport::Transport;
