//! Delivery engine for spooled mail
//!
//! This crate provides:
//! - The background processor that periodically drains the spool
//! - Local delivery into per-user mailbox directories
//! - Remote delivery over SMTP, through a relay host or MX lookup
//! - Retry scheduling with capped exponential backoff
//! - Failure notices (bounces) back to the original sender

pub mod bounce;
mod dns;
mod error;
pub mod local;
mod processor;
pub mod retry;
mod transport;

pub use dns::{DnsConfig, DnsError, DnsResolver, MailServer};
pub use error::{
    DeliveryError, LocalDeliveryError, PermanentError, TemporaryError, TransportError,
};
pub use processor::{CycleReport, DeliveryEngine, DeliveryProcessor, Outcome};
pub use transport::{RemoteTransport, SmtpTransport, TransportConfig};
