//! Typed error handling for delivery operations.
//!
//! Every per-recipient failure ends up as a [`DeliveryError`], which is either:
//! - permanent: the recipient does not exist, so a bounce is due straight away
//! - temporary: anything else, retried with backoff

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::dns::DnsError;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Failure that retrying will not fix.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Failure that may clear up on a later attempt.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// No local user or catch-all mailbox owns the address, or the remote server refused it.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Local delivery failed: {0}")]
    Local(#[from] LocalDeliveryError),

    #[error("Remote delivery failed: {0}")]
    Remote(String),
}

impl From<LocalDeliveryError> for DeliveryError {
    fn from(err: LocalDeliveryError) -> Self {
        Self::Temporary(err.into())
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RecipientNotFound(reason) => {
                PermanentError::RecipientNotFound(reason).into()
            }
            TransportError::Failed(reason) => TemporaryError::Remote(reason).into(),
        }
    }
}

/// What a [`RemoteTransport`](crate::RemoteTransport) reports back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving server rejected the recipient outright.
    #[error("recipient rejected: {0}")]
    RecipientNotFound(String),

    /// Connection, DNS, timeout, or any reply other than a recipient rejection.
    #[error("{0}")]
    Failed(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Failed(format!("I/O error: {err}"))
    }
}

impl From<DnsError> for TransportError {
    fn from(err: DnsError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Failures writing a message into a local mailbox.
#[derive(Debug, Error)]
pub enum LocalDeliveryError {
    #[error("Unable to create mailbox directory {path}: {source}")]
    CreateMailbox { path: PathBuf, source: io::Error },

    #[error("Unable to write message {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}
