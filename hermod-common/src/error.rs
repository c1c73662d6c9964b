//! Error types shared by the hermod crates.

use std::io;

use thiserror::Error;

/// Errors raised while validating a protocol's listener arguments.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// I/O error during protocol initialisation.
    #[error("I/O error during validation: {0}")]
    Io(#[from] io::Error),
}

/// Errors that end a single client session.
///
/// None of these affect any other session; the listener logs them and moves on.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer closed the stream, or reading/writing it failed.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// The message exceeded the configured maximum size.
    #[error("Message of at least {size} bytes exceeds the maximum of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// The accepted message could not be persisted.
    #[error("Unable to spool message: {0}")]
    Spool(String),

    /// No command arrived within the idle limit.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// Whether it is worth attempting a sign-off notice before closing the stream.
    #[must_use]
    pub const fn wants_sign_off(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Errors in the listener and accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[source] io::Error),
}

/// A value that should have been a `user@domain` address.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid address: {0}")]
    Invalid(String),
}

/// Startup configuration errors. These are the only errors allowed to stop the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// At least one local domain is required; the first is the primary domain.
    #[error("No local domains configured")]
    NoLocalDomains,

    #[error("Invalid address in {field}: {source}")]
    Address {
        field: &'static str,
        #[source]
        source: AddressError,
    },

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_display() {
        let err = SessionError::MessageTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Message of at least 2048 bytes exceeds the maximum of 1024 bytes"
        );

        let err = SessionError::Timeout(300);
        assert_eq!(err.to_string(), "Session timed out after 300 seconds");
        assert!(err.wants_sign_off());
        assert!(!SessionError::Spool("disk full".to_string()).wants_sign_off());
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::NoLocalDomains.to_string(),
            "No local domains configured"
        );

        let err = ConfigError::Address {
            field: "users.default_mailbox",
            source: AddressError::Invalid("nobody".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Invalid address in users.default_mailbox: Invalid address: nobody"
        );
    }

    #[test]
    fn listener_error_display() {
        let err = ListenerError::BindFailed {
            address: "127.0.0.1:25".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:25"));
    }
}
