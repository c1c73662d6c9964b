use std::io;

use hermod_common::error::SessionError;
use thiserror::Error;

/// Failures on the client stream itself.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client sent more than `limit` bytes without a line terminator.
    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Io(err) => Self::Connection(err),
            err @ ConnectionError::LineTooLong { .. } => {
                Self::Connection(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
            }
        }
    }
}
