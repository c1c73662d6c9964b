pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod state;

use std::{net::SocketAddr, sync::Arc};

use hermod_common::{
    Policy, Signal, UserDirectory,
    error::{ProtocolError, SessionError},
    traits::protocol::{Protocol, SessionHandler},
    tracing,
};
use hermod_spool::BackingStore;
use hermod_tracing::traced;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

pub use crate::{
    config::{SmtpConfig, SmtpListenerConfig, SmtpServerTimeouts},
    session::{Session, SessionContext},
    state::State,
};

/// The SMTP protocol, as served by a [`Listener`](hermod_common::listener::Listener).
///
/// Every session of one listener shares a single [`SessionContext`].
#[derive(Debug)]
pub struct Smtp {
    context: Arc<SessionContext>,
}

impl Smtp {
    #[must_use]
    pub fn new(
        config: &SmtpListenerConfig,
        policy: Arc<Policy>,
        users: Arc<dyn UserDirectory>,
        spool: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            context: Arc::new(SessionContext {
                policy,
                users,
                spool,
                max_message_size: config.max_message_size,
                timeouts: config.timeouts,
            }),
        }
    }

    /// Starts a session on any duplex stream.
    pub fn session<Stream>(&self, stream: Stream, peer: SocketAddr) -> Session<Stream>
    where
        Stream: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Session::create(stream, peer, Arc::clone(&self.context))
    }
}

impl Protocol for Smtp {
    type Session = Session<TcpStream>;

    fn ty() -> &'static str {
        "SMTP"
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip(self, stream)), timing(precision = "us"))]
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Self::Session {
        self.session(stream, peer)
    }

    #[traced(instrument(skip(self)), timing(precision = "ns"))]
    fn validate(&self) -> Result<(), ProtocolError> {
        let timeouts = self.context.timeouts;

        if timeouts.poll_secs == 0 {
            return Err(ProtocolError::InvalidConfiguration {
                field: "timeouts.poll_secs".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }

        if timeouts.command_secs < timeouts.poll_secs {
            return Err(ProtocolError::InvalidConfiguration {
                field: "timeouts.command_secs".to_string(),
                reason: format!(
                    "must not be shorter than poll_secs ({})",
                    timeouts.poll_secs
                ),
            });
        }

        Ok(())
    }
}

impl<Stream> SessionHandler for Session<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        Self::run(self, signal).await
    }
}
