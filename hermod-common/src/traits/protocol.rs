use std::net::SocketAddr;

use tokio::{net::TcpStream, sync::broadcast};

use crate::{
    Signal,
    error::{ProtocolError, SessionError},
};

/// One accepted connection, driven to completion.
pub trait SessionHandler {
    /// Runs the session. `signal` delivers [`Signal::Shutdown`]; a session should finish the
    /// command it is processing and then close.
    fn run(
        self,
        signal: broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// A protocol served by a [`Listener`](crate::listener::Listener).
///
/// The protocol value owns everything its sessions need (configuration and shared handles),
/// and hands each accepted stream to a fresh session.
pub trait Protocol: Send + Sync + 'static {
    type Session: SessionHandler + Send + 'static;

    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Self::Session;

    ///
    /// Validate the protocol's configuration before any socket is bound
    ///
    /// # Errors
    /// Whatever the protocol considers an unusable configuration.
    ///
    fn validate(&self) -> Result<(), ProtocolError>;

    fn ty() -> &'static str;
}
