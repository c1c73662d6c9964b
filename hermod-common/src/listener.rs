use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use hermod_tracing::traced;
use serde::Deserialize;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Semaphore, broadcast},
    task::JoinHandle,
};

use crate::{
    Signal,
    error::ListenerError,
    internal,
    traits::protocol::{Protocol, SessionHandler},
};

pub const fn default_max_sessions() -> usize {
    100
}

/// Pause after an `accept()` failure that is not specific to one connection, such as running
/// out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before accepting again after `err`.
///
/// Failures of a single incoming connection are retried straight away.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

/// A source of accepted connections, normally a bound [`TcpListener`].
pub trait Incoming: Send + Sync {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    /// # Errors
    /// If the local address cannot be determined.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Incoming for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        Self::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Self::local_addr(self)
    }
}

/// Where to listen, and how many sessions may run at once.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub socket: SocketAddr,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Accepts connections and runs one session per connection, at most `max_sessions` at a time.
///
/// Connections accepted while the pool is full wait for a free slot before their session
/// starts.
pub struct Listener<Proto: Protocol> {
    handler: Arc<Proto>,
    socket: SocketAddr,
    permits: Arc<Semaphore>,
}

impl<Proto: Protocol> Listener<Proto> {
    #[must_use]
    pub fn new(handler: Proto, config: &ListenerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            socket: config.socket,
            permits: Arc::new(Semaphore::new(config.max_sessions.max(1))),
        }
    }

    #[must_use]
    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    /// # Errors
    /// If the protocol rejects its configuration.
    #[traced(instrument(skip(self)), timing(precision = "ns"))]
    pub fn init(&self) -> anyhow::Result<()> {
        internal!("Initialising {} listener on {}", Proto::ty(), self.socket);
        self.handler.validate()?;
        Ok(())
    }

    /// Binds the configured socket.
    ///
    /// # Errors
    /// If the socket cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        TcpListener::bind(self.socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: self.socket.to_string(),
                source,
            })
    }

    /// Binds and serves until shutdown.
    ///
    /// # Errors
    /// If binding or accepting fails.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves an already bound socket until shutdown, then waits for running sessions.
    ///
    /// A failed `accept()` is logged and the listener carries on.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "s"))]
    pub async fn serve_on(
        &self,
        listener: impl Incoming,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr().unwrap_or(self.socket);
        internal!(level = INFO, "Serving {} on {local}", Proto::ty());

        let mut sessions: Vec<JoinHandle<()>> = Vec::default();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            "{} Listener {local} received Shutdown signal, finishing {} sessions ...",
                            Proto::ty(),
                            sessions.len()
                        );
                        join_all(sessions).await;
                        return Ok(());
                    }
                }

                connection = listener.accept() => match connection {
                    Ok((stream, peer)) => {
                        tracing::debug!("Connection received on {local} from {peer}");

                        sessions.retain(|session| !session.is_finished());
                        sessions.push(self.spawn_session(stream, peer, shutdown.resubscribe()));
                    }
                    Err(err) => {
                        let pause = accept_backoff(&err);
                        let err = ListenerError::AcceptFailed(err);
                        internal!(level = WARN, "{} Listener {local}: {err}", Proto::ty());

                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                },
            }
        }
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        signal: broadcast::Receiver<Signal>,
    ) -> JoinHandle<()> {
        let permits = Arc::clone(&self.permits);
        let session = self.handler.handle(stream, peer);

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            if let Err(err) = session.run(signal).await {
                internal!(level = ERROR, "Session with {peer} ended: {err}");
            }
        })
    }
}
