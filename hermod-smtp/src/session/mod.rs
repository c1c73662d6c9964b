use std::{net::SocketAddr, sync::Arc, time::Duration};

use hermod_common::{
    Envelope, Policy, Signal, UserDirectory, error::SessionError, incoming, internal, outgoing,
    tracing,
};
use hermod_spool::BackingStore;
use hermod_tracing::traced;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

use crate::{
    SmtpServerTimeouts, State,
    command::Command,
    connection::Connection,
};

mod data;
mod response;
mod transaction;

pub use response::Reply;

/// Everything a session needs besides its stream. Shared by all sessions of a listener.
#[derive(Debug)]
pub struct SessionContext {
    pub policy: Arc<Policy>,
    pub users: Arc<dyn UserDirectory>,
    pub spool: Arc<dyn BackingStore>,
    /// In bytes; `0` disables the limit
    pub max_message_size: usize,
    pub timeouts: SmtpServerTimeouts,
}

/// What to do after a command has been answered.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// The outcome of waiting for the next line.
enum Input {
    Line(String),
    /// The client closed its side of the stream
    Closed,
    Shutdown,
}

/// One client dialogue, from greeting to disconnect.
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    client_ip: String,
    state: State,
    envelope: Envelope,
    connection: Connection<Stream>,
    context: Arc<SessionContext>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(stream: Stream, peer: SocketAddr, context: Arc<SessionContext>) -> Self {
        Self {
            peer,
            client_ip: peer.ip().to_string(),
            state: State::default(),
            envelope: Envelope::default(),
            connection: Connection::new(stream),
            context,
        }
    }

    /// Runs the dialogue until the client quits or disconnects, the session fails, or a
    /// shutdown is signalled while waiting for a command.
    ///
    /// # Errors
    /// Any [`SessionError`] that ended the session. A best-effort sign-off has already been
    /// attempted where it makes sense.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(peer = %self.peer)), timing(precision = "ms"))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!(level = INFO, "{} socket connected via SMTP.", self.client_ip);

        let result = self.converse(&mut signal).await;

        if let Err(err) = &result
            && err.wants_sign_off()
        {
            internal!(level = DEBUG, "Disconnecting: {err}");
            if let Err(err) = self.reply(Reply::sign_off()).await {
                internal!(level = DEBUG, "Error sending disconnect message: {err}");
            }
        }

        internal!("Connection closed");
        result
    }

    async fn converse(
        &mut self,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        self.reply(Reply::greeting()).await?;

        loop {
            let line = match self.next_line(Some(&mut *signal)).await? {
                Input::Line(line) => line,
                Input::Closed => {
                    internal!(level = DEBUG, "Client closed the connection");
                    return Ok(());
                }
                Input::Shutdown => {
                    internal!(level = INFO, "Shutting down, closing session with {}", self.peer);
                    self.reply(Reply::sign_off()).await?;
                    return Ok(());
                }
            };

            incoming!("{line}");

            if self.dispatch(Command::from(line.as_str())).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<Flow, SessionError> {
        let reply = match command {
            Command::Quit => {
                internal!(level = DEBUG, "Client has QUIT the session");
                self.reply(Reply::sign_off()).await?;
                return Ok(Flow::Close);
            }
            Command::Helo(argument) => {
                self.state = State::Helo;
                Reply::hello(&argument)
            }
            Command::Noop => Reply::ok(),
            Command::Rset => {
                self.envelope = Envelope::default();
                self.state = State::Rset;
                Reply::ok()
            }
            Command::MailFrom(argument) if self.state.allows_mail_from() => {
                self.mail_from(&argument)
            }
            Command::RcptTo(argument) if self.state.allows_rcpt_to() => self.rcpt_to(&argument),
            Command::Data
                if self.state.allows_data() && !self.envelope.recipients().is_empty() =>
            {
                return self.data().await;
            }
            Command::MailFrom(_) | Command::RcptTo(_) | Command::Data => Reply::out_of_sequence(),
            Command::Invalid(token) => Reply::unrecognised(&token),
        };

        self.reply(reply).await?;
        Ok(Flow::Continue)
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), SessionError> {
        outgoing!("{reply}");
        self.connection.send(&reply).await?;
        Ok(())
    }

    /// Waits for the next line in poll ticks.
    ///
    /// With a `signal`, a shutdown ends the wait. Without one (inside `DATA`) only the idle
    /// limit does, so a message that is being received is never cut short.
    async fn next_line(
        &mut self,
        mut signal: Option<&mut broadcast::Receiver<Signal>>,
    ) -> Result<Input, SessionError> {
        let SmtpServerTimeouts {
            poll_secs,
            command_secs,
        } = self.context.timeouts;
        let poll = Duration::from_secs(poll_secs.max(1));
        let mut idle = 0;

        loop {
            let shutdown = async {
                match signal.as_mut() {
                    Some(signal) => signal.recv().await,
                    None => std::future::pending().await,
                }
            };

            // A line that has already arrived is answered before a pending shutdown.
            tokio::select! {
                biased;

                read = tokio::time::timeout(poll, self.connection.read_line()) => {
                    if let Ok(line) = read {
                        return Ok(line?.map_or(Input::Closed, Input::Line));
                    }

                    idle += poll_secs.max(1);
                    if idle >= command_secs {
                        tracing::warn!(
                            peer = ?self.peer,
                            state = %self.state,
                            timeout_secs = command_secs,
                            "Client connection timed out"
                        );
                        return Err(SessionError::Timeout(command_secs));
                    }
                }

                sig = shutdown => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        return Ok(Input::Shutdown);
                    }
                }
            }
        }
    }
}
