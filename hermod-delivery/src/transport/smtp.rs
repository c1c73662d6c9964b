//! Plain SMTP client used for remote delivery.

use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use hermod_common::{Address, Envelope, incoming, internal, outgoing, status::Status};
use hermod_tracing::traced;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use super::{RemoteTransport, TransportConfig};
use crate::{
    dns::{DnsError, DnsResolver},
    error::TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: Status,
    text: String,
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{} {}", self.status, self.text)
    }
}

/// Fails unless `reply` carries one of the `accepted` codes.
fn require(reply: &Reply, command: &str, accepted: &[Status]) -> Result<(), TransportError> {
    if accepted.contains(&reply.status) {
        Ok(())
    } else {
        Err(TransportError::Failed(format!("{command} rejected: {reply}")))
    }
}

/// Lines starting with `.` get a second one, so the body can never end the transfer early.
fn dot_stuff(line: &str) -> String {
    if line.starts_with('.') {
        format!(".{line}")
    } else {
        line.to_string()
    }
}

/// One client connection, speaking a single HELO/MAIL/RCPT/DATA transaction.
struct Client<Stream> {
    stream: BufReader<Stream>,
    timeout: Duration,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin> Client<Stream> {
    fn new(stream: Stream, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    fn timed_out(&self, waiting_for: &str) -> TransportError {
        TransportError::Failed(format!(
            "timed out after {}s waiting for {waiting_for}",
            self.timeout.as_secs()
        ))
    }

    /// Reads a possibly multi-line reply (`250-first`, `250-second`, `250 last`).
    async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let mut text = Vec::new();

        loop {
            let mut line = String::new();
            let read = timeout(self.timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| self.timed_out("a reply"))??;

            if read == 0 {
                return Err(TransportError::Failed(
                    "connection closed by server".to_string(),
                ));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            incoming!("{line}");

            let status = line
                .get(..3)
                .and_then(|code| code.parse::<u32>().ok())
                .map(Status::from)
                .ok_or_else(|| TransportError::Failed(format!("malformed reply: {line}")))?;
            text.push(line.get(4..).unwrap_or_default().to_string());

            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(Reply {
                    status,
                    text: text.join(" "),
                });
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        let written = timeout(self.timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match written {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.timed_out("the server to accept data")),
        }
    }

    async fn command(&mut self, command: &str) -> Result<Reply, TransportError> {
        outgoing!("{command}");
        self.write(format!("{command}\r\n").as_bytes()).await?;
        self.read_reply().await
    }

    async fn transaction(
        &mut self,
        helo: &str,
        recipient: &Address,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        let greeting = self.read_reply().await?;
        require(&greeting, "connection", &[Status::ServiceReady])?;

        let reply = self.command(&format!("HELO {helo}")).await?;
        require(&reply, "HELO", &[Status::Ok])?;

        let reply = self
            .command(&format!("MAIL FROM:<{}>", envelope.sender().full()))
            .await?;
        require(&reply, "MAIL FROM", &[Status::Ok])?;

        let reply = self
            .command(&format!("RCPT TO:<{}>", recipient.full()))
            .await?;
        if reply.status.is_permanent() {
            return Err(TransportError::RecipientNotFound(format!(
                "{recipient}: {reply}"
            )));
        }
        if !reply.status.is_positive() {
            return Err(TransportError::Failed(format!("RCPT TO rejected: {reply}")));
        }

        let reply = self.command("DATA").await?;
        require(&reply, "DATA", &[Status::StartMailInput])?;

        let mut data = String::with_capacity(envelope.size() + envelope.body().len() + 3);
        for line in envelope.body() {
            data.push_str(&dot_stuff(line));
            data.push_str("\r\n");
        }
        data.push_str(".\r\n");

        outgoing!(
            "<{} bytes of message data>",
            data.len()
        );
        self.write(data.as_bytes()).await?;

        let reply = self.read_reply().await?;
        require(&reply, "message data", &[Status::Ok])
    }

    /// Ends the session. The outcome is already decided, so failures are only logged.
    async fn quit(&mut self) {
        if let Err(err) = self.command("QUIT").await {
            internal!(level = DEBUG, "QUIT failed after transaction: {err}");
        }
    }
}

/// Delivers remote mail over SMTP, through the configured relay host or directly to the
/// recipient domain's mail servers.
///
/// Servers are tried in preference order until one accepts the message. A recipient rejection
/// from any of them is final.
#[derive(Debug)]
pub struct SmtpTransport {
    config: TransportConfig,
    helo_name: String,
    resolver: Option<DnsResolver>,
}

impl SmtpTransport {
    /// `primary_domain` is announced in `HELO` unless the configuration names something else.
    ///
    /// # Errors
    ///
    /// If no relay host is configured and the system resolver cannot be set up.
    pub fn new(config: TransportConfig, primary_domain: &str) -> Result<Self, DnsError> {
        let resolver = if config.relay_host.is_some() {
            None
        } else {
            Some(DnsResolver::new(&config.dns)?)
        };

        let helo_name = config
            .helo_name
            .clone()
            .unwrap_or_else(|| primary_domain.to_string());

        Ok(Self {
            config,
            helo_name,
            resolver,
        })
    }

    async fn servers(&self, recipient: &Address) -> Result<Vec<String>, TransportError> {
        if let Some(relay) = &self.config.relay_host {
            return Ok(vec![relay.clone()]);
        }

        let Some(resolver) = &self.resolver else {
            return Err(TransportError::Failed(
                "no relay host or resolver configured".to_string(),
            ));
        };

        Ok(resolver
            .resolve_mail_servers(recipient.domain())
            .await?
            .into_iter()
            .map(|mut server| {
                server.port = self.config.port;
                server.address()
            })
            .collect())
    }

    async fn deliver_via(
        &self,
        server: &str,
        recipient: &Address,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let stream = timeout(connect_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| {
                TransportError::Failed(format!(
                    "connection to {server} timed out after {}s",
                    connect_timeout.as_secs()
                ))
            })?
            .map_err(|err| TransportError::Failed(format!("unable to connect to {server}: {err}")))?;

        let mut client = Client::new(
            stream,
            Duration::from_secs(self.config.command_timeout_secs),
        );
        let result = client
            .transaction(&self.helo_name, recipient, envelope)
            .await;

        if matches!(result, Ok(()) | Err(TransportError::RecipientNotFound(_))) {
            client.quit().await;
        }

        result
    }
}

#[async_trait]
impl RemoteTransport for SmtpTransport {
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(recipient = %recipient)), timing(precision = "ms"))]
    async fn send(&self, recipient: &Address, envelope: &Envelope) -> Result<(), TransportError> {
        let servers = self.servers(recipient).await?;
        let mut last_error = None;

        for server in servers {
            match self.deliver_via(&server, recipient, envelope).await {
                Ok(()) => {
                    internal!(level = DEBUG, "Handed {recipient} to {server}");
                    return Ok(());
                }
                Err(err @ TransportError::RecipientNotFound(_)) => return Err(err),
                Err(err) => {
                    internal!(level = WARN, "Delivery to {recipient} via {server} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Failed(format!("no mail servers for {}", recipient.domain()))
        }))
    }
}
