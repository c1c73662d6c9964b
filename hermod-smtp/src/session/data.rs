use chrono::Utc;
use hermod_common::{error::SessionError, incoming, internal};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Flow, Input, Reply, Session};
use crate::State;

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// `DATA`: reads the body up to a lone `.`, then hands the envelope to the spool.
    ///
    /// Body lines are stored verbatim. Exceeding the size limit, or failing to spool the
    /// message, ends the session.
    pub(super) async fn data(&mut self) -> Result<Flow, SessionError> {
        let limit = self.context.max_message_size;

        self.reply(Reply::start_input()).await?;

        self.envelope
            .push_line(format!("X-RecievedDate: {}", Utc::now().to_rfc2822()));
        self.envelope.push_line(format!(
            "Received: SMTP Server {} from client: {}",
            self.context.policy.primary_domain(),
            self.client_ip
        ));

        loop {
            let line = match self.next_line(None).await? {
                Input::Line(line) => line,
                Input::Closed | Input::Shutdown => {
                    internal!(
                        level = INFO,
                        "Connection closed during DATA, discarding message from {}",
                        self.envelope.sender()
                    );
                    return Ok(Flow::Close);
                }
            };

            if line == "." {
                break;
            }

            incoming!("{line}");
            self.envelope.push_line(line);

            let size = self.envelope.size();
            if limit > 0 && size > limit {
                internal!(
                    level = WARN,
                    "Message Rejected. Message larger than max allowed size ({limit} bytes)"
                );
                self.reply(Reply::too_large()).await?;
                return Err(SessionError::MessageTooLarge { size, limit });
            }
        }

        internal!(level = DEBUG, "Data Input Complete.");
        self.save().await
    }

    /// Spools the envelope and starts a fresh one.
    async fn save(&mut self) -> Result<Flow, SessionError> {
        let mut envelope = std::mem::take(&mut self.envelope);

        match self.context.spool.save(&mut envelope).await {
            Ok(id) => {
                self.reply(Reply::ok()).await?;
                internal!(level = INFO, "Message {id} accepted for delivery.");
                self.state = State::Rset;
                Ok(Flow::Continue)
            }
            Err(err) => {
                internal!(level = ERROR, "Unable to spool message: {err}");
                self.reply(Reply::save_failed()).await?;
                Err(SessionError::Spool(err.to_string()))
            }
        }
    }
}
