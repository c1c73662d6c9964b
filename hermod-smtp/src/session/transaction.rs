use hermod_common::{Address, internal};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Reply, Session};
use crate::{State, command::parse_address};

/// Stand-in for an empty reverse-path.
const UNKNOWN_SENDER: &str = "unknown@example.com";

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// `MAIL FROM:`. An empty address is legal and replaced by [`UNKNOWN_SENDER`]; an
    /// unparsable one leaves the state untouched.
    pub(super) fn mail_from(&mut self, argument: &str) -> Reply {
        let from = parse_address(argument);

        let sender = if from.trim().is_empty() {
            internal!(level = DEBUG, "MAIL FROM is empty, using {UNKNOWN_SENDER}");
            Address::parse(UNKNOWN_SENDER)
        } else {
            let address = Address::parse(from);
            if address.is_empty() {
                internal!(level = DEBUG, "Unable to parse From Address: {from}");
                return Reply::invalid_address();
            }
            address
        };

        internal!(level = DEBUG, "MAIL FROM: {sender}");
        *self.envelope.sender_mut() = sender;
        self.state = State::MailFrom;
        Reply::ok()
    }

    /// `RCPT TO:`. The policy decides; accepted local users are expanded to their delivery
    /// addresses. The state moves on whether or not the recipient was accepted.
    pub(super) fn rcpt_to(&mut self, argument: &str) -> Reply {
        self.state = State::RcptTo;

        let to = parse_address(argument);
        let address = Address::parse(to);

        if address.is_empty()
            || !self.context.policy.accept_address(
                &address,
                &self.client_ip,
                self.envelope.sender(),
            )
        {
            internal!(
                level = INFO,
                "Invalid delivery address for incoming mail: {to} from client: {} / {}",
                self.client_ip,
                self.envelope.sender()
            );
            return Reply::no_such_user();
        }

        match self.context.users.resolve(&address) {
            Some(user) => {
                for delivery in user.delivery_addresses() {
                    self.envelope.add_recipient(delivery);
                }
            }
            None => self.envelope.add_recipient(address.clone()),
        }

        internal!(level = DEBUG, "RCPT TO: {address} accepted.");
        Reply::ok()
    }
}
