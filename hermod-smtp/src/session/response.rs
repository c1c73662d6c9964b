use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

use hermod_common::status::Status;

/// A single-line reply: `<code> <text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub text: Cow<'static, str>,
}

impl Reply {
    #[must_use]
    pub const fn new(status: Status, text: &'static str) -> Self {
        Self {
            status,
            text: Cow::Borrowed(text),
        }
    }

    #[must_use]
    pub const fn greeting() -> Self {
        Self::new(Status::ServiceReady, "Welcome to SMTP Server.")
    }

    #[must_use]
    pub const fn sign_off() -> Self {
        Self::new(Status::GoodBye, "SMTP server signing off.")
    }

    #[must_use]
    pub const fn ok() -> Self {
        Self::new(Status::Ok, "OK")
    }

    #[must_use]
    pub fn hello(argument: &str) -> Self {
        Self {
            status: Status::Ok,
            text: Cow::Owned(format!("Hello {argument}")),
        }
    }

    #[must_use]
    pub const fn out_of_sequence() -> Self {
        Self::new(Status::InvalidCommandSequence, "Command not allowed here.")
    }

    #[must_use]
    pub const fn no_such_user() -> Self {
        Self::new(Status::MailboxUnavailable, "User does not exist.")
    }

    #[must_use]
    pub const fn invalid_address() -> Self {
        Self::new(Status::ActionUnavailable, "Address is invalid.")
    }

    #[must_use]
    pub const fn start_input() -> Self {
        Self::new(
            Status::StartMailInput,
            "Start mail input; end with <CRLF>.<CRLF>",
        )
    }

    #[must_use]
    pub const fn save_failed() -> Self {
        Self::new(Status::CommandUnrecognized, "Error handling message.")
    }

    #[must_use]
    pub fn unrecognised(command: &str) -> Self {
        Self {
            status: Status::CommandUnrecognized,
            text: Cow::Owned(format!("Command Unrecognized: {command}")),
        }
    }

    #[must_use]
    pub const fn too_large() -> Self {
        Self::new(
            Status::ExceededStorage,
            "Message size exceeds fixed maximum message size.",
        )
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.status, self.text)
    }
}
