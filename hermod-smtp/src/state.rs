use core::fmt::{self, Display, Formatter};

/// Where a session is in the mail transaction.
///
/// `Rset` is the state after an explicit `RSET` or a completed `DATA`; it behaves like `None`
/// but is kept distinct so the transcript of a session can be followed in the logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    #[default]
    None,
    Helo,
    MailFrom,
    RcptTo,
    Rset,
}

impl State {
    /// `MAIL FROM:` starts a transaction, so it is only allowed outside of one.
    #[must_use]
    pub const fn allows_mail_from(self) -> bool {
        matches!(self, Self::None | Self::Helo | Self::Rset)
    }

    #[must_use]
    pub const fn allows_rcpt_to(self) -> bool {
        matches!(self, Self::MailFrom | Self::RcptTo)
    }

    /// `DATA` additionally needs at least one accepted recipient, which the session checks.
    #[must_use]
    pub const fn allows_data(self) -> bool {
        matches!(self, Self::RcptTo)
    }
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::None => "None",
            Self::Helo => "Helo",
            Self::MailFrom => "MailFrom",
            Self::RcptTo => "RcptTo",
            Self::Rset => "Rset",
        })
    }
}
