use core::fmt::{self, Display, Formatter};

/// One client command line, after trimming.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    /// Carries everything after the first space, verbatim.
    Helo(String),
    /// The raw text after `MAIL FROM:`; see [`parse_address`].
    MailFrom(String),
    /// The raw text after `RCPT TO:`; see [`parse_address`].
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    /// Anything else. Holds the upper-cased command token.
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(argument) => write!(fmt, "HELO {argument}"),
            Self::MailFrom(argument) => write!(fmt, "MAIL FROM:{argument}"),
            Self::RcptTo(argument) => write!(fmt, "RCPT TO:{argument}"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Invalid(token) => fmt.write_str(token),
        }
    }
}

const MAIL_FROM: &str = "MAIL FROM:";
const RCPT_TO: &str = "RCPT TO:";

impl From<&str> for Command {
    /// The command token is the text before the first space, upper-cased. `MAIL` and `RCPT`
    /// additionally require the two-word prefix, since the verb and preposition are adjacent.
    fn from(line: &str) -> Self {
        let line = line.trim();
        let (token, argument) = line.split_once(' ').unwrap_or((line, ""));
        let token = token.to_ascii_uppercase();

        let prefixed = |prefix: &str| {
            line.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        };

        match token.as_str() {
            "HELO" => Self::Helo(argument.to_string()),
            "NOOP" => Self::Noop,
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            "DATA" => Self::Data,
            "MAIL" if prefixed(MAIL_FROM) => Self::MailFrom(line[MAIL_FROM.len()..].to_string()),
            "RCPT" if prefixed(RCPT_TO) => Self::RcptTo(line[RCPT_TO.len()..].to_string()),
            _ => Self::Invalid(token),
        }
    }
}

/// Strips an angle-bracket address literal: everything up to and including the first `<`,
/// and everything from the first `>` onwards.
#[must_use]
pub fn parse_address(argument: &str) -> &str {
    let argument = argument
        .split_once('<')
        .map_or(argument, |(_, rest)| rest);
    argument
        .split_once('>')
        .map_or(argument, |(address, _)| address)
}
