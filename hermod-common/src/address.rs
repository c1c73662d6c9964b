use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A `user@domain` mailbox address.
///
/// Both halves are trimmed and lower-cased when assigned. An address with either half missing
/// is considered unset: [`Address::full`] renders it as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Parts")]
pub struct Address {
    username: String,
    domain: String,
}

#[derive(Deserialize)]
struct Parts {
    #[serde(default)]
    username: String,
    #[serde(default)]
    domain: String,
}

impl From<Parts> for Address {
    fn from(parts: Parts) -> Self {
        Self::new(&parts.username, &parts.domain)
    }
}

impl Address {
    #[must_use]
    pub fn new(username: &str, domain: &str) -> Self {
        Self {
            username: normalise(username),
            domain: normalise(domain),
        }
    }

    /// Parses `user@domain` without failing.
    ///
    /// Input containing anything other than exactly one `@` yields an unset address, so callers
    /// must check [`Address::is_empty`] instead of expecting an error.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut parts = input.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(username), Some(domain), None) => Self::new(username, domain),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `username@domain`, or an empty string when either half is missing.
    #[must_use]
    pub fn full(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("{}@{}", self.username, self.domain)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.domain.is_empty()
    }
}

fn normalise(part: &str) -> String {
    part.trim().to_lowercase()
}

impl FromStr for Address {
    type Err = AddressError;

    /// Strict counterpart to [`Address::parse`], used for configuration values.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let address = Self::parse(input);
        if address.is_empty() {
            Err(AddressError::Invalid(input.to_string()))
        } else {
            Ok(address)
        }
    }
}

impl Display for Address {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            fmt.write_str("<>")
        } else {
            write!(fmt, "{}@{}", self.username, self.domain)
        }
    }
}
