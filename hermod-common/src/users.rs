//! Local user resolution.
//!
//! A [`UserDirectory`] answers "who receives mail sent to this local address, and where does
//! it go". [`StaticUserDirectory`] is the configuration-backed implementation.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use serde::Deserialize;

use crate::{Address, error::ConfigError};

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    address: Address,
    forward: Vec<Address>,
    mailbox: PathBuf,
}

impl User {
    #[must_use]
    pub const fn new(address: Address, forward: Vec<Address>, mailbox: PathBuf) -> Self {
        Self {
            address,
            forward,
            mailbox,
        }
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Where mail for this user should actually go: its forward addresses if it has any,
    /// otherwise itself.
    #[must_use]
    pub fn delivery_addresses(&self) -> Vec<Address> {
        if self.forward.is_empty() {
            vec![self.address.clone()]
        } else {
            self.forward.clone()
        }
    }

    /// Directory that local deliveries for this user are written into.
    #[must_use]
    pub fn mailbox(&self) -> &Path {
        &self.mailbox
    }
}

pub trait UserDirectory: Debug + Send + Sync {
    /// Looks up the local user owning `address`.
    fn resolve(&self, address: &Address) -> Option<User>;

    /// The catch-all mailbox for local addresses that do not resolve, if one is enabled.
    fn default_mailbox(&self) -> Option<&Address>;
}

fn default_mailbox_root() -> PathBuf {
    PathBuf::from("/var/mail/hermod")
}

/// One account under `users.accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub address: String,
    #[serde(default)]
    pub forward: Vec<String>,
    /// Overrides `<mailbox_root>/<address>`
    #[serde(default)]
    pub mailbox: Option<PathBuf>,
}

/// The `users` section of the configuration file.
///
/// ```ron
/// users: (
///     mailbox_root: "/var/mail/hermod",
///     default_mailbox: Some("postmaster@local.test"),
///     accounts: [
///         (address: "postmaster@local.test"),
///         (address: "sales@local.test", forward: ["alice@local.test", "bob@local.test"]),
///     ],
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct UsersConfig {
    #[serde(default = "default_mailbox_root")]
    pub mailbox_root: PathBuf,
    #[serde(default)]
    pub default_mailbox: Option<String>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            mailbox_root: default_mailbox_root(),
            default_mailbox: None,
            accounts: Vec::default(),
        }
    }
}

/// A fixed set of accounts loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: AHashMap<String, User>,
    default_mailbox: Option<Address>,
}

impl StaticUserDirectory {
    /// # Errors
    ///
    /// Fails if any configured address is not a valid `user@domain`.
    pub fn new(config: &UsersConfig) -> Result<Self, ConfigError> {
        let parse = |field, value: &str| {
            value
                .parse::<Address>()
                .map_err(|source| ConfigError::Address { field, source })
        };

        let mut users = AHashMap::with_capacity(config.accounts.len());
        for account in &config.accounts {
            let address = parse("users.accounts.address", account.address.as_str())?;
            let forward = account
                .forward
                .iter()
                .map(|forward| parse("users.accounts.forward", forward.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            let mailbox = account
                .mailbox
                .clone()
                .unwrap_or_else(|| config.mailbox_root.join(address.full()));

            users.insert(address.full(), User::new(address, forward, mailbox));
        }

        let default_mailbox = config
            .default_mailbox
            .as_deref()
            .map(|mailbox| parse("users.default_mailbox", mailbox))
            .transpose()?;

        Ok(Self {
            users,
            default_mailbox,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for StaticUserDirectory {
    fn resolve(&self, address: &Address) -> Option<User> {
        self.users.get(&address.full()).cloned()
    }

    fn default_mailbox(&self) -> Option<&Address> {
        self.default_mailbox.as_ref()
    }
}
