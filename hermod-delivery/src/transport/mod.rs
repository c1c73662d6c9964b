//! Handing messages for non-local recipients to other servers.

mod smtp;

use std::fmt::Debug;

use async_trait::async_trait;
use hermod_common::{Address, Envelope};
use serde::Deserialize;

pub use self::smtp::SmtpTransport;
use crate::{dns::DnsConfig, error::TransportError};

/// Sends one copy of a message to one remote recipient.
#[async_trait]
pub trait RemoteTransport: Send + Sync + Debug {
    /// # Errors
    ///
    /// [`TransportError::RecipientNotFound`] when the receiving server refuses the recipient,
    /// [`TransportError::Failed`] for everything else.
    async fn send(&self, recipient: &Address, envelope: &Envelope) -> Result<(), TransportError>;
}

const fn default_port() -> u16 {
    25
}

const fn default_connect_timeout_secs() -> u64 {
    30
}

const fn default_command_timeout_secs() -> u64 {
    300
}

/// The `delivery.transport` section of the configuration file.
///
/// ```ron
/// transport: (
///     relay_host: Some("smarthost.example.net:587"),
///     helo_name: Some("mail.local.test"),
///     connect_timeout_secs: 30,
///     command_timeout_secs: 300,
///     dns: (timeout_secs: 5),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Send everything through this `host:port` instead of looking up MX records
    #[serde(default)]
    pub relay_host: Option<String>,

    /// Name announced in `HELO`. Defaults to the primary local domain.
    #[serde(default)]
    pub helo_name: Option<String>,

    /// Port used for servers found through DNS
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Limit on each command/reply exchange
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default)]
    pub dns: DnsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_host: None,
            helo_name: None,
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            dns: DnsConfig::default(),
        }
    }
}
