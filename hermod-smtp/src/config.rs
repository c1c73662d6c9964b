use std::net::SocketAddr;

use hermod_common::listener::{ListenerConfig, default_max_sessions};
use serde::Deserialize;

const fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

const fn default_poll_secs() -> u64 {
    10
}

const fn default_command_secs() -> u64 {
    300
}

/// Server-side timeouts for a session.
///
/// A session wakes every `poll_secs` while waiting for input to check for shutdown; once it
/// has been silent for `command_secs` it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SmtpServerTimeouts {
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
}

impl Default for SmtpServerTimeouts {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            command_secs: default_command_secs(),
        }
    }
}

/// One entry under `smtp.listeners`.
///
/// ```ron
/// (
///     socket: "[::]:2525",
///     max_message_size: 10485760,
///     max_sessions: 100,
///     timeouts: (poll_secs: 10, command_secs: 300),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpListenerConfig {
    pub socket: SocketAddr,
    /// In bytes, counting a CRLF per body line. `0` disables the limit.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub timeouts: SmtpServerTimeouts,
}

impl SmtpListenerConfig {
    #[must_use]
    pub const fn new(socket: SocketAddr) -> Self {
        Self {
            socket,
            max_message_size: default_max_message_size(),
            max_sessions: default_max_sessions(),
            timeouts: SmtpServerTimeouts {
                poll_secs: default_poll_secs(),
                command_secs: default_command_secs(),
            },
        }
    }

    #[must_use]
    pub const fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            socket: self.socket,
            max_sessions: self.max_sessions,
        }
    }
}

/// The `smtp` section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub listeners: Vec<SmtpListenerConfig>,
}
