//! Delivery authorisation: which recipients a session may accept, and the small amount of
//! process-wide state shared with the retrieval side.

mod relay;
mod state;

use std::time::Duration;

use serde::Deserialize;

pub use self::{
    relay::RelayApproval,
    state::{AuthenticatedIps, MailboxLocks},
};
use crate::{Address, error::ConfigError};

const fn default_pop_before_smtp_timeout_secs() -> u64 {
    600
}

/// Authorisation settings, as found under `policy` in the configuration file.
///
/// ```ron
/// policy: (
///     local_domains: ["local.test"],
///     relay_approved_ips: ["10.0.0.*"],
///     relay_approved_emails: ["@partner.example"],
///     pop_before_smtp: true,
///     pop_before_smtp_timeout_secs: 600,
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Domains hosted here. The first one is the primary domain.
    pub local_domains: Vec<String>,
    #[serde(default)]
    pub relay_approved_ips: Vec<String>,
    #[serde(default)]
    pub relay_approved_emails: Vec<String>,
    #[serde(default)]
    pub pop_before_smtp: bool,
    #[serde(default = "default_pop_before_smtp_timeout_secs")]
    pub pop_before_smtp_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            local_domains: Vec::default(),
            relay_approved_ips: Vec::default(),
            relay_approved_emails: Vec::default(),
            pop_before_smtp: false,
            pop_before_smtp_timeout_secs: default_pop_before_smtp_timeout_secs(),
        }
    }
}

/// The delivery authorisation policy.
///
/// Decisions are pure functions of the configuration, apart from the authenticated-IP table,
/// whose expired entries are evicted as a side effect of being checked.
#[derive(Debug)]
pub struct Policy {
    local_domains: Vec<String>,
    relay: RelayApproval,
    pop_before_smtp: Option<Duration>,
    authenticated: AuthenticatedIps,
    mailboxes: MailboxLocks,
}

impl Policy {
    /// Builds the policy from its configuration.
    ///
    /// # Errors
    ///
    /// Fails when no local domain is configured, since bounces need a primary domain.
    pub fn new(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let local_domains: Vec<String> = config
            .local_domains
            .iter()
            .map(|domain| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        if local_domains.is_empty() {
            return Err(ConfigError::NoLocalDomains);
        }

        Ok(Self {
            local_domains,
            relay: RelayApproval::new(&config.relay_approved_ips, &config.relay_approved_emails),
            pop_before_smtp: config
                .pop_before_smtp
                .then(|| Duration::from_secs(config.pop_before_smtp_timeout_secs)),
            authenticated: AuthenticatedIps::default(),
            mailboxes: MailboxLocks::default(),
        })
    }

    /// The first configured local domain, used to name this server in trace headers and bounces.
    #[must_use]
    pub fn primary_domain(&self) -> &str {
        // `new` guarantees at least one domain
        self.local_domains.first().map_or("localhost", String::as_str)
    }

    #[must_use]
    pub fn local_domains(&self) -> &[String] {
        &self.local_domains
    }

    /// Whether the address's domain is hosted here.
    #[must_use]
    pub fn is_local_address(&self, address: &Address) -> bool {
        self.local_domains
            .iter()
            .any(|domain| domain == address.domain())
    }

    /// Whether a session from `client_ip`, sending as `sender`, may hand us mail for `address`.
    #[must_use]
    pub fn accept_address(&self, address: &Address, client_ip: &str, sender: &Address) -> bool {
        self.is_local_address(address)
            || self.pop_before_smtp.is_some_and(|timeout| {
                self.authenticated.is_authenticated(client_ip, timeout)
            })
            || self.relay.is_approved_ip(client_ip)
            || self.relay.is_approved_sender(sender)
    }

    /// Records that `ip` has just authenticated on the retrieval side.
    pub fn ip_authenticated(&self, ip: &str) {
        self.authenticated.record(ip);
    }

    /// Marks the mailbox as locked. Returns `false` if somebody else already holds it.
    pub fn lock_mailbox(&self, mailbox: &Address) -> bool {
        self.mailboxes.lock(mailbox)
    }

    pub fn unlock_mailbox(&self, mailbox: &Address) {
        self.mailboxes.unlock(mailbox);
    }

    #[must_use]
    pub fn is_mailbox_locked(&self, mailbox: &Address) -> bool {
        self.mailboxes.is_locked(mailbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(configure: impl FnOnce(&mut PolicyConfig)) -> Policy {
        let mut config = PolicyConfig {
            local_domains: vec!["Local.Test".to_string(), "other.test".to_string()],
            ..PolicyConfig::default()
        };
        configure(&mut config);
        Policy::new(&config).expect("valid policy")
    }

    #[test]
    fn requires_a_local_domain() {
        let err = Policy::new(&PolicyConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoLocalDomains));
    }

    #[test]
    fn local_addresses() {
        let policy = policy(|_| ());

        assert_eq!(policy.primary_domain(), "local.test");
        assert!(policy.is_local_address(&Address::parse("bob@LOCAL.test")));
        assert!(policy.is_local_address(&Address::parse("bob@other.test")));
        assert!(!policy.is_local_address(&Address::parse("bob@remote.test")));
    }

    #[test]
    fn local_recipients_are_always_accepted() {
        let policy = policy(|_| ());
        let sender = Address::parse("stranger@remote.test");

        assert!(policy.accept_address(&Address::parse("x@local.test"), "192.0.2.1", &sender));
        assert!(!policy.accept_address(&Address::parse("x@remote.test"), "192.0.2.1", &sender));
    }

    #[test]
    fn relay_by_ip_or_sender() {
        let policy = policy(|config| {
            config.relay_approved_ips = vec!["10.0.0.*".to_string()];
            config.relay_approved_emails = vec!["@partner.example".to_string()];
        });
        let remote = Address::parse("x@remote.test");

        assert!(policy.accept_address(&remote, "10.0.0.5", &Address::default()));
        assert!(!policy.accept_address(&remote, "10.0.1.5", &Address::default()));
        assert!(policy.accept_address(&remote, "10.0.1.5", &Address::parse("a@partner.example")));
    }

    #[test]
    fn pop_before_smtp_only_when_enabled() {
        let disabled = policy(|_| ());
        disabled.ip_authenticated("198.51.100.7");
        let remote = Address::parse("x@remote.test");

        assert!(!disabled.accept_address(&remote, "198.51.100.7", &Address::default()));

        let enabled = policy(|config| config.pop_before_smtp = true);
        assert!(!enabled.accept_address(&remote, "198.51.100.7", &Address::default()));
        enabled.ip_authenticated("198.51.100.7");
        assert!(enabled.accept_address(&remote, "198.51.100.7", &Address::default()));
    }

    #[test]
    fn expired_authentication_is_evicted_when_checked() {
        let policy = policy(|config| {
            config.pop_before_smtp = true;
            config.pop_before_smtp_timeout_secs = 0;
        });
        policy.ip_authenticated("198.51.100.7");

        assert!(!policy.accept_address(
            &Address::parse("x@remote.test"),
            "198.51.100.7",
            &Address::default()
        ));
        assert!(policy.authenticated.is_empty());
    }

    #[test]
    fn mailbox_locks_are_advisory() {
        let policy = policy(|_| ());
        let mailbox = Address::parse("bob@local.test");

        assert!(policy.lock_mailbox(&mailbox));
        assert!(policy.is_mailbox_locked(&mailbox));
        assert!(!policy.lock_mailbox(&mailbox), "already held");

        policy.unlock_mailbox(&mailbox);
        assert!(!policy.is_mailbox_locked(&mailbox));
    }

    #[test]
    fn config_from_ron() {
        let config: PolicyConfig = ron::from_str(
            r#"(local_domains: ["local.test"], relay_approved_ips: ["127.0.0.1"])"#,
        )
        .expect("valid config");

        assert_eq!(config.pop_before_smtp_timeout_secs, 600);
        assert!(!config.pop_before_smtp);
        assert!(config.relay_approved_emails.is_empty());
    }
}
