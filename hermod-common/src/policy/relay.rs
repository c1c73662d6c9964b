//! Relay approval lists.
//!
//! IP entries match either exactly or positionally with `*` wildcards (`10.0.*.*`). Email
//! entries match a sender exactly (ignoring case), or by domain suffix when they start with `@`.
//! The suffix is not anchored at a label boundary: `@example.com` also approves
//! `notexample.com`. Existing configurations rely on this.

use crate::{Address, internal};

#[derive(Debug, Clone, Default)]
pub struct RelayApproval {
    ips: Vec<String>,
    emails: Vec<String>,
}

impl RelayApproval {
    #[must_use]
    pub fn new(ips: &[String], emails: &[String]) -> Self {
        Self {
            ips: ips.iter().map(|ip| ip.trim().to_string()).collect(),
            emails: emails.iter().map(|email| email.trim().to_string()).collect(),
        }
    }

    /// Whether `client_ip` matches any approved IP entry.
    #[must_use]
    pub fn is_approved_ip(&self, client_ip: &str) -> bool {
        self.ips
            .iter()
            .any(|approved| ip_matches(client_ip, approved))
    }

    /// Whether `sender` matches any approved email entry.
    #[must_use]
    pub fn is_approved_sender(&self, sender: &Address) -> bool {
        self.emails
            .iter()
            .any(|approved| email_matches(sender, approved))
    }
}

/// Exact match, or a component-wise wildcard match.
///
/// A wildcard entry whose component count differs from the client's is malformed for that
/// client; it is logged and skipped.
pub(crate) fn ip_matches(client_ip: &str, approved: &str) -> bool {
    if client_ip == approved {
        return true;
    }

    if !approved.contains('*') {
        return false;
    }

    let client: Vec<&str> = client_ip.split('.').map(str::trim).collect();
    let pattern: Vec<&str> = approved.split('.').map(str::trim).collect();

    if client.len() != pattern.len() {
        internal!(
            level = WARN,
            "Invalid approved address found: {approved}. Skipping."
        );
        return false;
    }

    client
        .iter()
        .zip(&pattern)
        .all(|(octet, component)| *component == "*" || octet == component)
}

pub(crate) fn email_matches(sender: &Address, approved: &str) -> bool {
    if sender.full().eq_ignore_ascii_case(approved) {
        return true;
    }

    approved
        .strip_prefix('@')
        .is_some_and(|suffix| sender.domain().ends_with(&suffix.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_octets() {
        assert!(ip_matches("10.0.0.5", "10.0.0.*"));
        assert!(!ip_matches("10.0.0.5", "10.0.1.*"));
        assert!(ip_matches("10.9.0.5", "10.*.0.5"));
        assert!(ip_matches("192.168.1.1", "*.*.*.*"));
    }

    #[test]
    fn exact_match_without_wildcard() {
        assert!(ip_matches("127.0.0.1", "127.0.0.1"));
        assert!(!ip_matches("127.0.0.2", "127.0.0.1"));
    }

    #[test]
    fn mismatched_component_counts_are_skipped() {
        assert!(!ip_matches("10.0.0.5", "10.0.*"));
        assert!(!ip_matches("10.0.0.5", "10.0.0.5.*"));

        let relay = RelayApproval::new(&["10.*".to_string(), "10.0.0.*".to_string()], &[]);
        assert!(relay.is_approved_ip("10.0.0.7"));
    }

    #[test]
    fn email_exact_match_ignores_case() {
        let sender = Address::parse("Boss@Corp.example");
        assert!(email_matches(&sender, "boss@corp.example"));
        assert!(email_matches(&sender, "BOSS@CORP.EXAMPLE"));
        assert!(!email_matches(&sender, "intern@corp.example"));
    }

    #[test]
    fn email_domain_suffix_is_unanchored() {
        assert!(email_matches(&Address::parse("a@example.com"), "@example.com"));
        assert!(email_matches(&Address::parse("a@mail.example.com"), "@example.com"));
        assert!(email_matches(&Address::parse("a@notexample.com"), "@example.com"));
        assert!(!email_matches(&Address::parse("a@example.org"), "@example.com"));
    }

    #[test]
    fn entries_are_trimmed() {
        let relay = RelayApproval::new(&[" 10.0.0.1 ".to_string()], &[" @local.test".to_string()]);

        assert!(relay.is_approved_ip("10.0.0.1"));
        assert!(relay.is_approved_sender(&Address::parse("x@local.test")));
    }
}
