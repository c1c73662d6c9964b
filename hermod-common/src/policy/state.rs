use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::{Address, internal};

/// IPs that recently authenticated on the retrieval side (POP-before-SMTP).
///
/// Entries expire lazily: an expired entry is only removed when it is looked up.
#[derive(Debug, Default)]
pub struct AuthenticatedIps {
    entries: Mutex<AHashMap<String, Instant>>,
}

impl AuthenticatedIps {
    pub fn record(&self, ip: &str) {
        self.record_at(ip, Instant::now());
    }

    pub(crate) fn record_at(&self, ip: &str, at: Instant) {
        internal!(level = DEBUG, "Adding authenticated IP address: {ip}");
        self.entries.lock().insert(ip.to_string(), at);
    }

    /// Whether `ip` authenticated less than `timeout` ago. Evicts the entry if it has expired.
    pub fn is_authenticated(&self, ip: &str, timeout: Duration) -> bool {
        let mut entries = self.entries.lock();

        match entries.get(ip) {
            Some(at) if at.checked_add(timeout).is_some_and(|until| until > Instant::now()) => {
                true
            }
            Some(_) => {
                entries.remove(ip);
                false
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Advisory exclusive-access markers for mailboxes, keyed by full address.
///
/// Nothing blocks on these; callers poll or refuse.
#[derive(Debug, Default)]
pub struct MailboxLocks {
    locked: Mutex<AHashSet<String>>,
}

impl MailboxLocks {
    /// Marks the mailbox as locked. Returns `false` if it was already locked.
    pub fn lock(&self, mailbox: &Address) -> bool {
        internal!(level = DEBUG, "Locking Mailbox: {mailbox}");
        self.locked.lock().insert(mailbox.full())
    }

    pub fn unlock(&self, mailbox: &Address) {
        internal!(level = DEBUG, "Unlocking Mailbox: {mailbox}");
        self.locked.lock().remove(&mailbox.full());
    }

    #[must_use]
    pub fn is_locked(&self, mailbox: &Address) -> bool {
        self.locked.lock().contains(&mailbox.full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_entries_are_authenticated() {
        let ips = AuthenticatedIps::default();
        ips.record("10.0.0.1");

        assert!(ips.is_authenticated("10.0.0.1", Duration::from_secs(60)));
        assert!(!ips.is_authenticated("10.0.0.2", Duration::from_secs(60)));
        assert_eq!(ips.len(), 1);
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let ips = AuthenticatedIps::default();
        ips.record("10.0.0.1");
        ips.record("10.0.0.2");

        assert_eq!(ips.len(), 2);
        assert!(!ips.is_authenticated("10.0.0.1", Duration::ZERO));
        assert_eq!(ips.len(), 1, "only the checked entry is evicted");
        assert!(ips.is_authenticated("10.0.0.2", Duration::from_secs(60)));
    }

    #[test]
    fn mailbox_locks_are_exclusive() {
        let locks = MailboxLocks::default();
        let mailbox = Address::parse("bob@local.test");

        assert!(!locks.is_locked(&mailbox));
        assert!(locks.lock(&mailbox));
        assert!(!locks.lock(&Address::parse("BOB@local.test")));
        assert!(locks.is_locked(&mailbox));

        locks.unlock(&mailbox);
        assert!(!locks.is_locked(&mailbox));
    }
}
