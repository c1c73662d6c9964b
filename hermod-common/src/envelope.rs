use chrono::{DateTime, Utc};

use crate::{Address, MAILER_DAEMON};

/// One mail transaction: who it is from, who it is for, and its body.
///
/// Body lines are stored raw and unfolded; the envelope never interprets them. The retry
/// metadata (`delivery_attempts`, `scheduled_delivery`) is only advanced by the delivery
/// engine once the envelope has been spooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: Address,
    recipients: Vec<Address>,
    body: Vec<String>,
    /// Running byte count of `body`, counting a CRLF per line
    size: usize,
    delivery_attempts: u32,
    scheduled_delivery: DateTime<Utc>,
    location: Option<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            sender: Address::default(),
            recipients: Vec::default(),
            body: Vec::default(),
            size: 0,
            delivery_attempts: 0,
            scheduled_delivery: Utc::now(),
            location: None,
        }
    }
}

impl Envelope {
    #[must_use]
    pub fn new(sender: Address, recipients: Vec<Address>, body: Vec<String>) -> Self {
        let mut envelope = Self {
            sender,
            recipients,
            ..Self::default()
        };
        envelope.set_body(body);
        envelope
    }

    #[must_use]
    pub const fn sender(&self) -> &Address {
        &self.sender
    }

    pub const fn sender_mut(&mut self) -> &mut Address {
        &mut self.sender
    }

    /// Whether the sender is the bounce sentinel, or unset.
    ///
    /// Failures for such envelopes never produce a bounce; there is nobody to send it to, or
    /// the envelope is itself a bounce.
    #[must_use]
    pub fn is_bounce_suppressed(&self) -> bool {
        self.sender.is_empty() || self.sender.username().eq_ignore_ascii_case(MAILER_DAEMON)
    }

    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub const fn recipients_mut(&mut self) -> &mut Vec<Address> {
        &mut self.recipients
    }

    pub fn add_recipient(&mut self, recipient: Address) {
        self.recipients.push(recipient);
    }

    #[must_use]
    pub fn body(&self) -> &[String] {
        &self.body
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.size = self.size.saturating_add(line.len() + 2);
        self.body.push(line);
    }

    pub fn set_body(&mut self, body: Vec<String>) {
        self.size = body.iter().map(|line| line.len() + 2).sum();
        self.body = body;
    }

    /// Size of the body in bytes, as it would be written with CRLF line endings.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn delivery_attempts(&self) -> u32 {
        self.delivery_attempts
    }

    pub const fn set_delivery_attempts(&mut self, attempts: u32) {
        self.delivery_attempts = attempts;
    }

    #[must_use]
    pub const fn scheduled_delivery(&self) -> DateTime<Utc> {
        self.scheduled_delivery
    }

    pub const fn schedule(&mut self, at: DateTime<Utc>) {
        self.scheduled_delivery = at;
    }

    /// Whether delivery may be attempted at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_delivery <= now
    }

    /// Identifier of the persisted record, assigned by the spool on first save.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = Some(location.into());
    }
}
