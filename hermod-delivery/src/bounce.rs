//! Delivery failure notices sent back to the original sender.

use chrono::{DateTime, Utc};
use hermod_common::{Address, Envelope, MAILER_DAEMON};

/// Separates the explanation from the copy of the original message.
const SEPARATOR: &str = "------------------";

/// Builds the notice telling `original`'s sender that `recipient` will never get the message.
///
/// The notice comes from `MAILER_DAEMON@<primary_domain>`, so a failure to deliver the notice
/// itself is never bounced again.
#[must_use]
pub fn notice(
    original: &Envelope,
    recipient: &Address,
    primary_domain: &str,
    now: DateTime<Utc>,
) -> Envelope {
    let sender = original.sender();
    let mut body = Vec::with_capacity(original.body().len() + 10);

    body.push(format!(
        "From: Mail Delivery Subsystem <MAILER-DAEMON@{primary_domain}>"
    ));
    body.push(format!("To: {}", sender.full()));
    body.push("Subject: Message Delivery Error.".to_string());
    body.push(format!("Date: {}", now.to_rfc2822()));
    body.push(String::new());
    body.push(format!("Error delivering message to: {}", recipient.full()));
    body.push("This message will not be delivered.".to_string());
    body.push(String::new());
    body.push(SEPARATOR.to_string());
    body.extend(original.body().iter().cloned());
    body.push(String::new());

    Envelope::new(
        Address::new(MAILER_DAEMON, primary_domain),
        vec![sender.clone()],
        body,
    )
}
