use chrono::{DateTime, Utc};
use hermod_common::{Address, Envelope, internal};
use hermod_spool::{SpoolError, SpooledMessageId};

use super::DeliveryEngine;
use crate::retry;

/// What happened to a record at the end of its delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to deliver; the record was removed.
    Completed,
    /// Failed recipients kept for another attempt at `next`.
    Rescheduled { attempts: u32, next: DateTime<Utc> },
    /// The sender must not receive bounces; the record was moved to the dead-letter area.
    DeadLettered,
    /// Out of attempts; every remaining recipient was bounced and the record removed.
    Exhausted,
}

impl DeliveryEngine {
    /// Settles a record once every recipient has been tried. `failed` holds the recipients
    /// still owed a copy.
    pub(super) async fn reconcile(
        &self,
        id: &SpooledMessageId,
        mut envelope: Envelope,
        failed: Vec<Address>,
    ) -> Result<Outcome, SpoolError> {
        if failed.is_empty() {
            self.spool.delete(id).await?;
            internal!(level = DEBUG, "Message {id} delivered to every recipient");
            return Ok(Outcome::Completed);
        }

        *envelope.recipients_mut() = failed;

        if envelope.is_bounce_suppressed() {
            internal!(
                level = WARN,
                "Delivery of message {id} from {} failed, moving to dead-letter area",
                envelope.sender()
            );
            self.spool.fail(id, &envelope).await?;
            return Ok(Outcome::DeadLettered);
        }

        let attempts = envelope.delivery_attempts();
        if attempts < self.max_attempts {
            let next = retry::next_attempt_at(Utc::now(), attempts);
            let attempts = attempts.saturating_add(1);

            envelope.set_delivery_attempts(attempts);
            envelope.schedule(next);
            self.spool.update(id, &envelope).await?;

            internal!(
                level = INFO,
                "Message {id} has {} undelivered recipients, attempt {attempts} scheduled for {next}",
                envelope.recipients().len()
            );
            return Ok(Outcome::Rescheduled { attempts, next });
        }

        internal!(
            level = WARN,
            "Message {id} still undeliverable after {attempts} attempts, giving up"
        );
        for recipient in envelope.recipients() {
            if let Err(err) = self.bounce(&envelope, recipient).await {
                internal!(
                    level = ERROR,
                    "Problem bouncing message {id} for {recipient}: {err}"
                );
            }
        }

        self.spool.delete(id).await?;
        Ok(Outcome::Exhausted)
    }
}
