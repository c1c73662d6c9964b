use std::fmt::{self, Display, Formatter};

use chrono::Utc;
use hermod_common::{Address, Envelope, internal};
use hermod_spool::{SpoolError, SpooledMessageId};
use hermod_tracing::traced;

use super::{DeliveryEngine, reconcile::Outcome};
use crate::{
    bounce,
    error::{DeliveryError, PermanentError},
    local,
};

/// Tally of one pass over the spool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Records listed at the start of the pass
    pub scanned: usize,
    /// Records not yet due
    pub skipped: usize,
    /// Records fully delivered and removed
    pub completed: usize,
    /// Records kept for another attempt
    pub rescheduled: usize,
    /// Records moved to the dead-letter area
    pub dead_lettered: usize,
    /// Records dropped after bouncing their remaining recipients
    pub exhausted: usize,
    /// Records that could not be read or updated
    pub errors: usize,
}

impl CycleReport {
    const fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Rescheduled { .. } => self.rescheduled += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Exhausted => self.exhausted += 1,
        }
    }
}

impl Display for CycleReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{} scanned, {} not due, {} completed, {} rescheduled, {} dead-lettered, {} exhausted, {} errors",
            self.scanned,
            self.skipped,
            self.completed,
            self.rescheduled,
            self.dead_lettered,
            self.exhausted,
            self.errors
        )
    }
}

impl DeliveryEngine {
    /// One pass over a snapshot of the spool.
    ///
    /// Records that are not yet due are left untouched. Errors with a single record are
    /// logged and counted; they never stop the pass.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let ids = match self.spool.list().await {
            Ok(ids) => ids,
            Err(err) => {
                internal!(level = ERROR, "Unable to list spool: {err}");
                report.errors += 1;
                return report;
            }
        };

        report.scanned = ids.len();
        let now = Utc::now();

        for id in ids {
            let envelope = match self.spool.read(&id).await {
                Ok(envelope) => envelope,
                Err(SpoolError::NotFound(_)) => {
                    internal!(level = DEBUG, "Message {id} left the spool before delivery");
                    continue;
                }
                Err(err) => {
                    internal!(level = ERROR, "Unable to read message {id}: {err}");
                    report.errors += 1;
                    continue;
                }
            };

            if !envelope.is_due(now) {
                internal!(
                    level = DEBUG,
                    "Skipping message {id}, next attempt scheduled for {}",
                    envelope.scheduled_delivery()
                );
                report.skipped += 1;
                continue;
            }

            match self.process(&id, envelope).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    internal!(level = ERROR, "Unable to finish processing message {id}: {err}");
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// Attempts every recipient of a due record, then reconciles the record with the results.
    async fn process(
        &self,
        id: &SpooledMessageId,
        envelope: Envelope,
    ) -> Result<Outcome, SpoolError> {
        let mut failed = Vec::new();

        for recipient in envelope.recipients() {
            internal!(
                level = DEBUG,
                "Attempting to deliver message {id} from {} to {recipient}",
                envelope.sender()
            );

            match self.deliver(recipient, &envelope).await {
                Ok(()) => {
                    internal!(level = INFO, "Delivery complete for message {id} to {recipient}");
                }
                Err(err) if err.is_permanent() && !envelope.is_bounce_suppressed() => {
                    internal!(level = INFO, "Delivery attempted to unknown user {recipient}: {err}");
                    if let Err(err) = self.bounce(&envelope, recipient).await {
                        internal!(
                            level = ERROR,
                            "Unable to bounce message {id} for {recipient}: {err}"
                        );
                        failed.push(recipient.clone());
                    }
                }
                Err(err) => {
                    internal!(
                        level = WARN,
                        "Delivery failed for message {id} from {} to {recipient}: {err}",
                        envelope.sender()
                    );
                    failed.push(recipient.clone());
                }
            }
        }

        self.reconcile(id, envelope, failed).await
    }

    /// Delivers one copy of the message to `recipient`, locally or through the transport.
    pub async fn deliver(
        &self,
        recipient: &Address,
        envelope: &Envelope,
    ) -> Result<(), DeliveryError> {
        if self.policy.is_local_address(recipient) {
            self.deliver_local(recipient, envelope).await
        } else {
            Ok(self.transport.send(recipient, envelope).await?)
        }
    }

    /// Writes the message into the mailbox of the local user owning `recipient`, or into the
    /// default mailbox if no user does.
    async fn deliver_local(
        &self,
        recipient: &Address,
        envelope: &Envelope,
    ) -> Result<(), DeliveryError> {
        let resolved = self.users.resolve(recipient).or_else(|| {
            let default = self.users.default_mailbox()?;
            internal!(
                level = DEBUG,
                "No local user {recipient}, trying default mailbox {default}"
            );
            self.users.resolve(default)
        });

        let Some(user) = resolved else {
            return Err(PermanentError::RecipientNotFound(recipient.full()).into());
        };

        local::write_message(user.mailbox(), recipient, envelope.body()).await?;
        Ok(())
    }

    /// Spools a failure notice for `recipient` back to the sender of `original`.
    pub async fn bounce(
        &self,
        original: &Envelope,
        recipient: &Address,
    ) -> Result<SpooledMessageId, SpoolError> {
        internal!(
            level = INFO,
            "Bouncing message from {} to {recipient}",
            original.sender()
        );

        let notice = bounce::notice(original, recipient, self.policy.primary_domain(), Utc::now());
        self.spool.write(&notice).await
    }
}
