use async_trait::async_trait;
use hermod_common::Envelope;

use crate::{Result, SpooledMessageId};

/// Durable storage for envelopes awaiting delivery.
///
/// A record is either in the active spool or gone; [`BackingStore::fail`] moves it to a
/// separate dead-letter area that the delivery engine never scans.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persists a new record and returns its identifier.
    async fn write(&self, envelope: &Envelope) -> Result<SpooledMessageId>;

    /// Snapshot of the identifiers currently in the active spool.
    async fn list(&self) -> Result<Vec<SpooledMessageId>>;

    /// Loads a record. The returned envelope carries `id` as its location.
    async fn read(&self, id: &SpooledMessageId) -> Result<Envelope>;

    /// Overwrites an existing record in place.
    async fn update(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()>;

    /// Removes a record from the active spool.
    async fn delete(&self, id: &SpooledMessageId) -> Result<()>;

    /// Moves a record, with the given contents, out of the active spool into the dead-letter
    /// area.
    async fn fail(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()>;

    /// Identifiers in the dead-letter area.
    async fn list_failed(&self) -> Result<Vec<SpooledMessageId>>;

    /// Loads a record from the dead-letter area.
    async fn read_failed(&self, id: &SpooledMessageId) -> Result<Envelope>;

    /// Writes the envelope to its existing location, or to a new record on first save, in
    /// which case the new location is recorded on the envelope.
    async fn save(&self, envelope: &mut Envelope) -> Result<SpooledMessageId> {
        if let Some(id) = envelope.location().and_then(SpooledMessageId::parse) {
            self.update(&id, envelope).await?;
            return Ok(id);
        }

        let id = self.write(envelope).await?;
        envelope.set_location(id.to_string());
        Ok(id)
    }
}
