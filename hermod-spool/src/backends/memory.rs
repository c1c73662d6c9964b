use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use hermod_common::Envelope;

use crate::{Result, SpoolError, store::BackingStore, types::SpooledMessageId};

/// In-memory backing store.
///
/// Intended for tests and throwaway development servers; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    active: Arc<RwLock<HashMap<SpooledMessageId, Envelope>>>,
    failed: Arc<RwLock<HashMap<SpooledMessageId, Envelope>>>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the active spool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All active envelopes, in identifier order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = active.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries
            .into_iter()
            .map(|(id, envelope)| located(envelope, id))
            .collect()
    }
}

fn located(envelope: &Envelope, id: &SpooledMessageId) -> Envelope {
    let mut envelope = envelope.clone();
    envelope.set_location(id.to_string());
    envelope
}

fn sorted_ids(map: &HashMap<SpooledMessageId, Envelope>) -> Vec<SpooledMessageId> {
    let mut ids: Vec<_> = map.keys().copied().collect();
    ids.sort();
    ids
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, envelope: &Envelope) -> Result<SpooledMessageId> {
        let id = SpooledMessageId::generate();
        self.active.write()?.insert(id, envelope.clone());
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<SpooledMessageId>> {
        Ok(sorted_ids(&*self.active.read()?))
    }

    async fn read(&self, id: &SpooledMessageId) -> Result<Envelope> {
        self.active
            .read()?
            .get(id)
            .map(|envelope| located(envelope, id))
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn update(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()> {
        let mut active = self.active.write()?;
        let entry = active.get_mut(id).ok_or(SpoolError::NotFound(*id))?;
        *entry = envelope.clone();
        Ok(())
    }

    async fn delete(&self, id: &SpooledMessageId) -> Result<()> {
        self.active
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn fail(&self, id: &SpooledMessageId, envelope: &Envelope) -> Result<()> {
        self.active
            .write()?
            .remove(id)
            .ok_or(SpoolError::NotFound(*id))?;
        self.failed.write()?.insert(*id, envelope.clone());
        Ok(())
    }

    async fn list_failed(&self) -> Result<Vec<SpooledMessageId>> {
        Ok(sorted_ids(&*self.failed.read()?))
    }

    async fn read_failed(&self, id: &SpooledMessageId) -> Result<Envelope> {
        self.failed
            .read()?
            .get(id)
            .map(|envelope| located(envelope, id))
            .ok_or(SpoolError::NotFound(*id))
    }
}
