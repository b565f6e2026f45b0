//! In-memory store for tests and single-process deployments.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use lifecycle::{
    DrawId, ExternalId, RecordStore, RecordVersion, ScheduledEntity, SignupInsert, SignupRecord,
    SignupStore, StoreError, Versioned, WritePrecondition,
};

use crate::state::StoreState;

/// A [`RecordStore`] and [`SignupStore`] held in process memory.
///
/// Cloning shares the underlying state. Contents are lost on restart; use
/// [`crate::FileStore`] when reconciliation state must survive one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled records currently held.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .record_count()
    }

    /// Returns `true` if no scheduled records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Versioned<ScheduledEntity>>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.get(external_id))
    }

    async fn put(
        &self,
        entity: ScheduledEntity,
        precondition: WritePrecondition,
    ) -> Result<RecordVersion, StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.put(entity, precondition)
    }

    async fn delete(
        &self,
        external_id: &ExternalId,
        expected: RecordVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.delete(external_id, expected)
    }

    async fn list(&self) -> Result<Vec<Versioned<ScheduledEntity>>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.all())
    }
}

#[async_trait]
impl SignupStore for MemoryStore {
    async fn fetch_signups(&self, draw_id: &DrawId) -> Result<Vec<SignupRecord>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.signups_for(draw_id))
    }

    async fn insert_signup(&self, signup: SignupRecord) -> Result<SignupInsert, StoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(state.insert_signup(signup))
    }
}
