//! Local mutation API.

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::traits::RecordStore;
use std::sync::Arc;
use tally_protocol::{RecordId, SyncableRecord};
use tracing::trace;

/// Notified after every successful local write.
///
/// The auto-sync runner implements this to debounce a sync after edits.
pub trait MutationListener: Send + Sync {
    /// Called once the write is visible in the store.
    fn on_local_mutation(&self, id: &RecordId);
}

/// Stamps and stores edits made on this device.
///
/// All local creates, updates and deletes go through a writer so that each
/// write gets a fresh, strictly increasing `updated_at` from the clock.
pub struct LocalWriter<S, C> {
    store: Arc<S>,
    clock: C,
    listener: Option<Arc<dyn MutationListener>>,
}

impl<S: RecordStore, C: Clock> LocalWriter<S, C> {
    /// Creates a writer over `store` stamping with `clock`.
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            listener: None,
        }
    }

    /// Registers a listener for completed writes.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn MutationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates or updates a record. Returns the stored version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for malformed records, or any error of
    /// the underlying store.
    pub fn write(&self, record: S::Record) -> StoreResult<S::Record> {
        let stored = self.store.write_local(record, self.clock.now_millis())?;
        trace!(id = %stored.id(), updated_at = stored.updated_at(), "local write");
        self.notify(stored.id());
        Ok(stored)
    }

    /// Deletes a record by writing a tombstone over its current version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is unknown.
    pub fn delete(&self, id: &RecordId) -> StoreResult<S::Record> {
        let mut record = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.mark_deleted();
        self.write(record)
    }

    fn notify(&self, id: &RecordId) {
        if let Some(listener) = &self.listener {
            listener.on_local_mutation(id);
        }
    }
}

impl<S, C> std::fmt::Debug for LocalWriter<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWriter")
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
