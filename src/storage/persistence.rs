use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{PersistedSnapshot, SnapshotBackend, StateStore};
use crate::error::{StorageError, StorageResult};

/// Moves session state between a [`StateStore`] and a [`SnapshotBackend`].
///
/// Writes are serialized: at most one save is in flight at a time.
pub struct Persistence {
    backend: Arc<dyn SnapshotBackend>,
    max_bytes: usize,
    write_lock: Mutex<()>,
}

impl Persistence {
    /// Create a persistence layer over `backend` with a snapshot size bound.
    pub fn new(backend: Arc<dyn SnapshotBackend>, max_bytes: usize) -> Self {
        Self {
            backend,
            max_bytes,
            write_lock: Mutex::new(()),
        }
    }

    /// Write the current state of `store`.
    pub async fn save(&self, store: &StateStore) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = PersistedSnapshot::from_state(&store.get_state());
        let payload = snapshot.encode(self.max_bytes)?;
        self.backend.write(&payload).await?;
        debug!(bytes = payload.len(), "Snapshot saved");
        Ok(())
    }

    /// Restore the stored snapshot into `store`.
    ///
    /// Returns `false` when nothing usable was stored. A corrupt snapshot is
    /// cleared and the store is left empty.
    pub async fn load(&self, store: &StateStore) -> StorageResult<bool> {
        let Some(payload) = self.backend.read().await? else {
            debug!("No stored snapshot");
            return Ok(false);
        };

        match PersistedSnapshot::decode(&payload) {
            Ok(snapshot) => {
                store.replace(snapshot.into_state());
                info!("Restored session from snapshot");
                Ok(true)
            }
            Err(StorageError::CorruptSnapshot { message }) => {
                warn!(error = %message, "Discarding corrupt snapshot");
                let _guard = self.write_lock.lock().await;
                self.backend.clear().await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the stored snapshot.
    pub async fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.clear().await
    }
}
