//! JSON snapshot file store.
//!
//! The whole store is one JSON document, rewritten after every mutation with
//! the write-to-temp-then-rename pattern:
//!
//! 1. write `<path>.tmp`
//! 2. fsync the temp file
//! 3. rename over `<path>`
//! 4. fsync the parent directory
//!
//! A mutation is visible to readers only after its snapshot is durable. If the
//! write fails, the in-memory state is rolled back and the error returned.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lifecycle::{
    DrawId, ExternalId, RecordStore, RecordVersion, ScheduledEntity, SignupInsert, SignupRecord,
    SignupStore, StoreError, Versioned, WritePrecondition,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::state::{Snapshot, StoreState, SCHEMA_VERSION};

/// A [`RecordStore`] and [`SignupStore`] persisted to a single JSON file.
///
/// Suitable for one process at a time; the conditional-write checks still
/// apply within that process.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: Arc<PathBuf>,
    state: Arc<Mutex<StoreState>>,
}

impl FileStore {
    /// Opens the store at `path`, loading an existing snapshot or starting empty.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] if the file exists but cannot be decoded or has
    /// an unknown schema version; [`StoreError::Io`] for read failures.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let load_path = path.clone();
        let state = tokio::task::spawn_blocking(move || load(&load_path))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("snapshot load task failed: {e}"),
            })??;
        info!(
            path = %path.display(),
            records = state.record_count(),
            "record store opened"
        );
        Ok(Self {
            path: Arc::new(path),
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `mutate` to a copy of the state, persists it, then publishes it.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let result = mutate(&mut next)?;

        let bytes = serde_json::to_vec_pretty(&Snapshot {
            schema_version: SCHEMA_VERSION,
            state: next.clone(),
        })
        .map_err(|e| StoreError::Io {
            message: format!("failed to encode snapshot: {e}"),
        })?;
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || save_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("snapshot write task failed: {e}"),
            })?
            .map_err(|e| StoreError::Io {
                message: format!("failed to write snapshot: {e}"),
            })?;

        *guard = next;
        debug!(path = %self.path.display(), "snapshot written");
        Ok(result)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Versioned<ScheduledEntity>>, StoreError> {
        Ok(self.state.lock().await.get(external_id))
    }

    async fn put(
        &self,
        entity: ScheduledEntity,
        precondition: WritePrecondition,
    ) -> Result<RecordVersion, StoreError> {
        self.commit(|state| state.put(entity, precondition)).await
    }

    async fn delete(
        &self,
        external_id: &ExternalId,
        expected: RecordVersion,
    ) -> Result<(), StoreError> {
        self.commit(|state| state.delete(external_id, expected))
            .await
    }

    async fn list(&self) -> Result<Vec<Versioned<ScheduledEntity>>, StoreError> {
        Ok(self.state.lock().await.all())
    }
}

#[async_trait]
impl SignupStore for FileStore {
    async fn fetch_signups(&self, draw_id: &DrawId) -> Result<Vec<SignupRecord>, StoreError> {
        Ok(self.state.lock().await.signups_for(draw_id))
    }

    async fn insert_signup(&self, signup: SignupRecord) -> Result<SignupInsert, StoreError> {
        {
            let state = self.state.lock().await;
            if let Some(taken) = state.email_owner(&signup.email) {
                return Ok(SignupInsert::EmailTaken {
                    existing_draw: taken,
                });
            }
        }
        self.commit(|state| Ok(state.insert_signup(signup))).await
    }
}

// ---------------------------------------------------------------------------
// Snapshot I/O
// ---------------------------------------------------------------------------

fn load(path: &Path) -> Result<StoreState, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreState::default()),
        Err(e) => {
            return Err(StoreError::Io {
                message: format!("failed to read {}: {e}", path.display()),
            })
        }
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        message: format!("{}: {e}", path.display()),
    })?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(StoreError::Corrupt {
            message: format!(
                "{}: schema version {} (expected {SCHEMA_VERSION})",
                path.display(),
                snapshot.schema_version
            ),
        });
    }
    let mut state = snapshot.state;
    state.reindex();
    Ok(state)
}

fn save_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
