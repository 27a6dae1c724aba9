use crate::in_memory::{InMemoryStore, StoreConfig, StoreSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use coldwatch_core::{
    Condition, ConditionalStore, CoreError, Document, FieldUpdate, Result, WriteOutcome,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-disk envelope: the snapshot plus an integrity checksum.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    version: u64,
    written_at: i64,
    checksum: u32,
    snapshot: StoreSnapshot,
}

fn checksum(snapshot: &StoreSnapshot) -> Result<u32> {
    let bytes = serde_json::to_vec(snapshot)?;
    Ok(crc32fast::hash(&bytes))
}

/// Durable conditional store.
///
/// Conditional writes are decided by an embedded [`InMemoryStore`]; every
/// applied mutation is followed by a full snapshot written to a temporary
/// file and atomically renamed over the state file. The state is reloaded on
/// startup. Atomicity holds within one process only: collectors that share a
/// lease across processes need a store whose conditional writes are atomic
/// across processes.
pub struct FileSystemStore {
    inner: InMemoryStore,
    state_file_path: PathBuf,
    write_lock: Mutex<()>,
    version: AtomicU64,
}

impl FileSystemStore {
    /// Open (or create) a store rooted at `data_dir`.
    ///
    /// # Errors
    /// * the directory cannot be created
    /// * an existing state file cannot be read or fails its checksum
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::with_config(data_dir, StoreConfig::default()).await
    }

    pub async fn with_config<P: AsRef<Path>>(data_dir: P, config: StoreConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();

        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await.map_err(|e| {
                CoreError::persistence(format!("Failed to create data directory: {}", e))
            })?;
        }

        let store = Self {
            inner: InMemoryStore::with_config(config),
            state_file_path: data_dir.join("coldwatch-state.json"),
            write_lock: Mutex::new(()),
            version: AtomicU64::new(0),
        };

        if let Some(state) = store.load_state().await? {
            let documents = state.snapshot.document_count();
            store.version.store(state.version, Ordering::Release);
            store.inner.restore(state.snapshot);
            info!(
                path = %store.state_file_path.display(),
                version = state.version,
                documents,
                "Restored store state"
            );
        }

        Ok(store)
    }

    pub fn state_file_path(&self) -> &Path {
        &self.state_file_path
    }

    /// Number of snapshots written since the state file was created.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    async fn load_state(&self) -> Result<Option<PersistedState>> {
        let bytes = match fs::read(&self.state_file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::persistence(format!(
                    "Failed to read state file: {}",
                    e
                )))
            }
        };

        let state: PersistedState = serde_json::from_slice(&bytes)?;
        let actual = checksum(&state.snapshot)?;
        if actual != state.checksum {
            return Err(CoreError::InvalidSnapshot {
                expected: state.checksum,
                actual,
            });
        }
        Ok(Some(state))
    }

    /// Write the current contents to disk. Callers hold `write_lock`.
    async fn write_state(&self) -> Result<()> {
        let snapshot = self.inner.snapshot();
        let state = PersistedState {
            version: self.version.load(Ordering::Acquire) + 1,
            written_at: Utc::now().timestamp_millis(),
            checksum: checksum(&snapshot)?,
            snapshot,
        };
        let bytes = serde_json::to_vec(&state)?;

        // Write to a temporary file first, then atomically move to final location
        let temp_file_path = self.state_file_path.with_extension("tmp");
        fs::write(&temp_file_path, &bytes).await.map_err(|e| {
            CoreError::persistence(format!("Failed to write state to temp file: {}", e))
        })?;
        fs::rename(&temp_file_path, &self.state_file_path)
            .await
            .map_err(|e| {
                CoreError::persistence(format!("Failed to rename temp file to state file: {}", e))
            })?;

        self.version.store(state.version, Ordering::Release);
        debug!(version = state.version, bytes = bytes.len(), "State persisted");
        Ok(())
    }

    /// Run one mutation against the in-memory state and persist it. If the
    /// snapshot cannot be written the mutation is undone, so an `Err` never
    /// leaves a change behind.
    async fn commit<T, F>(&self, mutation: F, applied: impl Fn(&T) -> bool) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot();

        let value = mutation.await?;
        if !applied(&value) {
            return Ok(value);
        }

        if let Err(e) = self.write_state().await {
            warn!(error = %e, "Snapshot write failed, rolling back");
            self.inner.restore(before);
            return Err(e);
        }
        Ok(value)
    }
}

#[async_trait]
impl ConditionalStore for FileSystemStore {
    async fn put_if(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        self.commit(
            self.inner.put_if(collection, key, document, condition),
            WriteOutcome::is_applied,
        )
        .await
    }

    async fn update_if(
        &self,
        collection: &str,
        key: &str,
        updates: &[FieldUpdate],
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        self.commit(
            self.inner.update_if(collection, key, updates, condition),
            WriteOutcome::is_applied,
        )
        .await
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<String> {
        self.commit(self.inner.insert(collection, document), |_| true)
            .await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.inner.get(collection, key).await
    }

    async fn scan(
        &self,
        collection: &str,
        filter: &Condition,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        self.inner.scan(collection, filter, limit).await
    }

    async fn count(&self, collection: &str, filter: &Condition) -> Result<usize> {
        self.inner.count(collection, filter).await
    }

    async fn ping(&self) -> Result<()> {
        let dir = self
            .state_file_path
            .parent()
            .ok_or_else(|| CoreError::internal("state file has no parent directory"))?;
        fs::metadata(dir)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::unavailable(format!("data directory unreachable: {}", e)))
    }
}
