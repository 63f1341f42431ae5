//! JSON file store
//!
//! Everything lives under `<root>/.cloudmirror/`:
//!
//! - `state.json` holds every mirrored record, relation edge and sync status
//! - `state.json.prev` is the generation replaced by the last write
//! - `writer.lock` names the process currently writing
//!
//! Writers stage the new state next to `state.json` and rename it into place,
//! so readers see either the old or the new file, never a partial one.

use super::{LocalStore, STATE_VERSION, StoreState, WriteBatch};
use crate::error::{Result, SyncError};
use crate::model::{LocalResourceRecord, RelationEdge, Scope};
use crate::status::StatusRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudmirror_cloud::{ResourceRef, Vendor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

const STATE_DIR: &str = ".cloudmirror";
const STATE_FILE: &str = "state.json";
const PREVIOUS_FILE: &str = "state.json.prev";
const STAGED_FILE: &str = "state.json.tmp";
const LOCK_FILE: &str = "writer.lock";

/// Age after which a lock is assumed to belong to a crashed writer
const LOCK_STALE_AFTER_HOURS: i64 = 1;

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Paths and file-level operations of one `.cloudmirror/` directory
#[derive(Debug, Clone)]
pub struct StateFiles {
    dir: PathBuf,
    lock_wait: Duration,
}

impl StateFiles {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join(STATE_DIR),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// How long `lock` waits for another writer before giving up
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn previous_path(&self) -> PathBuf {
        self.dir.join(PREVIOUS_FILE)
    }

    fn staged_path(&self) -> PathBuf {
        self.dir.join(STAGED_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Read the current state
    ///
    /// Falls back to the previous generation when `state.json` is gone, and
    /// to an empty state when neither file exists.
    pub async fn read(&self) -> Result<StoreState> {
        if let Some(state) = read_state(&self.state_path()).await? {
            return Ok(state);
        }
        match read_state(&self.previous_path()).await? {
            Some(state) => {
                tracing::warn!(
                    records = state.records.len(),
                    "{} missing, recovered previous generation",
                    self.state_path().display()
                );
                Ok(state)
            }
            None => Ok(StoreState::new()),
        }
    }

    /// Replace `state.json`, keeping a copy of the generation it replaces
    ///
    /// Callers hold the writer lock.
    pub async fn write(&self, state: &StoreState) -> Result<()> {
        let content = serde_json::to_vec_pretty(state)?;
        fs::create_dir_all(&self.dir).await?;

        let staged = self.staged_path();
        let mut file = fs::File::create(&staged).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        let current = self.state_path();
        match fs::copy(&current, self.previous_path()).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&staged, &current).await?;

        tracing::debug!(records = state.records.len(), "wrote {}", current.display());
        Ok(())
    }

    /// Take the writer lock, waiting up to the configured time for a live holder
    pub async fn lock(&self) -> Result<WriterLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.lock_path();
        let deadline = Instant::now() + self.lock_wait;

        loop {
            if let Some(lock) = WriterLock::try_create(&path).await? {
                return Ok(lock);
            }

            // Released between our attempt and this read
            let Some(holder) = LockHolder::read(&path).await? else {
                continue;
            };

            if holder.is_stale() {
                tracing::warn!(
                    holder = %holder.host,
                    pid = holder.pid,
                    since = %holder.acquired_at,
                    "breaking stale state lock"
                );
                remove_if_present(&path).await?;
                continue;
            }

            if Instant::now() >= deadline {
                return Err(SyncError::Store(format!(
                    "State is locked by {} (pid {}) since {}",
                    holder.host, holder.pid, holder.acquired_at
                )));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }
}

async fn read_state(path: &Path) -> Result<Option<StoreState>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: StoreState = serde_json::from_str(&content)?;
    if state.version > STATE_VERSION {
        return Err(SyncError::Store(format!(
            "{} has version {}, newer than supported {}",
            path.display(),
            state.version,
            STATE_VERSION
        )));
    }
    Ok(Some(state))
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Content of `writer.lock`
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    #[serde(default)]
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// `None` when the lock file vanished
    ///
    /// A file that does not parse yet (its writer is mid-write, or crashed
    /// there) is dated by its modification time.
    async fn read(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if let Ok(holder) = serde_json::from_str(&content) {
            return Ok(Some(holder));
        }

        let modified = match fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self {
            host: "unknown".to_string(),
            pid: 0,
            acquired_at: DateTime::<Utc>::from(modified),
        }))
    }

    fn is_stale(&self) -> bool {
        Utc::now().signed_duration_since(self.acquired_at)
            >= chrono::Duration::hours(LOCK_STALE_AFTER_HOURS)
    }
}

/// Held writer lock; dropping it removes the lock file
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    released: bool,
}

impl WriterLock {
    /// Create the lock file unless it exists
    async fn try_create(path: &Path) -> Result<Option<Self>> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lock = Self {
            path: path.to_path_buf(),
            released: false,
        };
        let holder = serde_json::to_vec(&LockHolder::current())?;
        file.write_all(&holder).await?;
        file.flush().await?;

        tracing::debug!("acquired {}", path.display());
        Ok(Some(lock))
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_present(&self.path).await?;
        tracing::debug!("released {}", self.path.display());
        Ok(())
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Store persisted to `.cloudmirror/state.json`
///
/// Every read goes to the file. A mutation holds the writer lock across
/// read, change and write, so stores opened on the same directory by other
/// processes never lose each other's updates.
pub struct FileStore {
    files: StateFiles,
    /// Writers of this process queue here instead of polling the lock file
    writer: Mutex<()>,
}

impl FileStore {
    /// Open the store under `root`, failing early on an unreadable state
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_files(StateFiles::new(root)).await
    }

    pub async fn with_files(files: StateFiles) -> Result<Self> {
        let state = files.read().await?;
        tracing::debug!(records = state.records.len(), "opened {}", files.dir().display());
        Ok(Self {
            files,
            writer: Mutex::new(()),
        })
    }

    pub fn files(&self) -> &StateFiles {
        &self.files
    }

    async fn mutate<T>(&self, change: impl FnOnce(&mut StoreState) -> T) -> Result<T> {
        let _queued = self.writer.lock().await;
        let lock = self.files.lock().await?;

        let mut state = self.files.read().await?;
        let value = change(&mut state);
        state.updated_at = Utc::now();
        self.files.write(&state).await?;

        lock.release().await?;
        Ok(value)
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.mutate(|state| state.apply(batch)).await
    }

    async fn get_by_cloud_ids(
        &self,
        scope: &Scope,
        cloud_ids: &[String],
    ) -> Result<Vec<LocalResourceRecord>> {
        let state = self.files.read().await?;
        Ok(state
            .select(scope)
            .filter(|record| cloud_ids.contains(&record.cloud_id))
            .cloned()
            .collect())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<LocalResourceRecord>> {
        let state = self.files.read().await?;
        Ok(state.select(scope).cloned().collect())
    }

    async fn delete_by_cloud_ids_not_in(
        &self,
        scope: &Scope,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let state = self.files.read().await?;
        if state.select(scope).all(|record| seen.contains(&record.cloud_id)) {
            return Ok(0);
        }
        self.mutate(|state| state.delete_not_in(scope, seen)).await
    }

    async fn relations(
        &self,
        vendor: Vendor,
        account_id: &str,
        resource: &ResourceRef,
    ) -> Result<Vec<RelationEdge>> {
        let state = self.files.read().await?;
        Ok(state.relations_of(vendor, account_id, resource))
    }

    async fn load_statuses(&self) -> Result<Vec<StatusRecord>> {
        Ok(self.files.read().await?.statuses)
    }

    async fn save_statuses(&self, statuses: &[StatusRecord]) -> Result<()> {
        let statuses = statuses.to_vec();
        self.mutate(move |state| state.statuses = statuses).await
    }
}
