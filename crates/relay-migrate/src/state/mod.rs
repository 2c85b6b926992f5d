//! File-based progress ledger shared between migration processes.
//!
//! The ledger maps each source object name to the row count of its last
//! successful migration. It is rewritten as a whole JSON document on every
//! update, under the advisory lock in [`lock`]. The ledger is bookkeeping:
//! an update can be dropped when the lock cannot be taken in time, and the
//! target database remains the authority on what was actually migrated.

mod lock;
mod signal;

pub use lock::{LockGuard, LockMarker};
pub use signal::{RunOutcome, RunSignal};

use crate::config::StateConfig;
use crate::error::{MigrateError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Object name to last migrated row count.
pub type ProgressRecord = BTreeMap<String, u64>;

/// Lock acquisition budget.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    /// Polls before giving up.
    pub max_attempts: u32,

    /// Sleep between polls.
    pub poll_interval: Duration,

    /// Break markers older than this.
    pub stale_after: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            poll_interval: Duration::from_secs(1),
            stale_after: None,
        }
    }
}

/// Result of a locked ledger update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The ledger was updated.
    Written,
    /// The lock was not acquired within budget; the update was dropped.
    LockTimeout,
}

/// Progress ledger plus the lock marker that guards it.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
    lock_path: PathBuf,
    settings: LockSettings,
}

impl ProgressStore {
    /// Create a store over `path`, locked through `lock_path`.
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
            settings,
        }
    }

    /// Create a store from the `state` section of the configuration.
    pub fn from_config(config: &StateConfig) -> Self {
        Self::new(
            &config.progress_file,
            &config.lock_file,
            LockSettings {
                max_attempts: config.lock_attempts,
                poll_interval: config.lock_poll_interval(),
                stale_after: config.stale_lock_after(),
            },
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Read the ledger. A missing or empty file is an empty ledger.
    pub fn load(&self) -> Result<ProgressRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProgressRecord::new())
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(ProgressRecord::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            MigrateError::State(format!("{}: malformed progress file: {}", self.path.display(), e))
        })
    }

    /// Last recorded row count for one object.
    pub fn get(&self, target: &str) -> Result<Option<u64>> {
        Ok(self.load()?.get(target).copied())
    }

    /// Poll for the ledger lock.
    ///
    /// Returns `None` after `max_attempts` polls found the lock held.
    pub async fn try_acquire_lock(
        &self,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<Option<LockGuard>> {
        lock::acquire(
            &self.lock_path,
            max_attempts,
            poll_interval,
            self.settings.stale_after,
        )
        .await
    }

    /// Merge `record[target] = row_count` into the ledger on disk, then
    /// release the lock.
    ///
    /// The ledger is re-read under the lock so entries written by other
    /// processes since our last load survive. The lock is released on every
    /// path, including when the write fails.
    pub fn update_and_release(&self, guard: LockGuard, target: &str, row_count: u64) -> Result<()> {
        self.modify_and_release(guard, |record| {
            record.insert(target.to_string(), row_count);
        })
    }

    /// Acquire the lock with the configured budget and record a completed
    /// migration.
    pub async fn record_completion(&self, target: &str, row_count: u64) -> Result<RecordOutcome> {
        let Some(guard) = self
            .try_acquire_lock(self.settings.max_attempts, self.settings.poll_interval)
            .await?
        else {
            warn!(
                "Could not lock {:?} after {} attempts; progress for {} ({} rows) not recorded",
                self.lock_path, self.settings.max_attempts, target, row_count
            );
            return Ok(RecordOutcome::LockTimeout);
        };

        self.update_and_release(guard, target, row_count)?;
        debug!("Recorded {} = {} rows", target, row_count);
        Ok(RecordOutcome::Written)
    }

    /// Drop an object from the ledger so the next run migrates it again.
    pub async fn forget(&self, target: &str) -> Result<RecordOutcome> {
        let Some(guard) = self
            .try_acquire_lock(self.settings.max_attempts, self.settings.poll_interval)
            .await?
        else {
            warn!("Could not lock {:?}; {} not removed", self.lock_path, target);
            return Ok(RecordOutcome::LockTimeout);
        };

        self.modify_and_release(guard, |record| {
            record.remove(target);
        })?;
        Ok(RecordOutcome::Written)
    }

    fn modify_and_release<F>(&self, guard: LockGuard, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ProgressRecord),
    {
        if guard.path() != self.lock_path.as_path() {
            return Err(MigrateError::State(format!(
                "lock {:?} does not guard {:?}",
                guard.path(),
                self.path
            )));
        }

        let written = self.load().and_then(|mut record| {
            apply(&mut record);
            self.write(&record)
        });
        let released = guard.release();

        written?;
        released
    }

    /// Atomic write: write to temp file, then rename.
    fn write(&self, record: &ProgressRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ProgressStore {
        ProgressStore::new(
            dir.path().join("progress.json"),
            dir.path().join("progress.lock"),
            LockSettings {
                max_attempts: 200,
                poll_interval: Duration::from_millis(5),
                stale_after: None,
            },
        )
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let record = store(&dir).load().unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_load_empty_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, MigrateError::State(_)));
    }

    #[test]
    fn test_load_reads_plain_object() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{\n    \"DESCARGO1\": 42,\n    \"UT\": 0\n}").unwrap();
        let record = store.load().unwrap();
        assert_eq!(record.get("DESCARGO1"), Some(&42));
        assert_eq!(record.get("UT"), Some(&0));
    }

    #[tokio::test]
    async fn test_update_and_release() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let guard = store
            .try_acquire_lock(1, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        store.update_and_release(guard, "ORDERS", 100).unwrap();

        assert_eq!(store.get("ORDERS").unwrap(), Some(100));
        assert!(!store.lock_path().exists());

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains('\n'), "ledger should be pretty-printed");
        assert!(!dir.path().join("progress.tmp").exists());
    }

    #[tokio::test]
    async fn test_update_merges_external_changes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let other = store.clone();

        store.record_completion("ORDERS", 100).await.unwrap();
        // Someone else writes between our load and our update.
        let _stale_snapshot = store.load().unwrap();
        other.record_completion("CUSTOMERS", 7).await.unwrap();
        store.record_completion("ORDERS", 150).await.unwrap();

        let record = store.load().unwrap();
        assert_eq!(record.get("ORDERS"), Some(&150));
        assert_eq!(record.get("CUSTOMERS"), Some(&7));
    }

    #[tokio::test]
    async fn test_lock_released_when_write_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(dir.path().join("progress.tmp")).unwrap();

        let guard = store
            .try_acquire_lock(1, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert!(store.lock_path().exists());

        let result = store.update_and_release(guard, "ORDERS", 100);
        assert!(result.is_err());
        assert!(!store.lock_path().exists(), "lock must be released after a failed write");
        assert_eq!(store.get("ORDERS").unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_released_when_ledger_is_malformed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "[1, 2").unwrap();

        let result = store.record_completion("ORDERS", 100).await;
        assert!(result.is_err());
        assert!(!store.lock_path().exists());
    }

    #[tokio::test]
    async fn test_record_completion_times_out_under_contention() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(
            dir.path().join("progress.json"),
            dir.path().join("progress.lock"),
            LockSettings {
                max_attempts: 2,
                poll_interval: Duration::from_millis(5),
                stale_after: None,
            },
        );
        std::fs::write(store.lock_path(), "held").unwrap();

        let outcome = store.record_completion("ORDERS", 100).await.unwrap();
        assert_eq!(outcome, RecordOutcome::LockTimeout);
        assert_eq!(store.get("ORDERS").unwrap(), None);
        assert!(store.lock_path().exists(), "foreign lock must be left alone");
    }

    #[tokio::test]
    async fn test_guard_from_other_store_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let other = ProgressStore::new(
            dir.path().join("other.json"),
            dir.path().join("other.lock"),
            LockSettings::default(),
        );

        let guard = other
            .try_acquire_lock(1, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert!(store.update_and_release(guard, "ORDERS", 1).is_err());
        assert!(!other.lock_path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_every_target() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut handles = Vec::new();
        for i in 0..8u64 {
            // Separate store instances, as separate processes would have.
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_completion(&format!("OBJ_{}", i), i * 10).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), RecordOutcome::Written);
        }

        let record = store.load().unwrap();
        assert_eq!(record.len(), 8);
        for i in 0..8u64 {
            assert_eq!(record.get(&format!("OBJ_{}", i)), Some(&(i * 10)));
        }
        assert!(!store.lock_path().exists());
    }

    #[tokio::test]
    async fn test_forget_removes_entry() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record_completion("ORDERS", 100).await.unwrap();
        store.record_completion("CUSTOMERS", 5).await.unwrap();

        assert_eq!(store.forget("ORDERS").await.unwrap(), RecordOutcome::Written);
        let record = store.load().unwrap();
        assert_eq!(record.get("ORDERS"), None);
        assert_eq!(record.get("CUSTOMERS"), Some(&5));
    }

    #[test]
    fn test_from_config() {
        let config = StateConfig {
            lock_attempts: 9,
            lock_poll_ms: 20,
            stale_lock_secs: Some(600),
            ..StateConfig::default()
        };
        let store = ProgressStore::from_config(&config);
        assert_eq!(store.path(), Path::new("migration_progress.json"));
        assert_eq!(store.lock_path(), Path::new("migration_progress.lock"));
        assert_eq!(store.settings.max_attempts, 9);
        assert_eq!(store.settings.poll_interval, Duration::from_millis(20));
        assert_eq!(store.settings.stale_after, Some(Duration::from_secs(600)));
    }
}
