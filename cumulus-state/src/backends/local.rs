//! Local file backend for state storage
//!
//! State lives in a JSON file (default: cumulus.state.json); the previous
//! version is kept next to it as `.backup`. The lock is a `.lock` file created
//! exclusively, so two processes cannot both acquire it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "cumulus.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .path
            .as_deref()
            .unwrap_or(Self::DEFAULT_STATE_FILE);
        if path.is_empty() {
            return Err(BackendError::configuration("local backend path must not be empty"));
        }
        Ok(Self::with_path(PathBuf::from(path)))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn backup_path(&self) -> PathBuf {
        self.state_path.with_extension("backup")
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }

    /// Create the lock file; `false` when it already exists
    async fn create_lock(&self, lock: &LockInfo) -> BackendResult<bool> {
        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(BackendError::Io(format!("Failed to create lock file: {}", e))),
        };
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;
        Ok(true)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;
        Ok(Some(state))
    }

    async fn write_state(&self, state: &mut StateFile) -> BackendResult<()> {
        if let Some(stored) = self.read_state().await? {
            if stored.lineage != state.lineage {
                return Err(BackendError::LineageMismatch {
                    expected: stored.lineage,
                    actual: state.lineage.clone(),
                });
            }
            if stored.serial > state.serial {
                return Err(BackendError::StaleSerial {
                    stored: stored.serial,
                    writing: state.serial,
                });
            }
            fs::copy(&self.state_path, self.backup_path())
                .await
                .map_err(|e| BackendError::Io(format!("Failed to back up state file: {}", e)))?;
        }

        state.increment_serial();
        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        // Write then rename so a crash never leaves a truncated state file
        let tmp_path = self.state_path.with_extension("tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;
        fs::rename(&tmp_path, &self.state_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to replace state file: {}", e)))?;
        log::debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);
        if self.create_lock(&lock).await? {
            return Ok(lock);
        }

        match self.read_lock().await? {
            Some(existing) if !existing.is_expired() => Err(BackendError::locked(&existing)),
            existing => {
                if let Some(existing) = existing {
                    log::warn!("Taking over expired lock {}", existing);
                }
                self.remove_lock().await?;
                if self.create_lock(&lock).await? {
                    Ok(lock)
                } else {
                    // Another process took it in between
                    match self.read_lock().await? {
                        Some(other) => Err(BackendError::locked(&other)),
                        None => Err(BackendError::Io("Lock file vanished while locking".to_string())),
                    }
                }
            }
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;
        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock_id.to_string()))?;
        if existing.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }
        log::warn!("Force-releasing lock {}", existing);
        self.remove_lock().await
    }

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
        self.read_lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_backend_read_write() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(backend.read_state().await.unwrap().is_none());

        let mut state = StateFile::new();
        backend.write_state(&mut state).await.unwrap();
        assert_eq!(state.serial, 1);

        let read_back = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read_back.serial, 1);
        assert_eq!(read_back.lineage, state.lineage);
    }

    #[tokio::test]
    async fn test_previous_state_is_backed_up() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let mut state = StateFile::new();
        backend.write_state(&mut state).await.unwrap();
        backend.write_state(&mut state).await.unwrap();

        let backup = std::fs::read_to_string(dir.path().join("test.state.backup")).unwrap();
        let backup: StateFile = serde_json::from_str(&backup).unwrap();
        assert_eq!(backup.serial, 1);
        assert_eq!(state.serial, 2);
    }

    #[tokio::test]
    async fn test_foreign_lineage_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        backend.write_state(&mut StateFile::new()).await.unwrap();

        let err = backend.write_state(&mut StateFile::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::LineageMismatch { .. }));
    }

    #[tokio::test]
    async fn test_stale_serial_is_rejected() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        let mut state = StateFile::new();
        backend.write_state(&mut state).await.unwrap();

        let mut stale = state.clone();
        backend.write_state(&mut state).await.unwrap();
        let err = backend.write_state(&mut stale).await.unwrap_err();
        assert!(matches!(err, BackendError::StaleSerial { stored: 2, writing: 1 }));
    }

    #[tokio::test]
    async fn test_local_backend_locking() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_eq!(lock.operation, "apply");
        assert_eq!(backend.current_lock().await.unwrap(), Some(lock.clone()));

        let err = backend.acquire_lock("plan").await.unwrap_err();
        assert!(matches!(err, BackendError::Locked { ref operation, .. } if operation == "apply"));

        backend.release_lock(&lock).await.unwrap();
        assert!(backend.current_lock().await.unwrap().is_none());

        let lock2 = backend.acquire_lock("destroy").await.unwrap();
        backend.release_lock(&lock2).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout("apply", Duration::seconds(-5));
        assert!(backend.create_lock(&stale).await.unwrap());

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale.id);
        assert!(matches!(
            backend.release_lock(&stale).await,
            Err(BackendError::LockMismatch { .. })
        ));
        backend.release_lock(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_force_unlock_requires_matching_id() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        let lock = backend.acquire_lock("apply").await.unwrap();

        assert!(matches!(
            backend.force_unlock("other").await,
            Err(BackendError::LockMismatch { .. })
        ));
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(matches!(
            backend.force_unlock(&lock.id).await,
            Err(BackendError::LockNotFound(_))
        ));
    }

    #[test]
    fn test_local_backend_from_config() {
        let backend = LocalBackend::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(backend.state_path(), Path::new("cumulus.state.json"));

        let backend = LocalBackend::from_config(&BackendConfig::local("custom.state.json")).unwrap();
        assert_eq!(backend.state_path(), Path::new("custom.state.json"));

        assert!(LocalBackend::from_config(&BackendConfig::local("")).is_err());
    }
}
