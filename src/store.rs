//! Asynchronous key-value storage for persisted preferences.
//!
//! Two implementations are provided:
//! * [`MemoryStore`] - process-local, for tests and ephemeral sessions
//! * [`FileStore`] - one file per key inside a directory

use std::{collections::HashMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Durable string storage addressed by key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value for `key`, or `None` if it was never set.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Stores each key as a file named after it.
///
/// Keys are restricted to ASCII alphanumerics, `_`, `-` and `.` so they
/// cannot escape the directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Values larger than this are refused on read.
    const MAX_VALUE_SIZE: u64 = 64 * 1024;

    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|chr| chr.is_ascii_alphanumeric() || matches!(chr, '_' | '-' | '.'));
        if !valid {
            return Err(Error::validation(format!("invalid store key {key:?}")));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;

        // Prevent out-of-memory conditions on a corrupted store.
        match tokio::fs::metadata(&path).await {
            Ok(attributes) if attributes.len() > Self::MAX_VALUE_SIZE => {
                return Err(Error::validation(format!(
                    "{} is too large",
                    path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so readers never observe a partial value.
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert_eq!(store.get("auth").await.unwrap(), None);

        store.set("auth", "{}").await.unwrap();
        let reopened = FileStore::new(dir.path().join("nested"));
        assert_eq!(reopened.get("auth").await.unwrap().as_deref(), Some("{}"));

        reopened.remove("auth").await.unwrap();
        assert_eq!(store.get("auth").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_keys_with_shared_stem_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let (x, y) = tokio::join!(store.set("a.x", "first"), store.set("a.y", "second"));
        x.unwrap();
        y.unwrap();

        assert_eq!(store.get("a.x").await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.get("a.y").await.unwrap().as_deref(), Some("second"));
        assert!(!dir.path().join("a.tmp").exists());
        assert!(!dir.path().join("a.x.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("a/b").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
