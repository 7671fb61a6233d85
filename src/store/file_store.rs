use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StoreKey, TokenStore};
use crate::error::StoreError;

/// A store persisted as a flat JSON object, keyed like the browser storage
/// (`accessToken`, `refreshToken`, `user`).
///
/// The whole file is rewritten on every mutation through a temporary file
/// and a rename, so a crash never leaves half a session on disk.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`. A missing file is an empty session.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Serde(format!("Failed to parse '{}': {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        debug!(
            "Opened file store '{}' with {} entries",
            path.display(),
            entries.len()
        );

        Ok(FileStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::Serde(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write '{}': {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to move session into '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl TokenStore for FileStore {
    fn get_name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key.as_str()).cloned())
    }

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.as_str().to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key.as_str()).is_none() {
            return Ok(());
        }
        self.persist(&entries).await
    }
}
