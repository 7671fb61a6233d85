use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{file_store::FileStore, memory_store::MemoryStore};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::TokenPair;

/// The three entries a session consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    AccessToken,
    RefreshToken,
    User,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [StoreKey::AccessToken, StoreKey::RefreshToken, StoreKey::User];

    /// The storage key, as the web front end names it.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AccessToken => "accessToken",
            StoreKey::RefreshToken => "refreshToken",
            StoreKey::User => "user",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted key/value storage for the session tokens and the user record.
#[async_trait]
pub trait TokenStore: Send + Sync {
    fn get_name(&self) -> &str;
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: StoreKey) -> Result<(), StoreError>;

    /// Writes both halves of a freshly issued token pair.
    async fn store_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        self.set(StoreKey::AccessToken, &tokens.access_token).await?;
        self.set(StoreKey::RefreshToken, &tokens.refresh_token).await
    }

    /// Forgets the whole session. Removing absent keys is not an error,
    /// so calling this repeatedly is safe.
    async fn clear_session(&self) -> Result<(), StoreError> {
        debug!("Clearing session from store '{}'", self.get_name());
        for key in StoreKey::ALL {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// Creates a concrete store implementation based on the StoreConfig.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn TokenStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory token store; the session ends with the process.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::File(file_config) => {
            let store = FileStore::open(&file_config.path).await?;
            info!("Using file token store at '{}'", file_config.path.display());
            Ok(Arc::new(store))
        }
    }
}
