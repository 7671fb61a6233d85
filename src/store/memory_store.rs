use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{StoreKey, TokenStore};
use crate::error::StoreError;

/// A store that lives only as long as the process. Used for one-shot CLI
/// invocations that pass tokens in and by the tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<StoreKey, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    fn get_name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.entries().remove(&key);
        Ok(())
    }
}
