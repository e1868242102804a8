//! An ephemeral in-process storage backend

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StorageError, TokenStorage};

/// An in-memory token store
///
/// Values live only as long as the store. Wrap it in an `Arc` to share it
/// between several tokens.
#[derive(Default, Debug)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().await.remove(key);
        Ok(())
    }
}
