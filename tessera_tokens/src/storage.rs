//! Persistence backends for the raw token
//!
//! A backend is a plain string key-value capability. It holds no token
//! logic; the [`Token`][crate::Token] decides what to store and when.
//!
//! Backends may be shared between several tokens or processes. Writes
//! overwrite unconditionally, so the last writer wins.

use async_trait::async_trait;
use std::{error, fmt, sync::Arc};

#[cfg(feature = "cookies")]
pub mod cookie;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "cookies")]
pub use cookie::CookieStorage;
#[cfg(feature = "file")]
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// An error raised by a storage backend
pub type StorageError = Box<dyn error::Error + Send + Sync + 'static>;

/// A string key-value store used to persist tokens
#[async_trait]
pub trait TokenStorage: fmt::Debug + Send + Sync {
    /// Reads the value stored under `key`, if any
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any existing value
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes any value stored under `key`
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T> TokenStorage for Arc<T>
where
    T: TokenStorage + ?Sized,
{
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key).await
    }
}
