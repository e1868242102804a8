//! A persistent key-value store backed by a local JSON file

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::OpenOptions,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};

use super::{StorageError, TokenStorage};

/// A token store that survives restarts by keeping its entries in a file
///
/// The file holds a single JSON object mapping keys to values. A missing or
/// empty file reads as an empty store. Writes rewrite the whole file, which
/// is created readable only by its owner on unix platforms.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileStorage {
    /// Constructs a new file store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    async fn read_items(&self) -> Result<BTreeMap<String, String>, io::Error> {
        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;

        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    async fn write_items(&self, items: &BTreeMap<String, String>) -> Result<(), io::Error> {
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(items)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_items().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_guard.lock().await;
        let mut items = self.read_items().await?;
        items.insert(key.to_owned(), value.to_owned());
        Ok(self.write_items(&items).await?)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_guard.lock().await;
        let mut items = self.read_items().await?;
        if items.remove(key).is_some() {
            self.write_items(&items).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    type Result<T = (), E = StorageError> = std::result::Result<T, E>;

    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path().join("tokens.json"));

        assert_eq!(storage.get_item("Authorization").await?, None);
        storage.remove_item("Authorization").await?;
        Ok(())
    }

    #[tokio::test]
    async fn values_survive_a_new_store_on_the_same_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");

        FileStorage::new(&path)
            .set_item("app1_Authorization", "abc.def.ghi")
            .await?;

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.get_item("app1_Authorization").await?.as_deref(),
            Some("abc.def.ghi")
        );
        Ok(())
    }

    #[tokio::test]
    async fn removing_one_key_keeps_the_others() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path().join("tokens.json"));

        storage.set_item("a_Authorization", "one").await?;
        storage.set_item("b_Authorization", "two").await?;
        storage.remove_item("a_Authorization").await?;

        assert_eq!(storage.get_item("a_Authorization").await?, None);
        assert_eq!(
            storage.get_item("b_Authorization").await?.as_deref(),
            Some("two")
        );
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "not json").await?;

        let storage = FileStorage::new(&path);
        assert!(storage.get_item("Authorization").await.is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_its_owner() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");
        FileStorage::new(&path).set_item("Authorization", "x").await?;

        let mode = tokio::fs::metadata(&path).await?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
