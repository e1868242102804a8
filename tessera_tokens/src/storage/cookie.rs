//! A storage backend that keeps tokens in an HTTP cookie jar

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use url::Url;

use super::{StorageError, TokenStorage};

/// A token store backed by cookies scoped to a URL
///
/// Install the same [`Jar`] on the `reqwest` client with
/// `ClientBuilder::cookie_provider` to have the stored token sent along to
/// that origin as a cookie as well.
#[derive(Debug, Clone)]
pub struct CookieStorage {
    jar: Arc<Jar>,
    url: Url,
}

impl CookieStorage {
    /// Constructs a cookie store for `url` with a fresh jar
    pub fn new(url: Url) -> Self {
        Self::with_jar(Arc::new(Jar::default()), url)
    }

    /// Constructs a cookie store for `url` using an existing jar
    pub fn with_jar(jar: Arc<Jar>, url: Url) -> Self {
        Self { jar, url }
    }

    /// The jar holding the cookies
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// The URL the cookies are scoped to
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TokenStorage for CookieStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let header = match self.jar.cookies(&self.url) {
            Some(header) => header,
            None => return Ok(None),
        };

        let value = header
            .to_str()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_owned());

        Ok(value)
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.jar
            .add_cookie_str(&format!("{}={}; Path=/", key, value), &self.url);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.jar
            .add_cookie_str(&format!("{}=; Path=/; Max-Age=0", key), &self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    type Result<T = (), E = StorageError> = std::result::Result<T, E>;

    use super::*;

    fn storage() -> CookieStorage {
        CookieStorage::new(Url::parse("https://api.example.com/").unwrap())
    }

    #[tokio::test]
    async fn empty_jar_reads_as_absent() -> Result<()> {
        assert_eq!(storage().get_item("Authorization").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn stores_overwrites_and_removes_a_cookie() -> Result<()> {
        let storage = storage();

        storage.set_item("Authorization", "abc.def.ghi").await?;
        storage.set_item("Authorization", "jkl.mno.pqr").await?;
        assert_eq!(
            storage.get_item("Authorization").await?.as_deref(),
            Some("jkl.mno.pqr")
        );

        storage.remove_item("Authorization").await?;
        assert_eq!(storage.get_item("Authorization").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn namespaced_keys_are_distinct_cookies() -> Result<()> {
        let storage = storage();

        storage.set_item("Authorization", "plain").await?;
        storage.set_item("app1_Authorization", "namespaced").await?;

        assert_eq!(
            storage.get_item("Authorization").await?.as_deref(),
            Some("plain")
        );
        assert_eq!(
            storage.get_item("app1_Authorization").await?.as_deref(),
            Some("namespaced")
        );
        Ok(())
    }

    #[tokio::test]
    async fn clones_share_the_jar() -> Result<()> {
        let storage = storage();
        let other = storage.clone();

        storage.set_item("Authorization", "shared").await?;
        assert_eq!(
            other.get_item("Authorization").await?.as_deref(),
            Some("shared")
        );
        Ok(())
    }
}
