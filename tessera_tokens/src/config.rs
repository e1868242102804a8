//! Token and storage configuration

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use serde::Deserialize;
use tessera_clock::DurationSecs;
use thiserror::Error;
use url::Url;

use crate::storage::{MemoryStorage, TokenStorage};

/// Default refresh window of two weeks
pub const DEFAULT_REFRESH_WINDOW: DurationSecs = DurationSecs(14 * 24 * 60 * 60);

/// Default location of the new token within a refresh response body
pub const DEFAULT_ACCESS_TOKEN_POINTER: &str = "/data/access_token";

/// Configuration describing how a token is refreshed and where it is kept
#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    /// The endpoint that exchanges a token for a fresh one
    pub refresh_url: Url,

    /// How long after issuance an expired token may still be refreshed
    #[serde(default = "default_refresh_window")]
    pub refresh_window: DurationSecs,

    /// Optional prefix for the storage key
    #[serde(default)]
    pub storage_namespace: Option<String>,

    /// JSON pointer to the new token in the refresh response body
    #[serde(default = "default_access_token_pointer")]
    pub access_token_pointer: String,
}

fn default_refresh_window() -> DurationSecs {
    DEFAULT_REFRESH_WINDOW
}

fn default_access_token_pointer() -> String {
    DEFAULT_ACCESS_TOKEN_POINTER.to_owned()
}

impl TokenConfig {
    /// Constructs a configuration with default window and response layout
    pub fn new(refresh_url: Url) -> Self {
        Self {
            refresh_url,
            refresh_window: DEFAULT_REFRESH_WINDOW,
            storage_namespace: None,
            access_token_pointer: default_access_token_pointer(),
        }
    }

    /// Sets the refresh window
    pub fn with_refresh_window(mut self, refresh_window: DurationSecs) -> Self {
        self.refresh_window = refresh_window;
        self
    }

    /// Sets the storage namespace
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = Some(namespace.into());
        self
    }

    /// Sets the JSON pointer used to find the new token in a refresh response
    pub fn with_access_token_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.access_token_pointer = pointer.into();
        self
    }
}

/// The kind of storage backend used to persist a token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum StorageKind {
    /// Ephemeral, in-process storage (`memory`)
    Memory,
    /// A persistent key-value file (`local-storage`)
    LocalStorage,
    /// An HTTP cookie jar (`cookies`)
    Cookies,
}

impl StorageKind {
    /// The configuration tag for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::LocalStorage => "local-storage",
            Self::Cookies => "cookies",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "local-storage" => Ok(Self::LocalStorage),
            "cookies" => Ok(Self::Cookies),
            other => Err(ConfigError::UnknownStorageKind(other.to_owned())),
        }
    }
}

impl TryFrom<String> for StorageKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An error in the storage or token configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The storage tag is not one of the known kinds
    #[error("unknown storage kind `{0}`; expected `memory`, `local-storage`, or `cookies`")]
    UnknownStorageKind(String),
    /// A parameter required by the selected storage kind is absent
    #[error("storage kind `{kind}` requires `{parameter}` to be set")]
    MissingParameter {
        /// The selected storage kind
        kind: StorageKind,
        /// The missing parameter
        parameter: &'static str,
    },
    /// The selected storage kind was not compiled into this build
    #[error("storage kind `{0}` is not enabled in this build")]
    Disabled(StorageKind),
}

/// Selects and parameterizes a storage backend
#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    /// The backend to use
    pub kind: StorageKind,

    /// The file used by `local-storage`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// The URL that `cookies` are scoped to
    #[serde(default)]
    pub cookie_url: Option<Url>,
}

impl StorageConfig {
    /// Ephemeral in-process storage
    pub fn memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: None,
            cookie_url: None,
        }
    }

    /// Persistent storage in a local file
    pub fn local_storage(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: StorageKind::LocalStorage,
            path: Some(path.into()),
            cookie_url: None,
        }
    }

    /// Cookie storage scoped to `url`
    pub fn cookies(url: Url) -> Self {
        Self {
            kind: StorageKind::Cookies,
            path: None,
            cookie_url: Some(url),
        }
    }

    /// Constructs the configured backend
    ///
    /// # Errors
    ///
    /// Fails if a parameter required by the selected kind is missing or the
    /// kind was disabled at compile time.
    pub fn build(&self) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        match self.kind {
            StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageKind::LocalStorage => self.build_file(),
            StorageKind::Cookies => self.build_cookies(),
        }
    }

    /// Constructs the configured backend, placing cookies in `jar`
    ///
    /// Kinds other than `cookies` ignore the jar.
    #[cfg(feature = "cookies")]
    pub fn build_with_cookie_jar(
        &self,
        jar: Arc<reqwest::cookie::Jar>,
    ) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        match self.kind {
            StorageKind::Cookies => Ok(Arc::new(crate::storage::CookieStorage::with_jar(
                jar,
                self.require_cookie_url()?,
            ))),
            _ => self.build(),
        }
    }

    #[cfg(feature = "file")]
    fn build_file(&self) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        let path = self.path.clone().ok_or(ConfigError::MissingParameter {
            kind: self.kind,
            parameter: "path",
        })?;
        Ok(Arc::new(crate::storage::FileStorage::new(path)))
    }

    #[cfg(not(feature = "file"))]
    fn build_file(&self) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        Err(ConfigError::Disabled(self.kind))
    }

    #[cfg(feature = "cookies")]
    fn build_cookies(&self) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        Ok(Arc::new(crate::storage::CookieStorage::new(
            self.require_cookie_url()?,
        )))
    }

    #[cfg(not(feature = "cookies"))]
    fn build_cookies(&self) -> Result<Arc<dyn TokenStorage>, ConfigError> {
        Err(ConfigError::Disabled(self.kind))
    }

    #[cfg(feature = "cookies")]
    fn require_cookie_url(&self) -> Result<Url, ConfigError> {
        self.cookie_url.clone().ok_or(ConfigError::MissingParameter {
            kind: self.kind,
            parameter: "cookie_url",
        })
    }
}
