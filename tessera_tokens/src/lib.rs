//! Self-renewing bearer tokens for HTTP clients
//!
//! A [`Token`] holds a JSON Web Token that the caller already obtained. It
//! derives the token's validity window from the `iat` and `exp` claims,
//! persists the raw token through a pluggable [`TokenStorage`], and knows how
//! to exchange an expired token for a fresh one at a refresh endpoint.
//!
//! Two questions drive every outbound request:
//!
//! * Is the token expired? A token is expired once the current time reaches
//!   its `exp` claim. A missing token is always expired.
//! * Can the token still be refreshed? A stored token may be exchanged until
//!   its _refresh window_ has elapsed since `iat`, independent of `exp`.
//!
//! A token should be refreshed exactly when both hold. Once the refresh
//! window has closed, the caller must authenticate again by other means.
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera_clock::DurationSecs;
//! use tessera_tokens::{storage::MemoryStorage, Token, TokenConfig};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config = TokenConfig::new("https://example.com/auth/refresh".parse().unwrap())
//!     .with_refresh_window(DurationSecs(60 * 60))
//!     .with_storage_namespace("app1");
//!
//! let token = Token::new(config, Arc::new(MemoryStorage::new())).await;
//!
//! assert_eq!(token.storage_key().as_str(), "app1_Authorization");
//! assert!(token.is_expired());
//! assert!(!token.should_refresh().await);
//! # }
//! ```
//!
//! The actual coordination of refreshes across concurrent requests lives in
//! the `tessera_reqwest` crate.
//!
//! # Features
//!
//! The following features are enabled by default:
//!
//! * `file`: Provides [`FileStorage`][storage::FileStorage], a persistent
//!   key-value store in a local file (the `local-storage` kind).
//! * `cookies`: Provides [`CookieStorage`][storage::CookieStorage], which keeps
//!   the token in a `reqwest` cookie jar (the `cookies` kind).

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
mod config;
mod refresh;
pub mod storage;
mod token;

pub use braids::*;
pub use claims::{DecodeError, TokenClaims, TokenDecoder, UnverifiedJwtDecoder};
pub use config::{
    ConfigError, StorageConfig, StorageKind, TokenConfig, DEFAULT_ACCESS_TOKEN_POINTER,
    DEFAULT_REFRESH_WINDOW,
};
pub use refresh::RefreshError;
pub use storage::{StorageError, TokenStorage};
pub use token::{SetTokenError, Token, TokenBuilder};
