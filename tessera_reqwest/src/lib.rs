//! An HTTP client that keeps its bearer token fresh
//!
//! [`AuthClient`] wraps a [`reqwest`] client and a [`Token`][tessera_tokens::Token].
//! Before dispatching a request, it checks whether the token has expired but
//! may still be refreshed. If so, it exchanges the token at the configured
//! refresh endpoint and attaches the new token to the request. Any number of
//! concurrent requests share a single refresh through the
//! [`RefreshCoordinator`], and all of them observe its outcome.
//!
//! ```no_run
//! use tessera_reqwest::{AuthClient, RequestConfig};
//! use tessera_tokens::{StorageConfig, TokenConfig};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TokenConfig::new("https://api.example.com/auth/refresh".parse()?);
//!
//! let client = AuthClient::builder(config)
//!     .with_storage_config(StorageConfig::local_storage("tokens.json"))
//!     .build()
//!     .await?;
//!
//! // A token obtained at login
//! client.token().set_token("Bearer eyJhbGciOi...").await.ok();
//!
//! let resp = client
//!     .get("https://api.example.com/v1/widgets", RequestConfig::new())
//!     .await?;
//! # drop(resp);
//! # Ok(())
//! # }
//! ```
//!
//! Requests sent through [`raw_transport()`][AuthClient::raw_transport()]
//! bypass refreshes entirely. They still pass through the
//! [`TokenMiddleware`], which attaches the current token only while it has
//! not expired.
//!
//! An `Authorization` header supplied by the caller is never overwritten.

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

mod client;
mod coordinator;
mod middleware;

#[cfg(test)]
mod test_util;

pub use client::{
    AuthClient, AuthClientBuilder, BuildError, DispatchError, DispatchMethod, RequestConfig,
};
pub use coordinator::RefreshCoordinator;
pub use middleware::TokenMiddleware;
