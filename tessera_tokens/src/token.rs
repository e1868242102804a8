use std::{error, fmt, sync::Arc};

use reqwest_middleware::ClientWithMiddleware;
use tessera_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    claims::{DecodeError, TokenClaims, TokenDecoder, UnverifiedJwtDecoder},
    refresh::{self, RefreshError},
    storage::{StorageError, TokenStorage},
    AccessToken, AccessTokenRef, StorageKey, TokenConfig,
};

const BEARER_PREFIX: &str = "Bearer ";

/// An error while setting a new token
///
/// A token that fails to be set is always cleared, both in memory and in
/// storage.
#[derive(Debug, Error)]
pub enum SetTokenError {
    /// The supplied value was not a string
    #[error("token value is not a string")]
    NotAString,
    /// The token's claims could not be decoded
    #[error("token claims could not be decoded")]
    Undecodable(#[from] DecodeError),
    /// The token could not be persisted
    #[error("token could not be persisted")]
    Storage(#[source] StorageError),
}

/// A bearer token, its decoded claims, and its persisted form
///
/// The raw token lives in a [`TokenStorage`] and is read through on every
/// access, so changes made by another holder of the same storage are seen.
/// The decoded claims are held in memory and always match the token most
/// recently set through this instance.
pub struct Token<C = System> {
    config: TokenConfig,
    key: StorageKey,
    storage: Arc<dyn TokenStorage>,
    decoder: Arc<dyn TokenDecoder>,
    clock: C,
    claims: watch::Sender<Option<Arc<TokenClaims>>>,
}

impl<C: fmt::Debug> fmt::Debug for Token<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Token")
            .field("config", &self.config)
            .field("key", &self.key)
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .field("claims", &*self.claims.borrow())
            .finish()
    }
}

/// Builds a [`Token`], hydrating it from storage
#[must_use]
pub struct TokenBuilder<C = System> {
    config: TokenConfig,
    storage: Arc<dyn TokenStorage>,
    decoder: Arc<dyn TokenDecoder>,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for TokenBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenBuilder")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<C> TokenBuilder<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenBuilder<D> {
        TokenBuilder {
            config: self.config,
            storage: self.storage,
            decoder: self.decoder,
            clock,
        }
    }

    /// Replaces the default unverified JWT decoder
    pub fn with_decoder(self, decoder: impl TokenDecoder + 'static) -> Self {
        self.with_shared_decoder(Arc::new(decoder))
    }

    /// Replaces the default unverified JWT decoder with a shared one
    pub fn with_shared_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }
}

impl<C: Clock> TokenBuilder<C> {
    /// Constructs the token, loading any previously stored value
    ///
    /// A stored value whose claims cannot be decoded is discarded.
    pub async fn build(self) -> Token<C> {
        let (claims, _) = watch::channel(None);
        let token = Token {
            key: StorageKey::namespaced(self.config.storage_namespace.as_deref()),
            config: self.config,
            storage: self.storage,
            decoder: self.decoder,
            clock: self.clock,
            claims,
        };

        token.hydrate().await;
        token
    }
}

impl Token {
    /// Constructs a token using the system clock, loading any stored value
    pub async fn new(config: TokenConfig, storage: Arc<dyn TokenStorage>) -> Self {
        Self::builder(config, storage).build().await
    }

    /// Starts building a token with custom components
    pub fn builder(config: TokenConfig, storage: Arc<dyn TokenStorage>) -> TokenBuilder {
        TokenBuilder {
            config,
            storage,
            decoder: Arc::new(UnverifiedJwtDecoder),
            clock: System,
        }
    }
}

impl<C> Token<C> {
    /// The configuration this token was built with
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// The key this token is persisted under
    pub fn storage_key(&self) -> &StorageKey {
        &self.key
    }

    /// The claims of the current token, if any
    pub fn claims(&self) -> Option<Arc<TokenClaims>> {
        self.claims.borrow().clone()
    }

    /// Subscribes to changes of the decoded claims
    ///
    /// The receiver sees a new value each time a token is set or cleared.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TokenClaims>>> {
        self.claims.subscribe()
    }

    /// Reads the currently persisted raw token
    ///
    /// A storage failure is logged and reads as no token.
    pub async fn get_token(&self) -> Option<AccessToken> {
        match self.storage.get_item(self.key.as_str()).await {
            Ok(value) => value.map(AccessToken::new),
            Err(error) => {
                tracing::warn!(
                    storage.key = %self.key,
                    error = (&*error as &dyn error::Error),
                    "unable to read token from storage"
                );
                None
            }
        }
    }

    /// Normalizes, decodes, and persists a new token
    ///
    /// A leading `Bearer ` is dropped before the token is used. On failure
    /// the token is cleared and the problem is logged; the returned error
    /// may be ignored by callers that only need the cleared state.
    pub async fn set_token(&self, token: &str) -> Result<AccessToken, SetTokenError> {
        let token = AccessTokenRef::from_str(token.strip_prefix(BEARER_PREFIX).unwrap_or(token));

        let claims = match self.decoder.decode(token) {
            Ok(claims) => claims,
            Err(error) => {
                tracing::warn!(
                    storage.key = %self.key,
                    error = (&error as &dyn error::Error),
                    "discarding token with undecodable claims"
                );
                self.remove_token().await;
                return Err(error.into());
            }
        };

        if let Err(error) = self.storage.set_item(self.key.as_str(), token.as_str()).await {
            tracing::warn!(
                storage.key = %self.key,
                error = (&*error as &dyn error::Error),
                "unable to persist token"
            );
            self.remove_token().await;
            return Err(SetTokenError::Storage(error));
        }

        tracing::debug!(
            storage.key = %self.key,
            token.issued = claims.issued().0,
            token.expiry = claims.expiry().0,
            "stored token"
        );

        self.claims.send_replace(Some(Arc::new(claims)));
        Ok(token.to_owned())
    }

    /// Sets a token from an arbitrary JSON value
    ///
    /// Anything other than a string clears the token.
    pub async fn set_token_value(
        &self,
        value: &serde_json::Value,
    ) -> Result<AccessToken, SetTokenError> {
        match value.as_str() {
            Some(token) => self.set_token(token).await,
            None => {
                tracing::warn!(storage.key = %self.key, "discarding token value that is not a string");
                self.remove_token().await;
                Err(SetTokenError::NotAString)
            }
        }
    }

    /// Clears the persisted token and its decoded claims
    pub async fn remove_token(&self) {
        if let Err(error) = self.storage.remove_item(self.key.as_str()).await {
            tracing::warn!(
                storage.key = %self.key,
                error = (&*error as &dyn error::Error),
                "unable to remove token from storage"
            );
        }

        self.claims.send_replace(None);
    }

    async fn hydrate(&self) {
        if let Some(stored) = self.get_token().await {
            tracing::trace!(storage.key = %self.key, "hydrating token from storage");
            let _ = self.set_token(stored.as_str()).await;
        }
    }
}

impl<C: Clock> Token<C> {
    /// Whether the token is expired
    ///
    /// A token without claims is always expired.
    pub fn is_expired(&self) -> bool {
        let now = self.clock.now();
        self.claims
            .borrow()
            .as_ref()
            .map_or(true, |claims| now >= claims.expiry())
    }

    /// Whether a token is stored and is still within its refresh window
    pub async fn can_refresh(&self) -> bool {
        let within_window = {
            let now = self.clock.now();
            self.claims
                .borrow()
                .as_ref()
                .map_or(false, |claims| {
                    claims.issued() + self.config.refresh_window > now
                })
        };

        within_window && self.get_token().await.is_some()
    }

    /// Whether the token is expired but can still be refreshed
    pub async fn should_refresh(&self) -> bool {
        self.is_expired() && self.can_refresh().await
    }

    /// Exchanges the current token for a fresh one
    ///
    /// On success the new token is stored and returned. On any failure the
    /// token is cleared, forcing re-authentication.
    pub async fn refresh(&self, transport: &ClientWithMiddleware) -> Result<AccessToken, RefreshError> {
        match self.exchange(transport).await {
            Ok(token) => {
                if let Some(claims) = self.claims() {
                    tracing::info!(
                        storage.key = %self.key,
                        token.issued = claims.issued().0,
                        token.expiry = claims.expiry().0,
                        "refreshed token"
                    );
                }
                Ok(token)
            }
            Err(error) => {
                tracing::warn!(
                    storage.key = %self.key,
                    error = (&error as &dyn error::Error),
                    "token refresh failed, clearing token"
                );
                self.remove_token().await;
                Err(error)
            }
        }
    }

    async fn exchange(&self, transport: &ClientWithMiddleware) -> Result<AccessToken, RefreshError> {
        let current = self.get_token().await.ok_or(RefreshError::NoToken)?;

        let value = refresh::request_token(
            transport,
            self.config.refresh_url.clone(),
            &current,
            &self.config.access_token_pointer,
        )
        .await?;

        Ok(self.set_token_value(&value).await?)
    }
}
