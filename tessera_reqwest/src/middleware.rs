//! The pre-send hook that attaches the current token to outgoing requests

use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tessera_clock::{Clock, System};
use tessera_tokens::{AccessTokenRef, Token};

const BEARER_PREFIX: &[u8] = b"Bearer ";

/// A middleware that attaches a valid token to outgoing requests
///
/// The token is attached only if one is stored and it has not expired. This
/// middleware never triggers a refresh; requests sent with an expired token
/// go out without authorization.
///
/// If a request already carries an `Authorization` header by the time this
/// middleware executes, the existing value is left in place.
pub struct TokenMiddleware<C = System> {
    token: Arc<Token<C>>,
}

impl<C> TokenMiddleware<C> {
    /// Constructs the middleware around a shared token
    pub fn new(token: Arc<Token<C>>) -> Self {
        Self { token }
    }
}

impl<C> Clone for TokenMiddleware<C> {
    fn clone(&self) -> Self {
        Self {
            token: Arc::clone(&self.token),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenMiddleware<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenMiddleware")
            .field("token", &self.token)
            .finish()
    }
}

impl<C: Clock> TokenMiddleware<C> {
    async fn current_header(&self) -> Option<header::HeaderValue> {
        if self.token.is_expired() {
            tracing::trace!("token missing or expired, sending request without authorization");
            return None;
        }

        let token = self.token.get_token().await?;
        bearer_header(&token)
    }
}

#[async_trait::async_trait]
impl<C> Middleware for TokenMiddleware<C>
where
    C: Clock + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !req.headers().contains_key(header::AUTHORIZATION) {
            if let Some(value) = self.current_header().await {
                req.headers_mut().insert(header::AUTHORIZATION, value);
            }
        }

        next.run(req, extensions).await
    }
}

/// Renders a token as a sensitive `Bearer` authorization value
///
/// Tokens containing bytes that cannot appear in a header are dropped.
pub(crate) fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + BEARER_PREFIX.len());
    header_value.put_slice(BEARER_PREFIX);
    header_value.put_slice(token.as_str().as_bytes());

    match header::HeaderValue::from_maybe_shared(header_value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("token contains bytes not allowed in a header, not attaching it");
            None
        }
    }
}
