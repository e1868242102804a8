use std::{error, fmt, str::FromStr, sync::Arc, time::Duration};

use reqwest::{header, IntoUrl, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use serde::Serialize;
use tessera_clock::{Clock, System};
use tessera_tokens::{
    ConfigError, RefreshError, StorageConfig, Token, TokenConfig, TokenDecoder, TokenStorage,
};
use thiserror::Error;

use crate::{
    coordinator::RefreshCoordinator,
    middleware::{bearer_header, TokenMiddleware},
};

/// An HTTP method accepted by [`AuthClient::dispatch()`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchMethod {
    /// `GET`
    Get,
    /// `DELETE`
    Delete,
    /// `OPTIONS`
    Options,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
}

impl DispatchMethod {
    /// Whether requests with this method carry a body
    pub fn takes_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// The lowercase name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Delete => "delete",
            Self::Options => "options",
            Self::Head => "head",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for DispatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMethod {
    type Err = DispatchError;

    /// Parses a method name, ignoring ASCII case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const METHODS: [DispatchMethod; 7] = [
            DispatchMethod::Get,
            DispatchMethod::Delete,
            DispatchMethod::Options,
            DispatchMethod::Head,
            DispatchMethod::Post,
            DispatchMethod::Put,
            DispatchMethod::Patch,
        ];

        METHODS
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DispatchError::InvalidMethod(s.to_owned()))
    }
}

impl From<DispatchMethod> for reqwest::Method {
    fn from(method: DispatchMethod) -> Self {
        match method {
            DispatchMethod::Get => Self::GET,
            DispatchMethod::Delete => Self::DELETE,
            DispatchMethod::Options => Self::OPTIONS,
            DispatchMethod::Head => Self::HEAD,
            DispatchMethod::Post => Self::POST,
            DispatchMethod::Put => Self::PUT,
            DispatchMethod::Patch => Self::PATCH,
        }
    }
}

/// An error while dispatching a request
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The method is not one the dispatcher knows how to send
    #[error("unsupported request method `{0}`")]
    InvalidMethod(String),
    /// The token needed refreshing, and the refresh failed
    ///
    /// All requests that waited on the same refresh share this error. The
    /// token has been cleared, so the caller must authenticate again.
    #[error("token refresh failed")]
    Refresh(#[source] Arc<RefreshError>),
    /// The request body could not be serialized
    #[error("error serializing request body")]
    Body(#[source] serde_json::Error),
    /// The underlying transport failed
    #[error("error sending request")]
    Transport(#[source] reqwest_middleware::Error),
}

/// Per-request options
///
/// An `Authorization` header supplied here takes precedence over the
/// managed token.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct RequestConfig {
    headers: header::HeaderMap,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestConfig {
    /// Constructs an empty set of options
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing any earlier value with the same name
    pub fn with_header(mut self, name: header::HeaderName, value: header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Bounds the time allowed for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The headers to send
    pub fn headers(&self) -> &header::HeaderMap {
        &self.headers
    }
}

/// An HTTP client that keeps its bearer token fresh
///
/// Before each request dispatched through this client, the token is
/// refreshed if it has expired but is still within its refresh window.
/// Concurrent requests share a single refresh. Once any refresh has
/// settled, the current token is attached as a `Bearer` authorization.
///
/// Clones share the token, the transport, and the in-flight refresh.
///
/// # Timeouts
///
/// No timeout is applied to refreshes by this client. A refresh that never
/// completes holds up every request waiting on it. Bound these waits by
/// configuring a timeout on the `reqwest::Client` given to
/// [`AuthClientBuilder::with_client()`].
pub struct AuthClient<C = System> {
    token: Arc<Token<C>>,
    transport: ClientWithMiddleware,
    coordinator: RefreshCoordinator,
}

impl<C> Clone for AuthClient<C> {
    fn clone(&self) -> Self {
        Self {
            token: Arc::clone(&self.token),
            transport: self.transport.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for AuthClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("token", &self.token)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Starts building a client for the given token configuration
    ///
    /// Tokens are kept in memory unless another storage is selected.
    pub fn builder(config: TokenConfig) -> AuthClientBuilder {
        AuthClientBuilder {
            config,
            storage: StorageSource::Config(StorageConfig::memory()),
            client: None,
            clock: System,
            decoder: None,
            middleware: Vec::new(),
        }
    }
}

impl<C> AuthClient<C> {
    /// The managed token
    pub fn token(&self) -> &Arc<Token<C>> {
        &self.token
    }

    /// The underlying transport
    ///
    /// Requests sent directly through the transport still carry the current
    /// token if it has not expired, but never trigger a refresh.
    pub fn raw_transport(&self) -> &ClientWithMiddleware {
        &self.transport
    }

    /// The coordinator guarding refreshes of this client's token
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }
}

impl<C> AuthClient<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Sends a request after making sure the token is fresh
    ///
    /// `method` is one of `get`, `delete`, `options`, `head`, `post`, `put`,
    /// or `patch`, in any case. A body is only sent for `post`, `put`, and
    /// `patch`; it is ignored for the others.
    ///
    /// The token is attached only while it has not expired. A token that has
    /// expired beyond its refresh window is left in storage but not sent.
    ///
    /// Responses are returned whatever their status.
    ///
    /// # Errors
    ///
    /// An unknown method fails before any network activity. Otherwise, this
    /// fails if a needed refresh fails or the transport fails.
    pub async fn dispatch(
        &self,
        method: &str,
        url: impl IntoUrl,
        body: Option<serde_json::Value>,
        config: RequestConfig,
    ) -> Result<Response, DispatchError> {
        let method = method.parse()?;
        self.send(method, url, body, config).await
    }

    /// Sends a `GET` request
    pub async fn get(&self, url: impl IntoUrl, config: RequestConfig) -> Result<Response, DispatchError> {
        self.send(DispatchMethod::Get, url, None, config).await
    }

    /// Sends a `DELETE` request
    pub async fn delete(&self, url: impl IntoUrl, config: RequestConfig) -> Result<Response, DispatchError> {
        self.send(DispatchMethod::Delete, url, None, config).await
    }

    /// Sends an `OPTIONS` request
    pub async fn options(&self, url: impl IntoUrl, config: RequestConfig) -> Result<Response, DispatchError> {
        self.send(DispatchMethod::Options, url, None, config).await
    }

    /// Sends a `HEAD` request
    pub async fn head(&self, url: impl IntoUrl, config: RequestConfig) -> Result<Response, DispatchError> {
        self.send(DispatchMethod::Head, url, None, config).await
    }

    /// Sends a `POST` request with a JSON body
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: impl IntoUrl,
        body: &B,
        config: RequestConfig,
    ) -> Result<Response, DispatchError> {
        let body = serde_json::to_value(body).map_err(DispatchError::Body)?;
        self.send(DispatchMethod::Post, url, Some(body), config).await
    }

    /// Sends a `PUT` request with a JSON body
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        url: impl IntoUrl,
        body: &B,
        config: RequestConfig,
    ) -> Result<Response, DispatchError> {
        let body = serde_json::to_value(body).map_err(DispatchError::Body)?;
        self.send(DispatchMethod::Put, url, Some(body), config).await
    }

    /// Sends a `PATCH` request with a JSON body
    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        url: impl IntoUrl,
        body: &B,
        config: RequestConfig,
    ) -> Result<Response, DispatchError> {
        let body = serde_json::to_value(body).map_err(DispatchError::Body)?;
        self.send(DispatchMethod::Patch, url, Some(body), config).await
    }

    async fn send(
        &self,
        method: DispatchMethod,
        url: impl IntoUrl,
        body: Option<serde_json::Value>,
        config: RequestConfig,
    ) -> Result<Response, DispatchError> {
        let current = self
            .coordinator
            .ensure_fresh(&self.token, &self.transport)
            .await
            .map_err(|error| {
                tracing::warn!(
                    %method,
                    error = (&*error as &dyn error::Error),
                    "abandoning request after failed token refresh"
                );
                DispatchError::Refresh(error)
            })?;

        let RequestConfig {
            mut headers,
            query,
            timeout,
        } = config;

        if !headers.contains_key(header::AUTHORIZATION) && !self.token.is_expired() {
            if let Some(value) = current.as_deref().and_then(bearer_header) {
                headers.insert(header::AUTHORIZATION, value);
            }
        }

        let mut req = self.transport.request(method.into(), url).headers(headers);

        if !query.is_empty() {
            req = req.query(&query);
        }

        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        if let Some(body) = body.filter(|_| method.takes_body()) {
            req = req.json(&body);
        }

        tracing::trace!(%method, "dispatching request");
        req.send().await.map_err(DispatchError::Transport)
    }
}

/// An error while building an [`AuthClient`]
#[derive(Debug, Error)]
pub enum BuildError {
    /// The storage configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP client could not be constructed
    #[error("error constructing HTTP client")]
    Client(#[from] reqwest::Error),
}

enum StorageSource {
    Config(StorageConfig),
    Backend(Arc<dyn TokenStorage>),
}

/// Builds an [`AuthClient`]
#[must_use]
pub struct AuthClientBuilder<C = System> {
    config: TokenConfig,
    storage: StorageSource,
    client: Option<reqwest::Client>,
    clock: C,
    decoder: Option<Arc<dyn TokenDecoder>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<C: fmt::Debug> fmt::Debug for AuthClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let storage: &dyn fmt::Debug = match &self.storage {
            StorageSource::Config(config) => config,
            StorageSource::Backend(backend) => backend,
        };

        f.debug_struct("AuthClientBuilder")
            .field("config", &self.config)
            .field("storage", storage)
            .field("client", &self.client)
            .field("clock", &self.clock)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl<C> AuthClientBuilder<C> {
    /// Selects a storage backend by configuration
    pub fn with_storage_config(mut self, storage: StorageConfig) -> Self {
        self.storage = StorageSource::Config(storage);
        self
    }

    /// Uses an existing storage backend
    pub fn with_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = StorageSource::Backend(storage);
        self
    }

    /// Sends requests through the given client
    ///
    /// When cookie storage is configured and no client is given, a client
    /// sharing the storage's cookie jar is constructed.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces the default unverified JWT decoder
    pub fn with_decoder(mut self, decoder: impl TokenDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Appends middleware after the token middleware
    pub fn with<M: Middleware>(self, middleware: M) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    /// Appends shared middleware after the token middleware
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> AuthClientBuilder<D> {
        AuthClientBuilder {
            config: self.config,
            storage: self.storage,
            client: self.client,
            clock,
            decoder: self.decoder,
            middleware: self.middleware,
        }
    }
}

impl<C> AuthClientBuilder<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Constructs the client, loading any previously stored token
    ///
    /// # Errors
    ///
    /// Fails if the storage configuration is invalid or the HTTP client
    /// cannot be constructed.
    pub async fn build(self) -> Result<AuthClient<C>, BuildError> {
        let (storage, client) = match self.storage {
            StorageSource::Backend(storage) => (storage, self.client.unwrap_or_default()),
            StorageSource::Config(storage) => match self.client {
                Some(client) => (storage.build()?, client),
                None => storage_with_client(&storage)?,
            },
        };

        tracing::debug!(
            refresh_url = %self.config.refresh_url,
            refresh_window = self.config.refresh_window.0,
            "constructing authorized client"
        );

        let mut token = Token::builder(self.config, storage).with_clock(self.clock);
        if let Some(decoder) = self.decoder {
            token = token.with_shared_decoder(decoder);
        }
        let token = Arc::new(token.build().await);

        let transport = self
            .middleware
            .into_iter()
            .fold(
                ClientBuilder::new(client).with(TokenMiddleware::new(Arc::clone(&token))),
                ClientBuilder::with_arc,
            )
            .build();

        Ok(AuthClient {
            token,
            transport,
            coordinator: RefreshCoordinator::new(),
        })
    }
}

#[cfg(feature = "cookies")]
fn storage_with_client(
    storage: &StorageConfig,
) -> Result<(Arc<dyn TokenStorage>, reqwest::Client), BuildError> {
    if storage.kind != tessera_tokens::StorageKind::Cookies {
        return Ok((storage.build()?, reqwest::Client::default()));
    }

    let jar = Arc::new(reqwest::cookie::Jar::default());
    let backend = storage.build_with_cookie_jar(Arc::clone(&jar))?;
    let client = reqwest::Client::builder().cookie_provider(jar).build()?;
    Ok((backend, client))
}

#[cfg(not(feature = "cookies"))]
fn storage_with_client(
    storage: &StorageConfig,
) -> Result<(Arc<dyn TokenStorage>, reqwest::Client), BuildError> {
    Ok((storage.build()?, reqwest::Client::default()))
}
