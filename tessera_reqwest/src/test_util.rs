use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use aliri_base64::Base64Url;
use reqwest::{header, Method, Request, Response};
use reqwest_middleware::{Middleware, Next};
use serde_json::json;
use tessera_clock::DurationSecs;
use tessera_tokens::{AccessToken, TokenConfig};

pub const REFRESH_URL: &str = "https://api.example.com/auth/refresh";
pub const API_URL: &str = "https://api.example.com/v1/widgets";

pub fn config() -> TokenConfig {
    TokenConfig::new(REFRESH_URL.parse().unwrap()).with_refresh_window(DurationSecs(200))
}

/// Builds an unsigned compact JWT carrying the given lifecycle claims
pub fn jwt(iat: u64, exp: u64) -> AccessToken {
    let header = Base64Url::from_raw(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
    let payload = Base64Url::from_raw(json!({ "sub": "tessera", "iat": iat, "exp": exp }).to_string());
    AccessToken::new(format!("{}.{}.c2lnbmF0dXJl", header, payload))
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub authorization: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// Terminal middleware standing in for the remote API and refresh endpoint
///
/// Refresh responses are delayed so that concurrent callers overlap.
#[derive(Debug)]
pub struct StubServer {
    refresh_response: Mutex<(u16, serde_json::Value)>,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
    failing_url: Option<&'static str>,
}

impl StubServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_refresh_response(self: Arc<Self>, status: u16, body: serde_json::Value) -> Arc<Self> {
        *self.refresh_response.lock().unwrap() = (status, body);
        self
    }

    pub fn failing_on(url: &'static str) -> Arc<Self> {
        Arc::new(Self {
            failing_url: Some(url),
            ..Self::default()
        })
    }

    pub fn set_refresh_token(&self, token: &AccessToken) {
        *self.refresh_response.lock().unwrap() =
            (200, json!({ "data": { "access_token": token.as_str() } }));
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::Acquire)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(status: u16, body: String) -> Response {
        http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
            .into()
    }
}

impl Default for StubServer {
    fn default() -> Self {
        Self {
            refresh_response: Mutex::new((500, json!({ "error": "unexpected refresh" }))),
            refresh_delay: Duration::from_millis(20),
            refresh_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            failing_url: None,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for StubServer {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if req.method() == Method::POST && req.url().as_str() == REFRESH_URL {
            self.refresh_calls.fetch_add(1, Ordering::AcqRel);
            tokio::time::sleep(self.refresh_delay).await;

            let (status, body) = self.refresh_response.lock().unwrap().clone();
            return Ok(Self::respond(status, body.to_string()));
        }

        if self.failing_url == Some(req.url().as_str()) {
            return Err(reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                "connection reset by peer"
            )));
        }

        let recorded = Recorded {
            method: req.method().clone(),
            url: req.url().to_string(),
            authorization: req
                .headers()
                .get(header::AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_owned()),
            body: req
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| serde_json::from_slice(b).unwrap()),
        };
        self.requests.lock().unwrap().push(recorded);

        Ok(Self::respond(200, json!({ "ok": true }).to_string()))
    }
}
