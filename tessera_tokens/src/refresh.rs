//! The exchange of a token for a fresh one at the refresh endpoint

use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{token::SetTokenError, AccessTokenRef};

/// An error while attempting to refresh a token
#[derive(Debug, Error)]
pub enum RefreshError {
    /// There was no stored token to exchange
    #[error("no token is stored, nothing to refresh")]
    NoToken,
    /// Unable to send the refresh request
    #[error("error sending refresh request")]
    RequestSend(#[source] reqwest_middleware::Error),
    /// The refresh endpoint answered with an error status
    #[error("error refreshing token: {body}")]
    ErrorWithBody {
        /// The underlying status error
        source: reqwest::Error,
        /// The body of the error response
        body: String,
    },
    /// Unable to read the response
    #[error("error reading refresh response body")]
    BodyRead(#[source] reqwest::Error),
    /// The response body is not JSON
    #[error("error deserializing refresh response body")]
    ResponseBody(#[from] serde_json::Error),
    /// The response did not carry a token that could be stored
    #[error("refresh response did not carry a usable token")]
    InvalidToken(#[from] SetTokenError),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    token: &'a str,
}

/// Posts the current token to the refresh endpoint
///
/// Returns whatever value sits at `pointer` in the response body, or `null`
/// if there is nothing there. Deciding whether that value is a usable token
/// is left to the caller.
#[tracing::instrument(
    err,
    skip(client, refresh_url, current),
    fields(refresh_url = %refresh_url),
)]
pub(crate) async fn request_token(
    client: &ClientWithMiddleware,
    refresh_url: Url,
    current: &AccessTokenRef,
    pointer: &str,
) -> Result<serde_json::Value, RefreshError> {
    tracing::trace!("requesting token refresh");

    let resp = client
        .post(refresh_url)
        .json(&RefreshRequest {
            token: current.as_str(),
        })
        .send()
        .await
        .map_err(RefreshError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received refresh response"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp.text().await.map_err(RefreshError::BodyRead)?;
        return Err(RefreshError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp.bytes().await.map_err(RefreshError::BodyRead)?;
    let mut resp: serde_json::Value = serde_json::from_slice(&body)?;

    Ok(resp
        .pointer_mut(pointer)
        .map(serde_json::Value::take)
        .unwrap_or_default())
}
