//! Claims extraction from compact JWTs

use aliri_base64::{Base64Url, InvalidBase64Data};
use serde::{Deserialize, Serialize};
use tessera_clock::UnixTime;
use thiserror::Error;

use crate::AccessTokenRef;

/// The claims carried by a bearer token
///
/// Only the issuance and expiry numeric dates drive token lifecycle
/// decisions. All other claims are retained for inspection by the
/// embedding application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    exp: UnixTime,
    iat: UnixTime,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

impl TokenClaims {
    /// Constructs a claims set from its lifecycle dates
    pub fn new(issued: UnixTime, expiry: UnixTime) -> Self {
        Self {
            exp: expiry,
            iat: issued,
            other: serde_json::Map::new(),
        }
    }

    /// Adds a custom claim
    pub fn with_claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.other.insert(name.into(), value);
        self
    }

    /// The time after which the token is no longer valid (`exp`)
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.exp
    }

    /// The time at which the token was issued (`iat`)
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.iat
    }

    /// Looks up a claim other than `exp` or `iat`
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.other.get(name)
    }

    /// All claims other than `exp` and `iat`
    pub fn other_claims(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.other
    }
}

/// An error extracting claims from a token
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token is not made of three `.`-separated segments
    #[error("token is not a compact JWT")]
    Malformed,
    /// The payload segment is not valid base64url
    #[error("token payload is not valid base64url")]
    PayloadEncoding(#[from] InvalidBase64Data),
    /// The payload is not a JSON object with numeric `exp` and `iat` claims
    #[error("token payload does not contain usable claims")]
    Claims(#[from] serde_json::Error),
}

/// Extracts claims from a raw bearer token
pub trait TokenDecoder: Send + Sync {
    /// Decodes the claims of `token`
    fn decode(&self, token: &AccessTokenRef) -> Result<TokenClaims, DecodeError>;
}

impl<F> TokenDecoder for F
where
    F: Fn(&AccessTokenRef) -> Result<TokenClaims, DecodeError> + Send + Sync,
{
    fn decode(&self, token: &AccessTokenRef) -> Result<TokenClaims, DecodeError> {
        self(token)
    }
}

/// Reads the claims of a compact JWT without verifying its signature
///
/// The signature is the issuing server's concern. A client only needs the
/// timing claims to decide when to renew the token.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnverifiedJwtDecoder;

impl TokenDecoder for UnverifiedJwtDecoder {
    fn decode(&self, token: &AccessTokenRef) -> Result<TokenClaims, DecodeError> {
        let mut segments = token.as_str().split('.');
        let payload = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(DecodeError::Malformed),
        };

        let raw = Base64Url::from_encoded(payload)?;
        Ok(serde_json::from_slice(raw.as_slice())?)
    }
}


#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::{test_util::*, *};

    #[test]
    fn decodes_lifecycle_and_custom_claims() -> Result<()> {
        let token = jwt(900, 1000);

        let claims = UnverifiedJwtDecoder.decode(&token)?;

        assert_eq!(claims.issued(), UnixTime(900));
        assert_eq!(claims.expiry(), UnixTime(1000));
        assert_eq!(claims.get("sub"), Some(&json!("tessera")));
        assert!(claims.get("exp").is_none());
        Ok(())
    }

    #[test]
    fn rejects_tokens_without_three_segments() {
        let token = AccessTokenRef::from_str("abc.def");
        assert!(matches!(
            UnverifiedJwtDecoder.decode(token),
            Err(DecodeError::Malformed)
        ));

        let token = AccessTokenRef::from_str("a.b.c.d");
        assert!(matches!(
            UnverifiedJwtDecoder.decode(token),
            Err(DecodeError::Malformed)
        ));
    }

    #[test]
    fn rejects_payloads_that_are_not_base64url() {
        let token = AccessTokenRef::from_str("abc.d*f.ghi");
        assert!(matches!(
            UnverifiedJwtDecoder.decode(token),
            Err(DecodeError::PayloadEncoding(_))
        ));
    }

    #[test]
    fn rejects_payloads_missing_timing_claims() {
        let token = jwt_with_claims(json!({ "sub": "tessera", "exp": 1000 }));
        assert!(matches!(
            UnverifiedJwtDecoder.decode(&token),
            Err(DecodeError::Claims(_))
        ));
    }

    #[test]
    fn closures_can_act_as_decoders() -> Result<()> {
        let decoder = |_: &AccessTokenRef| -> Result<TokenClaims, DecodeError> {
            Ok(TokenClaims::new(UnixTime(1), UnixTime(2)))
        };
        let claims = decoder.decode(AccessTokenRef::from_str("opaque"))?;
        assert_eq!(claims.expiry(), UnixTime(2));
        Ok(())
    }
}
