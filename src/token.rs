use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Claims of a vendor bearer token.
///
/// Decoded without signature verification: the tokens are opaque to the
/// client and only the vendor validates them.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Expiry as Unix seconds.
    #[serde(default)]
    pub exp: Option<i64>,
    /// School-district tenant the token belongs to.
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, JsonValue>,
}

impl TokenClaims {
    /// Gets any other claim by key.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }

    /// A token without `exp` never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| exp < now)
    }
}

/// Decodes the payload segment of a JWT.
///
/// # Errors
///
/// Returns [`Error::MalformedCredential`] if the token is not three
/// dot-separated segments or the payload is not base64url JSON.
pub fn decode_claims(token: &str) -> Result<TokenClaims, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::MalformedCredential("token is not a JWT".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::MalformedCredential("invalid token payload".into()))?;

    serde_json::from_slice(&payload)
        .map_err(|e| Error::MalformedCredential(format!("invalid token claims: {e}")))
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
