/// Vendor status codes that mean the registered device is no longer accepted.
///
/// 100: certificate unknown, 101: signature rejected, 108: device unregistered.
pub const AUTH_FAILURE_CODES: &[i64] = &[100, 101, 108];

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Malformed request path (expected `api/mobile/...`): {0}")]
    MalformedPath(String),

    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Token {index} expired at {exp}")]
    ExpiredToken { index: usize, exp: i64 },

    #[error("Credential refresh failed: {0}")]
    CredentialRefresh(String),

    #[error("Vendor error {code}: {message}")]
    VendorProtocol { code: i64, message: String },

    #[error("Empty envelope: {0}")]
    EmptyEnvelope(&'static str),

    #[error("Not connected: register the device first")]
    NotConnected,

    #[error("Missing date range")]
    MissingDateRange,

    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether this error means the vendor no longer accepts the registered device.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::VendorProtocol { code, .. } => {
                AUTH_FAILURE_CODES.contains(code) || *code == 401 || *code == 403
            }
            _ => false,
        }
    }
}
