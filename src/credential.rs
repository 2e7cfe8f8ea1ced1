//! Parsing of the vendor's `/api/ap` credential payload.
//!
//! The web portal hands out an HTML page with a hidden input carrying a JSON
//! blob of bearer tokens:
//!
//! ```text
//! <html><head></head><body><input id="ap" type="hidden" value='{"Tokens":[...],...}' /></body></html>
//! ```
//!
//! The portal's own output uses the entity-quoted variant
//! (`value="{&quot;Tokens&quot;:...}"`); both are accepted.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::token::{TokenClaims, decode_claims};

/// Parsed `/api/ap` payload.
///
/// Replaced as a whole after a refresh, never patched in place.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub struct Credential {
    /// One bearer token per student on the account.
    pub tokens: Vec<String>,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Long-lived token used to fetch fresh bearer tokens.
    pub access_token: String,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Credential {
    /// Create a credential with only the required fields.
    #[must_use]
    pub fn new(tokens: Vec<String>, access_token: impl Into<String>) -> Self {
        Self {
            tokens,
            alias: String::new(),
            email: None,
            access_token: access_token.into(),
            given_name: None,
            surname: None,
            success: None,
            capabilities: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Parses an `/api/ap` page without checking token expiry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCredential`] if the page has no `ap` value,
    /// the value is not the expected JSON, or it carries no tokens.
    pub fn parse_offline(ap_html: &str) -> Result<Self, Error> {
        let json = extract_ap_json(ap_html)?;
        let credential: Self = serde_json::from_str(&json)
            .map_err(|e| Error::MalformedCredential(format!("invalid ap JSON: {e}")))?;
        if credential.tokens.is_empty() {
            return Err(Error::MalformedCredential("ap payload carries no tokens".into()));
        }
        Ok(credential)
    }

    /// Bearer token at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the account has fewer tokens.
    pub fn token(&self, index: usize) -> Result<&str, Error> {
        self.tokens.get(index).map(String::as_str).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "token index {index} out of range ({} tokens)",
                self.tokens.len()
            ))
        })
    }

    /// Decoded claims of the token at `index`.
    ///
    /// # Errors
    ///
    /// See [`Credential::token`] and [`decode_claims`].
    pub fn token_claims(&self, index: usize) -> Result<TokenClaims, Error> {
        decode_claims(self.token(index)?)
    }

    /// Indexes of tokens whose `exp` lies before `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCredential`] if a token cannot be decoded.
    pub fn expired_tokens(&self, now: i64) -> Result<Vec<usize>, Error> {
        let mut expired = Vec::new();
        for (index, token) in self.tokens.iter().enumerate() {
            if decode_claims(token)?.is_expired_at(now) {
                expired.push(index);
            }
        }
        Ok(expired)
    }

    /// Whether any token has expired at `now`.
    ///
    /// # Errors
    ///
    /// See [`Credential::expired_tokens`].
    pub fn has_expired_token(&self, now: i64) -> Result<bool, Error> {
        Ok(!self.expired_tokens(now)?.is_empty())
    }

    /// Renders the canonical single-quoted `/api/ap` page for this credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_ap_html(&self) -> Result<String, Error> {
        Ok(ap_html(&serde_json::to_string(self)?))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("tokens", &self.tokens.len())
            .field("alias", &self.alias)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Extracts the JSON text of the `ap` hidden input.
///
/// # Errors
///
/// Returns [`Error::MalformedCredential`] for any other layout.
pub fn extract_ap_json(ap_html: &str) -> Result<String, Error> {
    if let Some((_, rest)) = ap_html.split_once("value='") {
        let (json, _) = rest
            .split_once("' />")
            .ok_or_else(|| Error::MalformedCredential("unterminated ap value".into()))?;
        return Ok(json.to_owned());
    }
    if let Some((_, rest)) = ap_html.split_once("value=\"") {
        let (json, _) = rest
            .split_once('"')
            .ok_or_else(|| Error::MalformedCredential("unterminated ap value".into()))?;
        return Ok(json.replace("&quot;", "\"").replace("&amp;", "&"));
    }
    Err(Error::MalformedCredential("no ap value attribute".into()))
}

/// Rewrites any accepted `ap` input as the canonical single-quoted page.
///
/// Accepts either HTML variant or a bare JSON object.
///
/// # Errors
///
/// Returns [`Error::MalformedCredential`] if no JSON object can be recovered.
pub fn normalize_ap(input: &str) -> Result<String, Error> {
    let trimmed = input.trim();
    let json = if trimmed.starts_with('{') {
        trimmed.to_owned()
    } else {
        extract_ap_json(trimmed)?
    };
    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| Error::MalformedCredential(format!("invalid ap JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::MalformedCredential("ap value is not a JSON object".into()));
    }
    Ok(ap_html(&value.to_string()))
}

fn ap_html(json: &str) -> String {
    // A raw apostrophe would end the single-quoted attribute.
    let json = json.replace('\'', "\\u0027");
    format!(r#"<html><head></head><body><input id="ap" type="hidden" value='{json}' /></body></html>"#)
}

#[cfg(feature = "client")]
pub use refresh::CredentialParser;

#[cfg(feature = "client")]
mod refresh {
    use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
    use tracing::{debug, info, instrument, warn};

    use super::Credential;
    use crate::config::ClientConfig;
    use crate::error::Error;
    use crate::signer::http_date;
    use crate::token::unix_now;

    /// Parses `/api/ap` pages and refreshes expired tokens from the vendor.
    #[derive(Debug, Clone)]
    pub struct CredentialParser {
        config: ClientConfig,
        http: reqwest::Client,
    }

    impl CredentialParser {
        #[must_use]
        pub fn new(config: ClientConfig) -> Self {
            Self {
                config,
                http: reqwest::Client::new(),
            }
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        /// Parses `ap_html`, refreshing the whole credential if any token has expired.
        ///
        /// # Errors
        ///
        /// Returns [`Error::MalformedCredential`] for unparsable input and
        /// [`Error::CredentialRefresh`] if a needed refresh fails or still
        /// yields expired tokens.
        pub async fn parse(&self, ap_html: &str) -> Result<Credential, Error> {
            let credential = Credential::parse_offline(ap_html)?;
            let expired = credential.expired_tokens(unix_now())?;
            if expired.is_empty() {
                return Ok(credential);
            }
            info!(?expired, "credential has expired tokens, refreshing");
            self.refresh(&credential).await
        }

        /// Fetches a fresh `/api/ap` page with the credential's access token.
        ///
        /// # Errors
        ///
        /// Returns [`Error::CredentialRefresh`] on any failure.
        #[instrument(skip_all, fields(url = %self.config.ap_url))]
        pub async fn refresh(&self, stale: &Credential) -> Result<Credential, Error> {
            let vdate = http_date(time::OffsetDateTime::now_utc())?;
            let device = &self.config.device;

            let response = self
                .http
                .get(self.config.ap_url.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, &device.user_agent)
                .header(AUTHORIZATION, format!("Bearer {}", stale.access_token))
                .header("vapi", device.api_version.to_string())
                .header("vcanonicalurl", "api%2fap")
                .header("vdate", vdate)
                .header("vos", &device.os)
                .header("vversioncode", &device.version_code)
                .send()
                .await
                .map_err(|e| Error::CredentialRefresh(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::CredentialRefresh(e.to_string()))?;
            if !status.is_success() {
                warn!(%status, "credential refresh rejected");
                return Err(Error::CredentialRefresh(format!("HTTP {status}")));
            }

            let fresh = Credential::parse_offline(&body)
                .map_err(|e| Error::CredentialRefresh(e.to_string()))?;
            let still_expired = fresh
                .has_expired_token(unix_now())
                .map_err(|e| Error::CredentialRefresh(e.to_string()))?;
            if still_expired {
                return Err(Error::CredentialRefresh(
                    "refreshed credential still carries expired tokens".into(),
                ));
            }
            debug!(tokens = fresh.tokens.len(), "credential refreshed");
            Ok(fresh)
        }
    }
}
