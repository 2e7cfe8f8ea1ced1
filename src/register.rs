//! Two-step device registration.
//!
//! 1. `register/jwt` binds the device certificate to one bearer token and
//!    returns the tenant's REST URL.
//! 2. `register/hebe` lists the pupils reachable through that registration.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::macros::format_description;
use url::Url;

use crate::config::DeviceProfile;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::keys::KeyMaterial;
use crate::types::{ConstituentId, PeriodId, PupilId, UnitId};

/// Result of `register/jwt`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct JwtSession {
    /// Tenant-scoped REST base, e.g. `https://lekcjaplus.vulcan.net.pl/powiatwulkanowy`.
    pub rest_url: Url,
    pub tenant: String,
    pub envelope: Envelope<JsonValue>,
}

/// School unit the pupil is enrolled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: UnitId,
    pub symbol: String,
}

/// A registered pupil, read-only once created.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PupilSession {
    pub rest_url: Url,
    pub symbol_number: String,
    pub pupil_id: PupilId,
    pub constituent_id: ConstituentId,
    pub unit: Option<UnitInfo>,
    /// `MessageBox.GlobalKey`
    pub message_box: Option<String>,
    pub current_period: Option<PeriodId>,
    /// First element of the `register/hebe` envelope.
    pub envelope: JsonValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PupilEntry {
    links: LinksEntry,
    pupil: IdEntry,
    constituent_unit: IdEntry,
    #[serde(default)]
    unit: Option<UnitEntry>,
    #[serde(default)]
    message_box: Option<MessageBoxEntry>,
    #[serde(default)]
    periods: Vec<PeriodEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LinksEntry {
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdEntry {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UnitEntry {
    id: i64,
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageBoxEntry {
    global_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PeriodEntry {
    id: i64,
    #[serde(default)]
    current: bool,
}

impl PupilSession {
    /// Reads the first pupil of a `register/hebe` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyEnvelope`] for an empty array and
    /// [`Error::VendorProtocol`] with code `-1` for any other shape.
    pub fn from_envelope(rest_url: Url, envelope: &Envelope<JsonValue>) -> Result<Self, Error> {
        let pupils = envelope.envelope.as_array().ok_or_else(|| Error::VendorProtocol {
            code: -1,
            message: "register/hebe envelope is not an array".into(),
        })?;
        let first = pupils.first().ok_or(Error::EmptyEnvelope("register/hebe"))?;
        let entry: PupilEntry =
            serde_json::from_value(first.clone()).map_err(|e| Error::VendorProtocol {
                code: -1,
                message: format!("unexpected pupil entry: {e}"),
            })?;

        Ok(Self {
            rest_url,
            symbol_number: entry.links.symbol,
            pupil_id: PupilId(entry.pupil.id),
            constituent_id: ConstituentId(entry.constituent_unit.id),
            unit: entry.unit.map(|unit| UnitInfo {
                id: UnitId(unit.id),
                symbol: unit.symbol,
            }),
            message_box: entry.message_box.map(|mb| mb.global_key),
            current_period: entry
                .periods
                .iter()
                .find(|period| period.current)
                .map(|period| PeriodId(period.id)),
            envelope: first.clone(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JwtRegistration<'a> {
    app_name: &'a str,
    app_version: &'a str,
    envelope: DeviceEnvelope<'a>,
    notification_token: &'a str,
    #[serde(rename = "API")]
    api: u32,
    request_id: String,
    timestamp: i64,
    timestamp_formatted: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceEnvelope<'a> {
    #[serde(rename = "OS")]
    os: &'a str,
    device_model: &'a str,
    certificate: &'a str,
    certificate_type: &'a str,
    certificate_thumbprint: &'a str,
    tokens: [&'a str; 1],
    #[serde(rename = "selfIdentifier")]
    self_identifier: String,
}

/// Serialized `register/jwt` body. These bytes are both signed and sent.
#[cfg_attr(not(feature = "client"), allow(dead_code))]
pub(crate) fn registration_body(
    keys: &KeyMaterial,
    device: &DeviceProfile,
    token: &str,
    now: OffsetDateTime,
) -> Result<Vec<u8>, Error> {
    let timestamp_formatted = now
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .map_err(|e| Error::InvalidArgument(format!("unformattable date: {e}")))?;
    let body = JwtRegistration {
        app_name: &device.app_name,
        app_version: &device.app_version,
        envelope: DeviceEnvelope {
            os: &device.os,
            device_model: &device.device_model,
            certificate: keys.certificate(),
            certificate_type: "X509",
            certificate_thumbprint: keys.fingerprint(),
            tokens: [token],
            self_identifier: uuid::Uuid::new_v4().to_string(),
        },
        notification_token: "",
        api: device.api_version,
        request_id: uuid::Uuid::new_v4().to_string(),
        timestamp: now.unix_timestamp(),
        timestamp_formatted,
    };
    Ok(serde_json::to_vec(&body)?)
}

#[cfg(feature = "client")]
pub use registrar::DeviceRegistrar;

#[cfg(feature = "client")]
mod registrar {
    use serde::Deserialize;
    use tracing::{debug, info, instrument};
    use url::Url;

    use super::{JwtSession, PupilSession, registration_body};
    use crate::config::ClientConfig;
    use crate::credential::Credential;
    use crate::endpoints;
    use crate::error::Error;
    use crate::http::{signed_get, signed_post};
    use crate::keys::KeyMaterial;
    use crate::token::unix_now;

    #[derive(Deserialize)]
    struct JwtEnvelope {
        #[serde(rename = "RestURL")]
        rest_url: Url,
    }

    /// Registers a device certificate with the vendor.
    ///
    /// Neither step retries. A caller that gets [`Error::ExpiredToken`]
    /// should refresh the credential first.
    #[derive(Debug, Clone)]
    pub struct DeviceRegistrar {
        config: ClientConfig,
        http: reqwest::Client,
    }

    impl DeviceRegistrar {
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

        #[must_use]
        pub fn config(&self) -> &ClientConfig {
            &self.config
        }

        /// Binds `keys` to the token at `token_index`.
        ///
        /// # Errors
        ///
        /// - [`Error::InvalidArgument`] if there is no such token
        /// - [`Error::ExpiredToken`] if its `exp` has passed
        /// - [`Error::MalformedCredential`] if it has no `tenant` claim
        /// - [`Error::VendorProtocol`] if the vendor rejects the registration
        #[instrument(skip_all, fields(token_index = token_index))]
        pub async fn register_jwt(
            &self,
            keys: &KeyMaterial,
            credential: &Credential,
            token_index: usize,
        ) -> Result<JwtSession, Error> {
            let token = credential.token(token_index)?;
            let claims = credential.token_claims(token_index)?;
            if let Some(exp) = claims.exp.filter(|_| claims.is_expired_at(unix_now())) {
                return Err(Error::ExpiredToken {
                    index: token_index,
                    exp,
                });
            }
            let tenant = claims
                .tenant
                .filter(|tenant| !tenant.is_empty())
                .ok_or_else(|| Error::MalformedCredential("token has no tenant claim".into()))?;

            let url = self.config.jwt_registration_url(&tenant)?;
            let body = registration_body(
                keys,
                &self.config.device,
                token,
                time::OffsetDateTime::now_utc(),
            )?;
            let envelope = signed_post(&self.http, keys, &self.config.device, url, body).await?;

            let rest_url = serde_json::from_value::<JwtEnvelope>(envelope.envelope.clone())
                .map_err(|e| Error::VendorProtocol {
                    code: -1,
                    message: format!("register/jwt envelope has no RestURL: {e}"),
                })?
                .rest_url;
            info!(%tenant, %rest_url, "device registered");
            Ok(JwtSession {
                rest_url,
                tenant,
                envelope,
            })
        }

        /// Fetches the first pupil reachable through a registration.
        ///
        /// # Errors
        ///
        /// Returns [`Error::EmptyEnvelope`] if the vendor lists no pupils and
        /// [`Error::VendorProtocol`] if it rejects the request.
        #[instrument(skip_all, fields(rest_url = %rest_url))]
        pub async fn register_pupil(
            &self,
            keys: &KeyMaterial,
            rest_url: &Url,
        ) -> Result<PupilSession, Error> {
            let url = endpoints::register_hebe(rest_url)?;
            let envelope = signed_get(&self.http, keys, &self.config.device, url).await?;
            let session = PupilSession::from_envelope(rest_url.clone(), &envelope)?;
            debug!(pupil_id = %session.pupil_id, symbol = %session.symbol_number, "pupil registered");
            Ok(session)
        }
    }
}
