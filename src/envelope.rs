use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Longest body excerpt carried in an error message.
const EXCERPT_LEN: usize = 200;

/// Vendor response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub struct Envelope<T> {
    #[serde(default)]
    pub envelope_type: Option<String>,
    pub envelope: T,
    pub status: Status,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub timestamp_formatted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl Status {
    /// `Code == 0 && Message == "OK"`
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == 0 && self.message == "OK"
    }
}

/// Wire shape: `Envelope` may be `null` or absent on errors.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEnvelope {
    #[serde(default)]
    envelope_type: Option<String>,
    #[serde(default)]
    envelope: JsonValue,
    status: Option<Status>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    timestamp_formatted: Option<String>,
}

impl Envelope<JsonValue> {
    /// Converts the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VendorProtocol`] with code `-1` if the payload does
    /// not have the expected shape.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Envelope<T>, Error> {
        let envelope = serde_json::from_value(self.envelope)
            .map_err(|e| malformed(format!("unexpected envelope payload: {e}")))?;
        Ok(Envelope {
            envelope_type: self.envelope_type,
            envelope,
            status: self.status,
            request_id: self.request_id,
            timestamp: self.timestamp,
            timestamp_formatted: self.timestamp_formatted,
        })
    }
}

/// Validates one vendor response.
///
/// # Errors
///
/// - the vendor's own `{Code, Message}` when the status is not OK
/// - `{http_status, body excerpt}` for a failed HTTP status without an envelope
/// - code `-1` for a successful HTTP status with an unparsable body
pub fn parse_response(http_status: u16, body: &str) -> Result<Envelope<JsonValue>, Error> {
    let success = (200..300).contains(&http_status);
    let http_failure = || Error::VendorProtocol {
        code: i64::from(http_status),
        message: excerpt(body),
    };

    let raw = match serde_json::from_str::<RawEnvelope>(body) {
        Ok(raw) => raw,
        Err(_) if !success => return Err(http_failure()),
        Err(e) => return Err(malformed(format!("malformed envelope: {e}"))),
    };

    match raw.status {
        Some(status) if !status.is_ok() => Err(Error::VendorProtocol {
            code: status.code,
            message: status.message,
        }),
        Some(_) | None if !success => Err(http_failure()),
        None => Err(malformed("envelope has no Status".into())),
        Some(status) => Ok(Envelope {
            envelope_type: raw.envelope_type,
            envelope: raw.envelope,
            status,
            request_id: raw.request_id,
            timestamp: raw.timestamp,
            timestamp_formatted: raw.timestamp_formatted,
        }),
    }
}

fn malformed(message: String) -> Error {
    Error::VendorProtocol { code: -1, message }
}

fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_LEN).collect()
}

#[cfg(feature = "client")]
pub(crate) async fn read_envelope(response: reqwest::Response) -> Result<Envelope<JsonValue>, Error> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    parse_response(status, &body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(code: i64, message: &str, payload: JsonValue) -> String {
        json!({
            "EnvelopeType": "IEnumerable`1",
            "Envelope": payload,
            "Status": { "Code": code, "Message": message },
            "RequestId": "8b6f0a4e",
            "Timestamp": 1_760_000_000_000_i64,
            "TimestampFormatted": "2026-10-15 10:00:00",
        })
        .to_string()
    }

    #[test]
    fn ok_envelope_passes() {
        let envelope = parse_response(200, &body(0, "OK", json!([1, 2]))).unwrap();
        assert!(envelope.status.is_ok());
        assert_eq!(envelope.request_id.as_deref(), Some("8b6f0a4e"));
        let typed: Envelope<Vec<i64>> = envelope.into_typed().unwrap();
        assert_eq!(typed.envelope, [1, 2]);
    }

    #[test]
    fn vendor_status_is_surfaced() {
        let err = parse_response(200, &body(108, "Unknown device", JsonValue::Null)).unwrap_err();
        assert!(matches!(
            err,
            Error::VendorProtocol { code: 108, ref message } if message == "Unknown device"
        ));
    }

    #[test]
    fn ok_code_with_other_message_is_an_error() {
        let err = parse_response(200, &body(0, "Warning", JsonValue::Null)).unwrap_err();
        assert!(matches!(err, Error::VendorProtocol { code: 0, .. }));
    }

    #[test]
    fn vendor_status_wins_over_http_status() {
        let err = parse_response(400, &body(100, "Certificate", JsonValue::Null)).unwrap_err();
        assert!(matches!(err, Error::VendorProtocol { code: 100, .. }));
    }

    #[test]
    fn http_failure_without_envelope() {
        let err = parse_response(401, "Unauthorized").unwrap_err();
        assert!(matches!(
            err,
            Error::VendorProtocol { code: 401, ref message } if message == "Unauthorized"
        ));
        assert!(err.is_auth_failure());
    }

    #[test]
    fn malformed_success_body() {
        assert!(matches!(
            parse_response(200, "<html>"),
            Err(Error::VendorProtocol { code: -1, .. })
        ));
        assert!(matches!(
            parse_response(200, r#"{"Envelope":[]}"#),
            Err(Error::VendorProtocol { code: -1, .. })
        ));
    }

    #[test]
    fn unexpected_payload_shape() {
        let envelope = parse_response(200, &body(0, "OK", json!({"a": 1}))).unwrap();
        assert!(envelope.into_typed::<Vec<JsonValue>>().is_err());
    }
}
