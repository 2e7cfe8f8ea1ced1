use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use crate::config::DeviceProfile;
use crate::envelope::{Envelope, read_envelope};
use crate::error::Error;
use crate::headers::ProtocolHeaders;
use crate::keys::KeyMaterial;
use crate::signer::SignDate;

/// Signed GET, validated envelope.
pub(crate) async fn signed_get(
    http: &reqwest::Client,
    keys: &KeyMaterial,
    device: &DeviceProfile,
    url: Url,
) -> Result<Envelope<JsonValue>, Error> {
    let headers = ProtocolHeaders::build(keys, device, &url, None, &SignDate::now()?)?;
    debug!(url = %url, "GET");
    let response = http
        .get(url)
        .headers(headers.to_header_map()?)
        .send()
        .await?;
    checked(read_envelope(response).await)
}

/// Signed POST of `body`, which must be the exact JSON bytes to send.
pub(crate) async fn signed_post(
    http: &reqwest::Client,
    keys: &KeyMaterial,
    device: &DeviceProfile,
    url: Url,
    body: Vec<u8>,
) -> Result<Envelope<JsonValue>, Error> {
    let headers = ProtocolHeaders::build(keys, device, &url, Some(body.as_slice()), &SignDate::now()?)?;
    debug!(url = %url, bytes = body.len(), "POST");
    let response = http
        .post(url)
        .headers(headers.to_header_map()?)
        .body(body)
        .send()
        .await?;
    checked(read_envelope(response).await)
}

fn checked(result: Result<Envelope<JsonValue>, Error>) -> Result<Envelope<JsonValue>, Error> {
    if let Err(Error::VendorProtocol { code, message }) = &result {
        warn!(code, %message, "vendor rejected request");
    }
    result
}
