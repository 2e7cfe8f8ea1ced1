//! HebeCE request signatures.
//!
//! Every request carries a `signature` header computed over the concatenated
//! values of `vCanonicalUrl`, `Digest` (only when there is a body) and `vDate`:
//!
//! ```text
//! keyId="<fingerprint>",headers="vCanonicalUrl Digest vDate",algorithm="sha256withrsa",signature=Base64(sha256withrsa(<base64 signature>))
//! ```
//!
//! The `Base64(sha256withrsa(...))` wrapper is literal text the vendor expects
//! around the real signature value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::Error;
use crate::keys::KeyMaterial;

const CANONICAL_PREFIX: &str = "api/mobile/";

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// The date a request is signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignDate {
    /// Already formatted RFC-1123 date, used verbatim.
    Http(String),
    /// Unix time in milliseconds; signed as one second later.
    UnixMillis(i64),
}

impl SignDate {
    /// Current time as an RFC-1123 date.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the clock reading cannot be formatted.
    pub fn now() -> Result<Self, Error> {
        http_date(OffsetDateTime::now_utc()).map(Self::Http)
    }

    fn resolve(&self) -> Result<String, Error> {
        match self {
            Self::Http(date) if date.trim().is_empty() => {
                Err(Error::InvalidArgument("missing timestamp".into()))
            }
            Self::Http(date) => Ok(date.clone()),
            Self::UnixMillis(millis) => {
                let nanos = (i128::from(*millis) + 1000) * 1_000_000;
                let at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
                    .map_err(|e| Error::InvalidArgument(format!("timestamp out of range: {e}")))?;
                http_date(at)
            }
        }
    }
}

/// Signature headers for one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub canonical_url: String,
    /// `SHA-256=<base64>`, present only when the request has a body.
    pub digest: Option<String>,
    pub signature: String,
    pub vdate: String,
}

/// Signs one request.
///
/// `body` must be the exact bytes sent on the wire.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an empty path or timestamp,
/// [`Error::MalformedPath`] when the path has no `api/mobile/` segment.
pub fn sign(
    keys: &KeyMaterial,
    body: Option<&[u8]>,
    request_path: &str,
    date: &SignDate,
) -> Result<SignedRequest, Error> {
    let canonical_url = canonical_url(request_path)?;
    let vdate = date.resolve()?;
    let body_digest = body.map(|bytes| STANDARD.encode(Sha256::digest(bytes)));

    let mut names = vec!["vCanonicalUrl"];
    let mut values = canonical_url.clone();
    if let Some(digest) = &body_digest {
        names.push("Digest");
        values.push_str(digest);
    }
    names.push("vDate");
    values.push_str(&vdate);

    let signature_value = STANDARD.encode(keys.sign_sha256(values.as_bytes())?);
    let signature = format!(
        "keyId=\"{}\",headers=\"{}\",algorithm=\"sha256withrsa\",signature=Base64(sha256withrsa({}))",
        keys.fingerprint(),
        names.join(" "),
        signature_value,
    );

    Ok(SignedRequest {
        canonical_url,
        digest: body_digest.map(|digest| format!("SHA-256={digest}")),
        signature,
        vdate,
    })
}

/// Lowercased, percent-encoded `api/mobile/...` tail of a request URL.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an empty path and
/// [`Error::MalformedPath`] when no `api/mobile/` segment is followed by
/// at least one character.
pub fn canonical_url(request_path: &str) -> Result<String, Error> {
    if request_path.is_empty() {
        return Err(Error::InvalidArgument("missing request path".into()));
    }
    // `.+` stops at the first line break.
    let line = request_path.lines().find(|line| {
        line.find(CANONICAL_PREFIX)
            .is_some_and(|at| line.len() > at + CANONICAL_PREFIX.len())
    });
    let matched = line
        .and_then(|line| line.find(CANONICAL_PREFIX).map(|at| &line[at..]))
        .ok_or_else(|| Error::MalformedPath(request_path.to_owned()))?;

    Ok(utf8_percent_encode(matched, URI_COMPONENT)
        .to_string()
        .to_lowercase())
}

/// RFC-1123 date as sent in `vdate`, e.g. `Thu, 15 Oct 2026 10:00:00 GMT`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `at` cannot be formatted (year
/// outside `0..=9999`).
pub fn http_date(at: OffsetDateTime) -> Result<String, Error> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .map_err(|e| Error::InvalidArgument(format!("unformattable date: {e}")))
}

#[cfg(test)]
mod tests {
    use openssl::hash::MessageDigest;
    use openssl::sign::Verifier;
    use openssl::x509::X509;
    use time::macros::datetime;

    use super::*;
    use crate::keys::tests::shared_keys;

    const PATH: &str =
        "https://lekcjaplus.vulcan.net.pl/powiat/123456/api/mobile/grade/byPupil?unitId=1&pupilId=2";
    const DATE: &str = "Thu, 15 Oct 2026 10:00:00 GMT";

    fn date() -> SignDate {
        SignDate::Http(DATE.into())
    }

    fn signature_value(header: &str) -> Vec<u8> {
        let inner = header
            .split("signature=Base64(sha256withrsa(")
            .nth(1)
            .unwrap()
            .trim_end_matches("))");
        STANDARD.decode(inner).unwrap()
    }

    fn verify(signing_string: &str, signature: &[u8]) -> bool {
        let der = STANDARD.decode(shared_keys().certificate()).unwrap();
        let public = X509::from_der(&der).unwrap().public_key().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(signing_string.as_bytes()).unwrap();
        verifier.verify(signature).unwrap()
    }

    #[test]
    fn canonical_url_encodes_and_lowercases() {
        assert_eq!(
            canonical_url(PATH).unwrap(),
            "api%2fmobile%2fgrade%2fbypupil%3funitid%3d1%26pupilid%3d2"
        );
        assert_eq!(
            canonical_url("/powiat/api/mobile/register/hebe?mode=2").unwrap(),
            "api%2fmobile%2fregister%2fhebe%3fmode%3d2"
        );
    }

    #[test]
    fn canonical_url_keeps_uri_component_marks() {
        assert_eq!(
            canonical_url("api/mobile/a b(c)!*~'.x").unwrap(),
            "api%2fmobile%2fa%20b(c)!*~'.x"
        );
    }

    #[test]
    fn canonical_url_rejects_foreign_paths() {
        assert!(matches!(
            canonical_url("https://example.com/api/other"),
            Err(Error::MalformedPath(_))
        ));
        assert!(matches!(
            canonical_url("https://example.com/api/mobile/"),
            Err(Error::MalformedPath(_))
        ));
        assert!(matches!(canonical_url(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn http_date_matches_rfc1123() {
        let at = datetime!(2026-10-15 10:00:00 UTC);
        assert_eq!(http_date(at).unwrap(), DATE);
        let at = datetime!(2026-01-05 07:08:09 UTC);
        assert_eq!(http_date(at).unwrap(), "Mon, 05 Jan 2026 07:08:09 GMT");
    }

    #[test]
    fn unix_millis_are_signed_one_second_later() {
        let millis = datetime!(2026-10-15 09:59:59 UTC).unix_timestamp() * 1000;
        let signed = sign(shared_keys(), None, PATH, &SignDate::UnixMillis(millis)).unwrap();
        assert_eq!(signed.vdate, DATE);
    }

    #[test]
    fn signing_is_deterministic() {
        let body: &[u8] = br#"{"a":1}"#;
        let a = sign(shared_keys(), Some(body), PATH, &date()).unwrap();
        let b = sign(shared_keys(), Some(body), PATH, &date()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bodyless_request_has_no_digest() {
        let signed = sign(shared_keys(), None, PATH, &date()).unwrap();
        assert!(signed.digest.is_none());
        assert!(signed.signature.contains("headers=\"vCanonicalUrl vDate\""));

        let signing_string = format!("{}{}", signed.canonical_url, DATE);
        assert!(verify(&signing_string, &signature_value(&signed.signature)));
    }

    #[test]
    fn body_digest_covers_exact_bytes() {
        let body: &[u8] = br#"{"Envelope":{"x":"y"}}"#;
        let signed = sign(shared_keys(), Some(body), PATH, &date()).unwrap();

        let digest = signed.digest.as_deref().unwrap();
        let encoded = digest.strip_prefix("SHA-256=").unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), Sha256::digest(body).to_vec());
        assert!(
            signed
                .signature
                .contains("headers=\"vCanonicalUrl Digest vDate\"")
        );

        let signing_string = format!("{}{}{}", signed.canonical_url, encoded, DATE);
        assert!(verify(&signing_string, &signature_value(&signed.signature)));
    }

    #[test]
    fn signature_header_layout() {
        let keys = shared_keys();
        let signed = sign(keys, None, PATH, &date()).unwrap();
        let prefix = format!(
            "keyId=\"{}\",headers=\"vCanonicalUrl vDate\",algorithm=\"sha256withrsa\",signature=Base64(sha256withrsa(",
            keys.fingerprint()
        );
        assert!(signed.signature.starts_with(&prefix));
        assert!(signed.signature.ends_with("))"));
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let result = sign(shared_keys(), None, PATH, &SignDate::Http(String::new()));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
