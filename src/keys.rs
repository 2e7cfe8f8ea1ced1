use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509, X509NameBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::Error;

const RSA_BITS: u32 = 2048;
const CERTIFICATE_CN: &str = "APP_CERTIFICATE CA Certificate";
const CERTIFICATE_SERIAL: u32 = 1;
/// Twenty years, leap days included.
const CERTIFICATE_VALIDITY_DAYS: u32 = 20 * 365 + 5;

/// Device identity registered with the vendor.
///
/// The vendor expects the private key and certificate as headerless,
/// single-line base64 (PEM body without the `-----BEGIN` / `-----END` lines).
/// Immutable once built; clone it to share between clients.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredKeys", into = "StoredKeys")]
pub struct KeyMaterial {
    fingerprint: String,
    private_key: String,
    certificate: String,
    signing_key: PKey<Private>,
}

/// Serialized form of [`KeyMaterial`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeys {
    fingerprint: String,
    private_key: String,
    certificate: String,
}

impl KeyMaterial {
    /// Generates an RSA-2048 keypair and a self-signed certificate valid for 20 years.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if OpenSSL fails at any step.
    #[instrument]
    pub fn generate() -> Result<Self, Error> {
        let rsa = Rsa::generate(RSA_BITS).map_err(keygen)?;
        let signing_key = PKey::from_rsa(rsa).map_err(keygen)?;
        let certificate = self_signed_certificate(&signing_key).map_err(keygen)?;

        let fingerprint = hex::encode(certificate.digest(MessageDigest::sha1()).map_err(keygen)?);
        let private_key_pem = signing_key.private_key_to_pem_pkcs8().map_err(keygen)?;
        let certificate_pem = certificate.to_pem().map_err(keygen)?;

        debug!(%fingerprint, "device key material generated");

        Ok(Self {
            fingerprint,
            private_key: strip_pem(&private_key_pem)?,
            certificate: strip_pem(&certificate_pem)?,
            signing_key,
        })
    }

    /// Rebuilds key material from its stored parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a part is empty, the private
    /// key is not base64 PKCS#8, the certificate is not base64 DER, or the
    /// certificate does not match the fingerprint or the private key.
    pub fn from_parts(
        fingerprint: impl Into<String>,
        private_key: impl Into<String>,
        certificate: impl Into<String>,
    ) -> Result<Self, Error> {
        let fingerprint = fingerprint.into();
        let private_key = private_key.into();
        let certificate = certificate.into();

        if fingerprint.is_empty() {
            return Err(Error::InvalidArgument("missing key fingerprint".into()));
        }
        if certificate.is_empty() {
            return Err(Error::InvalidArgument("missing certificate".into()));
        }
        if private_key.is_empty() {
            return Err(Error::InvalidArgument("missing private key".into()));
        }

        let der = STANDARD
            .decode(&private_key)
            .map_err(|e| Error::InvalidArgument(format!("private key is not base64: {e}")))?;
        let signing_key = PKey::private_key_from_pkcs8(&der)
            .map_err(|e| Error::InvalidArgument(format!("private key is not PKCS#8: {e}")))?;

        let der = STANDARD
            .decode(&certificate)
            .map_err(|e| Error::InvalidArgument(format!("certificate is not base64: {e}")))?;
        let x509 = X509::from_der(&der)
            .map_err(|e| Error::InvalidArgument(format!("certificate is not DER: {e}")))?;
        if !hex::encode(openssl::sha::sha1(&der)).eq_ignore_ascii_case(&fingerprint) {
            return Err(Error::InvalidArgument(
                "fingerprint does not match certificate".into(),
            ));
        }
        let certificate_key = x509
            .public_key()
            .map_err(|e| Error::InvalidArgument(format!("certificate has no public key: {e}")))?;
        if !certificate_key.public_eq(&signing_key) {
            return Err(Error::InvalidArgument(
                "certificate does not belong to private key".into(),
            ));
        }

        Ok(Self {
            fingerprint,
            private_key,
            certificate,
            signing_key,
        })
    }

    /// Lowercase hex SHA-1 of the DER certificate.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Headerless base64 PKCS#8 private key.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Headerless base64 DER certificate.
    #[must_use]
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// RSA PKCS#1 v1.5 / SHA-256 signature over `message`.
    pub(crate) fn sign_sha256(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let sign = || -> Result<Vec<u8>, ErrorStack> {
            let mut signer = Signer::new(MessageDigest::sha256(), &self.signing_key)?;
            signer.update(message)?;
            signer.sign_to_vec()
        };
        sign().map_err(|e| Error::InvalidArgument(format!("signing failed: {e}")))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TryFrom<StoredKeys> for KeyMaterial {
    type Error = Error;

    fn try_from(stored: StoredKeys) -> Result<Self, Self::Error> {
        Self::from_parts(stored.fingerprint, stored.private_key, stored.certificate)
    }
}

impl From<KeyMaterial> for StoredKeys {
    fn from(keys: KeyMaterial) -> Self {
        Self {
            fingerprint: keys.fingerprint,
            private_key: keys.private_key,
            certificate: keys.certificate,
        }
    }
}

fn self_signed_certificate(key: &PKey<Private>) -> Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", CERTIFICATE_CN)?;
    let name = name.build();

    let serial = BigNum::from_u32(CERTIFICATE_SERIAL)?.to_asn1_integer()?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(CERTIFICATE_VALIDITY_DAYS)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Drops PEM armour lines and line breaks, leaving the base64 body.
fn strip_pem(pem: &[u8]) -> Result<String, Error> {
    let pem = std::str::from_utf8(pem).map_err(|e| Error::KeyGeneration(e.to_string()))?;
    Ok(pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect())
}

fn keygen(e: ErrorStack) -> Error {
    Error::KeyGeneration(e.to_string())
}
