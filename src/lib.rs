#![doc = include_str!("../README.md")]

pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod keys;
pub mod register;
pub mod signer;
pub mod store;
pub mod token;
pub mod types;

#[cfg(feature = "client")]
mod endpoints;
#[cfg(feature = "client")]
mod http;
#[cfg(feature = "client")]
pub mod session;

#[cfg(all(test, feature = "client"))]
mod test_support;

// Re-exports for convenient access
pub use config::{ClientConfig, DeviceProfile};
pub use credential::{Credential, extract_ap_json, normalize_ap};
#[cfg(feature = "client")]
pub use credential::CredentialParser;
pub use envelope::{Envelope, Status, parse_response};
pub use error::{AUTH_FAILURE_CODES, Error};
pub use headers::ProtocolHeaders;
pub use keys::KeyMaterial;
#[cfg(feature = "client")]
pub use register::DeviceRegistrar;
pub use register::{JwtSession, PupilSession, UnitInfo};
#[cfg(feature = "client")]
pub use session::{SessionClient, SessionStatus};
pub use signer::{SignDate, SignedRequest, canonical_url, sign};
pub use store::{KeyStore, Lifetime};
pub use token::{TokenClaims, decode_claims};
pub use types::{ConstituentId, DateRange, MessageBox, PeriodId, PupilId, UnitId};
