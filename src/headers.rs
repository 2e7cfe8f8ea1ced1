use url::Url;

use crate::config::DeviceProfile;
use crate::error::Error;
use crate::keys::KeyMaterial;
use crate::signer::{SignDate, sign};

/// Full header set of one signed HebeCE request.
///
/// Names are lowercase and part of the wire contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeaders {
    entries: Vec<(&'static str, String)>,
}

impl ProtocolHeaders {
    /// Builds and signs the headers for a request to `url`.
    ///
    /// # Errors
    ///
    /// Propagates signing errors; a URL without a host is
    /// [`Error::InvalidArgument`].
    pub fn build(
        keys: &KeyMaterial,
        device: &DeviceProfile,
        url: &Url,
        body: Option<&[u8]>,
        date: &SignDate,
    ) -> Result<Self, Error> {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            (None, _) => return Err(Error::InvalidArgument(format!("URL has no host: {url}"))),
        };
        let signed = sign(keys, body, url.as_str(), date)?;

        let mut entries = vec![
            ("accept", "*/*".to_owned()),
            ("accept-charset", "UTF-8".to_owned()),
            ("accept-encoding", "gzip".to_owned()),
            ("connection", "Keep-Alive".to_owned()),
            ("content-type", "application/json".to_owned()),
            ("host", host),
            ("user-agent", device.user_agent.clone()),
            ("vapi", device.api_version.to_string()),
            ("vdate", signed.vdate),
            ("vdevicemodel", device.device_model.clone()),
            ("vos", device.os.clone()),
            ("vversioncode", device.version_code.clone()),
            ("signature", signed.signature),
            ("vcanonicalurl", signed.canonical_url),
        ];
        if let Some(digest) = signed.digest {
            entries.push(("digest", digest));
        }

        Ok(Self { entries })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(key, value)| (*key, value.as_str()))
    }

    #[cfg(feature = "client")]
    pub(crate) fn to_header_map(&self) -> Result<reqwest::header::HeaderMap, Error> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidArgument(format!("header {name}: {e}")))?;
            map.insert(HeaderName::from_static(*name), value);
        }
        Ok(map)
    }
}
