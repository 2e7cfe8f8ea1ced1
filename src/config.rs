use url::Url;

use crate::error::Error;

const DEFAULT_BASE_URL: &str = "https://lekcjaplus.vulcan.net.pl";
const DEFAULT_AP_URL: &str = "https://eduvulcan.pl/api/ap";

/// How the client presents itself to the vendor.
///
/// Sent in the protocol headers of every request and in the device
/// registration body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct DeviceProfile {
    pub os: String,
    pub device_model: String,
    pub user_agent: String,
    /// `vapi` header and registration `API` field.
    pub api_version: u32,
    pub version_code: String,
    pub app_name: String,
    pub app_version: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            os: "Android".into(),
            device_model: "SM-G935F".into(),
            user_agent: "Dart/3.3 (dart:io)".into(),
            api_version: 1,
            version_code: "640".into(),
            app_name: "DzienniczekPlus 3.0".into(),
            app_version: "24.09.04 (G)".into(),
        }
    }
}

/// Vendor endpoints and device profile.
///
/// ```rust,ignore
/// use hebe_client::ClientConfig;
///
/// let config = ClientConfig::new()
///     .with_base_url("http://127.0.0.1:8080".parse()?)
///     .with_token_index(1);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) ap_url: Url,
    pub(crate) device: DeviceProfile,
    pub(crate) token_index: usize,
}

impl ClientConfig {
    /// Production endpoints, default device profile, token index 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.parse().expect("valid default URL"),
            ap_url: DEFAULT_AP_URL.parse().expect("valid default URL"),
            device: DeviceProfile::default(),
            token_index: 0,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `HEBE_BASE_URL`: vendor API host (scheme and host, no tenant)
    /// - `HEBE_AP_URL`: credential refresh endpoint
    /// - `HEBE_DEVICE_MODEL`, `HEBE_OS`, `HEBE_USER_AGENT`, `HEBE_VERSION_CODE`:
    ///   device profile overrides
    /// - `HEBE_TOKEN_INDEX`: which credential token to register (multi-student accounts)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the variable if a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();

        if let Ok(url_str) = std::env::var("HEBE_BASE_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("HEBE_BASE_URL: {e}")))?;
            config = config.with_base_url(url);
        }
        if let Ok(url_str) = std::env::var("HEBE_AP_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("HEBE_AP_URL: {e}")))?;
            config = config.with_ap_url(url);
        }
        if let Ok(model) = std::env::var("HEBE_DEVICE_MODEL") {
            config.device.device_model = model;
        }
        if let Ok(os) = std::env::var("HEBE_OS") {
            config.device.os = os;
        }
        if let Ok(agent) = std::env::var("HEBE_USER_AGENT") {
            config.device.user_agent = agent;
        }
        if let Ok(code) = std::env::var("HEBE_VERSION_CODE") {
            config.device.version_code = code;
        }
        if let Ok(index) = std::env::var("HEBE_TOKEN_INDEX") {
            let index = index
                .trim()
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("HEBE_TOKEN_INDEX: {e}")))?;
            config = config.with_token_index(index);
        }

        Ok(config)
    }

    /// Override the vendor API base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    /// Override the credential refresh endpoint.
    #[must_use]
    pub fn with_ap_url(mut self, url: Url) -> Self {
        self.ap_url = url;
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    /// Token registered by default. Existing callers only use index 0.
    #[must_use]
    pub fn with_token_index(mut self, index: usize) -> Self {
        self.token_index = index;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn ap_url(&self) -> &Url {
        &self.ap_url
    }

    #[must_use]
    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    #[must_use]
    pub fn token_index(&self) -> usize {
        self.token_index
    }

    /// `<base>/<tenant>/api/mobile/register/jwt`
    pub(crate) fn jwt_registration_url(&self, tenant: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{tenant}/api/mobile/register/jwt")
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("tenant {tenant:?}: {e}")))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_vendor() {
        let config = ClientConfig::new();
        assert_eq!(config.base_url().as_str(), "https://lekcjaplus.vulcan.net.pl/");
        assert_eq!(config.ap_url().as_str(), "https://eduvulcan.pl/api/ap");
        assert_eq!(config.token_index(), 0);
        assert_eq!(config.device().api_version, 1);
    }

    #[test]
    fn overrides_chain() {
        let config = ClientConfig::new()
            .with_base_url("http://127.0.0.1:9000".parse().unwrap())
            .with_token_index(2);
        assert_eq!(config.base_url().as_str(), "http://127.0.0.1:9000/");
        assert_eq!(config.token_index(), 2);
    }

    #[test]
    fn jwt_registration_url_embeds_tenant() {
        let config = ClientConfig::new();
        assert_eq!(
            config.jwt_registration_url("powiatwulkanowy").unwrap().as_str(),
            "https://lekcjaplus.vulcan.net.pl/powiatwulkanowy/api/mobile/register/jwt"
        );
    }
}
