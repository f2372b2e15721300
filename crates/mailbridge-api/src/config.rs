//! API client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Default API endpoint.
pub const DEFAULT_API_HOST: &str = "https://api.protonmail.ch";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration shared by every client handle the bridge builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API endpoint.
    pub host: Url,
    /// Application version reported to the API (e.g. `Bridge_1.2.3`).
    pub app_version: String,
    /// Client identifier reported to the API.
    pub client_id: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl ClientConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid URL or the version is empty.
    pub fn new(host: impl AsRef<str>, app_version: impl Into<String>) -> Result<Self> {
        let config = Self {
            host: Url::parse(host.as_ref())?,
            app_version: app_version.into(),
            client_id: "bridge".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration pointing at [`DEFAULT_API_HOST`].
    ///
    /// # Errors
    ///
    /// Returns an error if the version is empty.
    pub fn with_default_host(app_version: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_API_HOST, app_version)
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.host.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "unsupported scheme: {}",
                self.host.scheme()
            )));
        }
        if self.app_version.trim().is_empty() {
            return Err(Error::InvalidConfig("app version is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(())
    }
}
