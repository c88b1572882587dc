//! Runtime options for the remote inference client

use crate::error::{RemovalError, Result};
use std::time::Duration;

/// Default Replicate API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

/// Environment variable overriding the API endpoint
pub const API_BASE_ENV: &str = "REPLICATE_API_BASE";

/// Default upper bound for one complete remote call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between prediction status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for remote background removal calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the prediction API, without trailing slash
    pub api_base: String,

    /// Upper bound for upload, prediction and download together
    pub request_timeout: Duration,

    /// Delay between status polls while a prediction is running
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use dream_bgremove::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::builder()
    ///     .request_timeout(Duration::from_secs(60))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.request_timeout, Duration::from_secs(60));
    /// ```
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Default configuration with the API base taken from `REPLICATE_API_BASE` when set
    ///
    /// # Errors
    /// - The override is not an http(s) URL
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Ok(api_base) = std::env::var(API_BASE_ENV) {
            builder = builder.api_base(api_base);
        }
        builder.build()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - API base is not an http(s) URL
    /// - Zero request timeout or poll interval
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(RemovalError::configuration(format!(
                "Invalid API base URL '{}'. Must start with http:// or https://",
                self.api_base
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(RemovalError::configuration(
                "Request timeout must be greater than zero",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(RemovalError::configuration(
                "Poll interval must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Endpoint URL for a path relative to the API base
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

/// Builder for `ClientConfig`
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the API base URL
    #[must_use]
    pub fn api_base<S: Into<String>>(mut self, api_base: S) -> Self {
        self.config.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the overall request timeout
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the status poll interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - See [`ClientConfig::validate`]
    pub fn build(self) -> Result<ClientConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
