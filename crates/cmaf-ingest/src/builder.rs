//! # Builder for IngestConfig
//!
//! Fluent construction of [`IngestConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cmaf_ingest_engine::IngestConfig;
//!
//! let config = IngestConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_user_agent("MyIngest/1.0")
//!     .with_header("X-Ingest-Key", "secret")
//!     .with_bridge_capacity(16)
//!     .with_drain_grace_period(Duration::from_secs(2))
//!     .build();
//!
//! assert_eq!(config.bridge_capacity, 16);
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::IngestConfig;

/// Builder for creating IngestConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    /// Set the overall timeout of a single PUT
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge headers into the current set, overriding same-named entries
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set the number of chunks buffered per segment stream.
    /// Zero is bumped to one since the bounded channel needs capacity.
    pub fn with_bridge_capacity(mut self, capacity: usize) -> Self {
        self.config.bridge_capacity = capacity.max(1);
        self
    }

    pub fn with_drain_grace_period(mut self, grace: Duration) -> Self {
        self.config.drain_grace_period = grace;
        self
    }

    /// Build the IngestConfig instance
    pub fn build(self) -> IngestConfig {
        self.config
    }
}

impl Default for IngestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
