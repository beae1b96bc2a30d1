use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = concat!("cmaf-ingest/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the ingester
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Overall timeout for a single PUT (0 disables it)
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections per destination host. Low-latency
    /// ingest keeps one parallel stream per representation.
    pub pool_max_idle_per_host: usize,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers sent with every push
    pub headers: HeaderMap,

    /// Number of chunks buffered between a segment producer and its
    /// request body before the producer has to wait
    pub bridge_capacity: usize,

    /// How long `stop` waits for a cancelled session to drain its
    /// in-flight pushes before aborting it
    pub drain_grace_period: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: IngestConfig::get_default_headers(),
            bridge_capacity: 32,
            drain_grace_period: Duration::from_secs(5),
        }
    }
}

impl IngestConfig {
    pub fn builder() -> crate::builder::IngestConfigBuilder {
        crate::builder::IngestConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}
