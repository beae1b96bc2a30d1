use reqwest::Client;
use tracing::debug;

use crate::{IngestConfig, IngestError};

/// Create a reqwest Client for pushing segments with the provided configuration
pub fn create_client(config: &IngestConfig) -> Result<Client, IngestError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host) // one stream per representation
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(reqwest::redirect::Policy::none());

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    debug!(
        timeout = ?config.timeout,
        connect_timeout = ?config.connect_timeout,
        "Creating ingest HTTP client"
    );
    client_builder.build().map_err(IngestError::from)
}
