pub mod client;
pub mod mock;
mod polling;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use fibo_core::config::ApiConfig;
use fibo_core::error::Result;
use fibo_core::traits::ImageApi;

pub use client::BriaClient;
pub use mock::MockClient;

/// Create the API client described by the configuration.
pub fn create_client(config: &ApiConfig) -> Result<Arc<dyn ImageApi>> {
    if config.mock_mode {
        info!(latency_ms = config.mock_latency_ms, "Image API running in mock mode");
        return Ok(Arc::new(MockClient::new(Duration::from_millis(
            config.mock_latency_ms,
        ))));
    }
    Ok(Arc::new(BriaClient::new(config)?))
}
