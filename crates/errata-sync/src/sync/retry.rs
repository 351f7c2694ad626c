//! Retry decorator for upstream clients

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::client::UpstreamClient;
use super::models::{ErrataRequest, ErrataResponse};
use crate::config::UpstreamConfig;
use crate::error::FetchError;

/// Retries transient page failures with exponential backoff
///
/// Each attempt is bounded by the request timeout. Non-transient errors are
/// returned on first sight.
pub struct RetryingClient {
    inner: Arc<dyn UpstreamClient>,
    config: UpstreamConfig,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn UpstreamClient>, config: &UpstreamConfig) -> Self {
        Self {
            inner,
            config: config.clone(),
        }
    }

    async fn attempt(&self, request: &ErrataRequest) -> Result<ErrataResponse, FetchError> {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, self.inner.fetch_page(request))
            .await
            .map_err(|_| FetchError::Timeout {
                page: request.page,
                after: timeout,
            })?
    }
}

#[async_trait]
impl UpstreamClient for RetryingClient {
    async fn fetch_page(&self, request: &ErrataRequest) -> Result<ErrataResponse, FetchError> {
        let mut retry = 0u32;

        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && retry < self.config.max_retries => {
                    retry += 1;
                    let backoff = self.config.backoff_for(retry);
                    warn!(
                        page = request.page,
                        retry,
                        max_retries = self.config.max_retries,
                        backoff = ?backoff,
                        error = %e,
                        "Transient upstream failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
