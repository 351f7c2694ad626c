//! Upstream errata client

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::models::{ErrataRequest, ErrataResponse};
use crate::config::UpstreamConfig;
use crate::error::FetchError;

/// Characters of the response body kept in a status error
const MAX_ERROR_BODY: usize = 512;

/// Source of upstream catalog pages
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_page(&self, request: &ErrataRequest) -> Result<ErrataResponse, FetchError>;
}

/// HTTP client for the upstream metadata service's errata endpoint
pub struct VmaasClient {
    client: Client,
    url: String,
}

impl VmaasClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("errata-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.errata_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl UpstreamClient for VmaasClient {
    async fn fetch_page(&self, request: &ErrataRequest) -> Result<ErrataResponse, FetchError> {
        debug!(url = %self.url, page = request.page, "Requesting errata page");

        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                page: request.page,
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
            page: request.page,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            address: server.uri(),
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_page_posts_request_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v3/errata"))
            .and(body_json(json!({"errata_list": [".*"], "page": 1, "page_size": 20})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errata_list": {"RHBA-2004:391": {"type": "bugfix"}},
                "page": 1,
                "page_size": 20,
                "pages": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmaasClient::new(&config(&server)).unwrap();
        let page = client
            .fetch_page(&ErrataRequest::page(1, 20, None))
            .await
            .unwrap();

        assert_eq!(page.pages, 3);
        assert!(page.errata_list.contains_key("RHBA-2004:391"));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = VmaasClient::new(&config(&server)).unwrap();
        let err = client
            .fetch_page(&ErrataRequest::page(0, 20, None))
            .await
            .unwrap_err();

        match &err {
            FetchError::Status { page, status, body } => {
                assert_eq!(*page, 0);
                assert_eq!(*status, 503);
                assert_eq!(body, "maintenance");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = VmaasClient::new(&config(&server)).unwrap();
        let err = client
            .fetch_page(&ErrataRequest::page(4, 20, None))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode { page: 4, .. }));
        assert!(!err.is_transient());
    }
}
