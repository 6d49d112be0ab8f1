//! Outbound calls to the text-generation API.

use std::time::Duration;

use axum::http::header;
use reqwest::Client;

use super::types::{ChatRequest, UpstreamBody};
use crate::config::{ApiKey, RequestShape, UpstreamConfig};
use crate::error::{Error, Result};

/// Issues one upstream request per candidate attempt.
///
/// Returns the raw response; status interpretation and body reading are left
/// to the caller.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    url: String,
    api_key: Option<ApiKey>,
    shape: RequestShape,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a client around an existing connection pool.
    pub fn new(http: Client, config: &UpstreamConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            shape: config.shape,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Build a connection pool from config and wrap it.
    ///
    /// Only the connect timeout is set on the pool; the overall timeout is
    /// applied per batch request so long streams are not cut off.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(http, config))
    }

    /// Send one request for `model`.
    ///
    /// Fails with `AuthConfig` before touching the network when no credential,
    /// or an empty one, is configured. Transport failures come back as `Error::Http`.
    pub async fn send(
        &self,
        model: &str,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::AuthConfig("set upstream.api_key or OPENAI_API_KEY".to_string())
            })?;

        let body = UpstreamBody::build(self.shape, model, request, stream);

        let mut upstream_request = self
            .http
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&body);

        if stream {
            upstream_request = upstream_request.header(header::ACCEPT, "text/event-stream");
        } else {
            upstream_request = upstream_request.timeout(self.timeout);
        }

        tracing::debug!(model = %model, stream, url = %self.url, "Sending upstream request");

        Ok(upstream_request.send().await?)
    }
}
