use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::RequestExecutor;
use super::error::RequestError;
use super::types::ApiRequest;

/// [`RequestExecutor`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RequestError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an already configured client (useful for custom TLS or proxies).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<Value, RequestError> {
        let url = self.url(&request.path);
        debug!(verb = %request.verb, %url, "sending request");

        let mut builder = self
            .client
            .request(request.verb.into(), &url)
            .timeout(request.timeout)
            .header("accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(credential) = &request.credential {
            builder = builder.bearer_auth(credential);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RequestError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RequestError::Malformed(e.to_string()))
    }
}
