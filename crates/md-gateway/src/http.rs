//! Upstream aggregator HTTP client
//!
//! Issues a single request per call, attaches a correlation id and the
//! bearer credential, measures elapsed wall time, and classifies failures
//! as retryable or terminal. The per-request deadline is enforced by the
//! underlying client; exceeding it surfaces as a network error.

use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::GatewayError;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Aggregator base URL
    pub base_url: String,
    /// Bearer credential attached to every request
    pub api_key: String,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Hard per-request deadline
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Thin client over the upstream aggregator.
pub struct AggregatorClient {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl AggregatorClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    /// GET a JSON document from the aggregator.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.config.base_url, path);
        let request = self.client.get(&url).query(query);
        let response = self.execute(Method::GET, path, request).await?;
        Self::decode(response).await
    }

    /// POST a JSON body and parse the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.config.base_url, path);
        let request = self.client.post(&url).json(body);
        let response = self.execute(Method::POST, path, request).await?;
        Self::decode(response).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = request
            .header("x-correlation-id", &correlation_id)
            .bearer_auth(&self.config.api_key);

        debug!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            "Upstream request started"
        );

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // No response received: connect failure, reset, or deadline
                warn!(
                    correlation_id = %correlation_id,
                    method = %method,
                    path = %path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Upstream request failed without a response"
                );
                metrics::counter!("gateway.requests.network_errors_total").increment(1);
                return Err(GatewayError::Network(e.to_string()));
            }
        };

        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = elapsed_ms,
            "Upstream request finished"
        );

        Self::classify(status)?;
        Ok(response)
    }

    fn classify(status: StatusCode) -> Result<(), GatewayError> {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Throttled);
        }
        if status.is_server_error() {
            return Err(GatewayError::Server {
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            return Err(GatewayError::Client {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> AggregatorClient {
        AggregatorClient::new(HttpClientConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_attaches_bearer_and_correlation_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(header_exists("x-correlation-id"))
            .and(wiremock::matchers::header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": []
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let body: Value = client
            .get_json("/history", &[("lastDays", "7".to_string())])
            .await
            .unwrap();
        assert!(body["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.get_json::<Value>("/history", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { status: 502 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_429_is_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.get_json::<Value>("/history", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Throttled));
    }

    #[tokio::test]
    async fn test_4xx_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.get_json::<Value>("/comments/p1", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Client { status: 404 }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unparseable_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .get_json::<Vec<String>>("/history", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        let client = AggregatorClient::new(HttpClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();

        let err = client.get_json::<Value>("/history", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
        assert!(err.is_retryable());
    }
}
