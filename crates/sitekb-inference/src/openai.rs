//! OpenAI-compatible embedding backend.
//!
//! Works with OpenAI itself and with any server exposing `POST /embeddings`
//! in the same shape (vLLM, LocalAI, LM Studio, ...).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use sitekb_core::{defaults, EmbeddingBackend, Error, Result, Vector};

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL including the API version, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token; optional for local endpoints.
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            model: defaults::OPENAI_EMBED_MODEL.to_string(),
            dimension: defaults::OPENAI_EMBED_DIMENSION,
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a failed response onto the crate error type.
///
/// Auth and unknown-model failures are configuration problems and map to
/// [`Error::Config`]; everything else is a (possibly transient) embedding error.
fn response_error(status: StatusCode, message: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::Config(format!("Authentication failed: {}", message)),
        404 => Error::Config(format!("Model not found: {}", message)),
        429 => Error::Embedding(format!("Rate limit exceeded: {}", message)),
        _ => Error::Embedding(format!("OpenAI returned {}: {}", status, message)),
    }
}

/// Embedder for OpenAI-compatible APIs.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            model = %config.model,
            dimension = config.dimension,
            authenticated = config.api_key.is_some(),
            "Initializing OpenAI-compatible embedder"
        );

        Ok(Self { client, config })
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key);
        }
        req
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "openai", op = "embed_batch", model = %self.config.model, input_count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
        };

        let response = self
            .build_request("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => "Unknown error".to_string(),
            };
            return Err(response_error(status, &message));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "OpenAI returned {} embeddings for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        // Order by index, not by arrival.
        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vector> = data.into_iter().map(|d| Vector::from(d.embedding)).collect();

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            result_count = vectors.len(),
            duration_ms = elapsed,
            "Embedding complete"
        );
        if elapsed > defaults::EMBED_SLOW_THRESHOLD_MS {
            warn!(
                duration_ms = elapsed,
                input_count = texts.len(),
                slow = true,
                "Slow embedding operation"
            );
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer, api_key: Option<&str>) -> OpenAiEmbedder {
        OpenAiEmbedder::new(OpenAiConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: api_key.map(String::from),
            dimension: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_batch_sorts_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "encoding_format": "float"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
                ],
                "model": "text-embedding-3-small",
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = embedder(&server, Some("sk-test"))
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0].to_vec(), vec![1.0f32, 0.0]);
        assert_eq!(vectors[1].to_vec(), vec![0.0f32, 1.0]);
    }

    #[tokio::test]
    async fn test_auth_failure_is_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key" }
            })))
            .mount(&server)
            .await;

        let err = embedder(&server, Some("bad"))
            .embed_batch(&["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_embedding_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = embedder(&server, None)
            .embed_batch(&["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(err.to_string().contains("Unknown error"));
    }

    #[test]
    fn test_response_error_mapping() {
        assert!(matches!(
            response_error(StatusCode::NOT_FOUND, "m"),
            Error::Config(_)
        ));
        assert!(matches!(
            response_error(StatusCode::BAD_GATEWAY, "m"),
            Error::Embedding(_)
        ));
    }

    #[test]
    fn test_default_config() {
        let config = OpenAiConfig::default();
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.dimension, 1536);
        assert!(config.api_key.is_none());
    }
}
