use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EmbeddingClient, EmbeddingClientError};

/// Embedding client for a local Ollama runtime (`POST /api/embed`).
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// Construct a client for the Ollama instance at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder()
            .user_agent("versepipe/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::debug!(url = %base_url, "Initialized Ollama embedding client");
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model,
                input: &texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = EmbeddingClientError::UnexpectedStatus { status, body };
            tracing::error!(model, error = %error, "Ollama embedding request failed");
            return Err(error);
        }

        let EmbedResponse { embeddings } = response.json().await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn posts_model_and_inputs() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed").json_body(json!({
                    "model": "nomic-embed-text",
                    "input": ["om", "shanti"]
                }));
                then.status(200).json_body(json!({
                    "model": "nomic-embed-text",
                    "embeddings": [[0.1, 0.2], [0.3, 0.4]]
                }));
            })
            .await;

        let client = OllamaClient::new(&format!("{}/", server.base_url()), Duration::from_secs(5))
            .expect("client");
        let vectors = client
            .generate_embeddings("nomic-embed-text", vec!["om".into(), "shanti".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn surfaces_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(404).body("model not found");
            })
            .await;

        let client = OllamaClient::new(&server.base_url(), Duration::from_secs(5)).expect("client");
        let error = client
            .generate_embeddings("missing", vec!["om".into()])
            .await
            .unwrap_err();

        match error {
            EmbeddingClientError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_short_responses() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[1.0]] }));
            })
            .await;

        let client = OllamaClient::new(&server.base_url(), Duration::from_secs(5)).expect("client");
        let error = client
            .generate_embeddings("m", vec!["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }
}
