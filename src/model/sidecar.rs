//! Local inference sidecar client
//!
//! The local caption model and the CLIP embedder run in a separate inference
//! process; this client is the crate's only view of them. CPU-bound work
//! never touches this process's scheduler.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{LocalCaption, ModelError, ModelResult};

/// Sidecar requests are bounded well under the cloud timeout; the local
/// model is supposed to be the fast tier.
const SIDECAR_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
struct ImagePayload {
    image_b64: String,
}

#[derive(Debug, Serialize)]
struct TextPayload<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP client for the caption/embedding sidecar
pub struct SidecarClient {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SIDECAR_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn caption(&self, image: &[u8]) -> ModelResult<LocalCaption> {
        let started = Instant::now();
        let response: CaptionResponse = self
            .post(
                "/caption",
                &ImagePayload {
                    image_b64: base64::engine::general_purpose::STANDARD.encode(image),
                },
            )
            .await?;

        if response.caption.trim().is_empty() {
            return Err(ModelError::Decode("empty local caption".to_string()));
        }

        Ok(LocalCaption {
            caption: response.caption,
            confidence: response.confidence,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn embed_image(&self, image: &[u8]) -> ModelResult<Vec<f32>> {
        let response: EmbeddingResponse = self
            .post(
                "/embed/image",
                &ImagePayload {
                    image_b64: base64::engine::general_purpose::STANDARD.encode(image),
                },
            )
            .await?;
        Self::check_embedding(response.embedding)
    }

    pub async fn embed_text(&self, text: &str) -> ModelResult<Vec<f32>> {
        let response: EmbeddingResponse = self.post("/embed/text", &TextPayload { text }).await?;
        Self::check_embedding(response.embedding)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> ModelResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                provider: "sidecar".to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        Ok(response.json().await?)
    }

    fn check_embedding(embedding: Vec<f32>) -> ModelResult<Vec<f32>> {
        if embedding.is_empty() {
            return Err(ModelError::Decode("empty embedding".to_string()));
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = SidecarClient::new("http://localhost:9090/");
        assert_eq!(client.base_url, "http://localhost:9090");
    }

    #[test]
    fn test_empty_embedding_rejected() {
        assert!(SidecarClient::check_embedding(vec![]).is_err());
        assert_eq!(
            SidecarClient::check_embedding(vec![0.1, 0.2]).unwrap(),
            vec![0.1, 0.2]
        );
    }
}
