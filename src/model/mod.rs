//! # Model Host
//!
//! Capability interface over the caption and embedding runtimes:
//! `caption_local`, `caption_cloud`, `embed_image`, `embed_text`. Concrete
//! hosts are resolved once at construction, never per call:
//!
//! - [`SidecarModelHost`]: local captions and CLIP embeddings from an
//!   inference sidecar, cloud captions from a configured provider
//! - [`MockModelHost`]: deterministic results for development and tests

pub mod mock;
pub mod openrouter;
pub mod provider;
pub mod sidecar;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use mock::MockModelHost;
pub use openrouter::OpenRouterProvider;
pub use provider::{CloudCaption, CloudCaptionProvider, Pricing};
pub use sidecar::SidecarClient;

/// Model invocation errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned status {status}: {detail}")]
    Status {
        provider: String,
        status: u16,
        detail: String,
    },

    #[error("invalid model response: {0}")]
    Decode(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// A caption produced by the local model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCaption {
    pub caption: String,
    /// Model-reported confidence, if the runtime provides one
    pub confidence: Option<f64>,
    pub latency_ms: u64,
}

/// The model capability consumed by the executor, the workers, and the
/// search planner. Implementations are shared handles; thread safety is part
/// of this contract.
#[async_trait]
pub trait ModelHost: Send + Sync {
    /// Caption using the local model
    async fn caption_local(&self, image: &[u8]) -> ModelResult<LocalCaption>;

    /// Caption using the external vision API
    async fn caption_cloud(&self, image: &[u8]) -> ModelResult<CloudCaption>;

    /// Joint-space image embedding
    async fn embed_image(&self, image: &[u8]) -> ModelResult<Vec<f32>>;

    /// Joint-space text embedding
    async fn embed_text(&self, text: &str) -> ModelResult<Vec<f32>>;

    /// Cloud provider label for metrics
    fn provider_name(&self) -> &'static str;

    /// Cloud model label for metrics
    fn cloud_model(&self) -> String;
}

/// Which cloud adapter to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProviderKind {
    /// Deterministic in-process provider; disables real calls
    Mock,
    /// OpenRouter-compatible vision API
    OpenRouter,
}

impl FromStr for CloudProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(CloudProviderKind::Mock),
            "openrouter" => Ok(CloudProviderKind::OpenRouter),
            other => Err(format!("unknown cloud provider: {}", other)),
        }
    }
}

/// Host combining a local inference sidecar with a cloud caption provider
pub struct SidecarModelHost {
    sidecar: SidecarClient,
    cloud: Box<dyn CloudCaptionProvider>,
}

impl SidecarModelHost {
    pub fn new(sidecar: SidecarClient, cloud: Box<dyn CloudCaptionProvider>) -> Self {
        Self { sidecar, cloud }
    }
}

#[async_trait]
impl ModelHost for SidecarModelHost {
    async fn caption_local(&self, image: &[u8]) -> ModelResult<LocalCaption> {
        self.sidecar.caption(image).await
    }

    async fn caption_cloud(&self, image: &[u8]) -> ModelResult<CloudCaption> {
        self.cloud.caption(image).await
    }

    async fn embed_image(&self, image: &[u8]) -> ModelResult<Vec<f32>> {
        self.sidecar.embed_image(image).await
    }

    async fn embed_text(&self, text: &str) -> ModelResult<Vec<f32>> {
        self.sidecar.embed_text(text).await
    }

    fn provider_name(&self) -> &'static str {
        self.cloud.name()
    }

    fn cloud_model(&self) -> String {
        self.cloud.model().to_string()
    }
}

/// Build the process-wide model host.
///
/// A fully mocked host is used when the mock provider is selected and no
/// sidecar endpoint is configured; otherwise local inference goes to the
/// sidecar and the cloud adapter follows `provider`.
pub fn build_model_host(
    provider: CloudProviderKind,
    openrouter_api_key: Option<&str>,
    openrouter_model: &str,
    local_model_url: Option<&str>,
) -> ModelResult<Arc<dyn ModelHost>> {
    if provider == CloudProviderKind::Mock && local_model_url.is_none() {
        return Ok(Arc::new(MockModelHost::new()));
    }

    let sidecar = SidecarClient::new(local_model_url.unwrap_or("http://localhost:9090"));
    let cloud: Box<dyn CloudCaptionProvider> = match provider {
        CloudProviderKind::Mock => Box::new(mock::MockCloudProvider::new()),
        CloudProviderKind::OpenRouter => {
            let api_key = openrouter_api_key.ok_or_else(|| {
                ModelError::Unavailable("OPENROUTER_API_KEY not set".to_string())
            })?;
            Box::new(OpenRouterProvider::new(api_key, openrouter_model))
        }
    };
    Ok(Arc::new(SidecarModelHost::new(sidecar, cloud)))
}

/// Sniff the image format from magic bytes; defaults to jpeg.
pub fn sniff_image_format(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        "jpeg"
    } else if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WEBP" {
        "webp"
    } else if bytes.starts_with(b"GIF") {
        "gif"
    } else {
        "jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("mock".parse::<CloudProviderKind>(), Ok(CloudProviderKind::Mock));
        assert_eq!(
            "OpenRouter".parse::<CloudProviderKind>(),
            Ok(CloudProviderKind::OpenRouter)
        );
        assert!("bedrock".parse::<CloudProviderKind>().is_err());
    }

    #[test]
    fn test_format_sniffing() {
        assert_eq!(sniff_image_format(&[0xff, 0xd8, 0xff, 0xe0]), "jpeg");
        assert_eq!(sniff_image_format(b"\x89PNG\r\n\x1a\n"), "png");
        assert_eq!(sniff_image_format(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "webp");
        assert_eq!(sniff_image_format(b"GIF89a"), "gif");
        assert_eq!(sniff_image_format(b"garbage"), "jpeg");
    }

    #[test]
    fn test_mock_host_selected_without_sidecar() {
        let host = build_model_host(CloudProviderKind::Mock, None, "mock/test-model", None).unwrap();
        assert_eq!(host.provider_name(), "mock");
    }

    #[test]
    fn test_openrouter_requires_api_key() {
        let result = build_model_host(
            CloudProviderKind::OpenRouter,
            None,
            "openai/gpt-4o-mini",
            None,
        );
        assert!(result.is_err());
    }
}
