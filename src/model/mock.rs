//! Deterministic mock models
//!
//! Captions and embeddings derived from the image hash, so repeated calls
//! agree and tests can assert exact values. The mock host also supports
//! per-tier failure injection to exercise the fallback chain.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::provider::{CloudCaption, CloudCaptionProvider, Pricing};
use super::{LocalCaption, ModelError, ModelHost, ModelResult};

const MOCK_MODEL: &str = "mock/test-model";

const MOCK_CAPTIONS: [&str; 5] = [
    "A beautiful landscape with mountains in the background",
    "A detailed close-up photograph showing intricate patterns",
    "An artistic composition with vibrant colors and textures",
    "A serene scene capturing natural lighting and shadows",
    "A modern abstract design with geometric elements",
];

/// Embedding dimensionality matching the default CLIP ViT-B/32 space
const MOCK_EMBED_DIM: usize = 512;

fn caption_for(image: &[u8]) -> &'static str {
    let digest = Sha256::digest(image);
    MOCK_CAPTIONS[digest[0] as usize % MOCK_CAPTIONS.len()]
}

/// Hash-seeded unit vector; identical bytes embed identically.
fn embedding_for(seed: &[u8]) -> Vec<f32> {
    let digest = Sha256::digest(seed);
    let mut values: Vec<f32> = (0..MOCK_EMBED_DIM)
        .map(|i| {
            let byte = digest[i % digest.len()];
            let mixed = byte.wrapping_mul(31).wrapping_add((i / digest.len()) as u8);
            (mixed as f32 / 255.0) - 0.5
        })
        .collect();
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
    values
}

/// Mock cloud provider: deterministic caption, plausible token accounting
pub struct MockCloudProvider {
    pricing: Pricing,
}

impl MockCloudProvider {
    pub fn new() -> Self {
        Self {
            pricing: Pricing {
                input_per_million: 0.0001,
                output_per_million: 0.0004,
            },
        }
    }
}

impl Default for MockCloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudCaptionProvider for MockCloudProvider {
    async fn caption(&self, image: &[u8]) -> ModelResult<CloudCaption> {
        let started = Instant::now();
        let caption = caption_for(image).to_string();
        let tokens_in = 1000;
        let tokens_out = caption.split_whitespace().count() as u64;
        // Floor keeps mock spend from rounding to zero
        let cost_usd = self.pricing.cost_usd(tokens_in, tokens_out).max(0.000001);

        Ok(CloudCaption {
            caption,
            model: MOCK_MODEL.to_string(),
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd,
            tokens_in,
            tokens_out,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        MOCK_MODEL
    }
}

/// Fully mocked model host for development and tests
pub struct MockModelHost {
    cloud: MockCloudProvider,
    fail_local: AtomicBool,
    fail_cloud: AtomicBool,
}

impl MockModelHost {
    pub fn new() -> Self {
        Self {
            cloud: MockCloudProvider::new(),
            fail_local: AtomicBool::new(false),
            fail_cloud: AtomicBool::new(false),
        }
    }

    /// Make subsequent local caption calls fail
    pub fn set_fail_local(&self, fail: bool) {
        self.fail_local.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent cloud caption calls fail
    pub fn set_fail_cloud(&self, fail: bool) {
        self.fail_cloud.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockModelHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelHost for MockModelHost {
    async fn caption_local(&self, image: &[u8]) -> ModelResult<LocalCaption> {
        if self.fail_local.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("mock local failure".to_string()));
        }
        let started = Instant::now();
        Ok(LocalCaption {
            caption: caption_for(image).to_string(),
            confidence: None,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn caption_cloud(&self, image: &[u8]) -> ModelResult<CloudCaption> {
        if self.fail_cloud.load(Ordering::SeqCst) {
            return Err(ModelError::Unavailable("mock cloud failure".to_string()));
        }
        self.cloud.caption(image).await
    }

    async fn embed_image(&self, image: &[u8]) -> ModelResult<Vec<f32>> {
        Ok(embedding_for(image))
    }

    async fn embed_text(&self, text: &str) -> ModelResult<Vec<f32>> {
        Ok(embedding_for(text.as_bytes()))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn cloud_model(&self) -> String {
        MOCK_MODEL.to_string()
    }
}
