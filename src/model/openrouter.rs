//! OpenRouter vision adapter
//!
//! Captions images through the OpenRouter chat-completions API. The image is
//! sent as a base64 data URI; cost is computed from the usage block using
//! per-model pricing.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::provider::{CloudCaption, CloudCaptionProvider, Pricing};
use super::{sniff_image_format, ModelError, ModelResult};

const API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const CAPTION_PROMPT: &str = "Generate a concise, descriptive caption for this image in one \
     sentence. Focus on the main subject and key visual elements. Be specific and detailed.";

/// Known per-million-token rates; unknown models get gpt-4o-mini class
/// defaults.
fn pricing_for(model: &str) -> Pricing {
    match model {
        "openai/gpt-4o-mini" => Pricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
        "openai/gpt-4o" => Pricing {
            input_per_million: 2.50,
            output_per_million: 10.00,
        },
        "google/gemini-flash-1.5" => Pricing {
            input_per_million: 0.075,
            output_per_million: 0.30,
        },
        _ => Pricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenRouter caption provider
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    pricing: Pricing,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let pricing = pricing_for(&model);
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
            pricing,
        }
    }
}

#[async_trait]
impl CloudCaptionProvider for OpenRouterProvider {
    async fn caption(&self, image: &[u8]) -> ModelResult<CloudCaption> {
        let started = Instant::now();

        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_uri = format!("data:image/{};base64,{}", sniff_image_format(image), encoded);

        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": CAPTION_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_uri } }
                ]
            }],
            "max_tokens": 100,
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!(
                target: "prism::cloud",
                status = status.as_u16(),
                %detail,
                "openrouter request failed"
            );
            return Err(ModelError::Status {
                provider: "openrouter".to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let body: ChatResponse = response.json().await?;
        let caption = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ModelError::Decode("empty completion".to_string()))?;

        let tokens_in = body.usage.prompt_tokens;
        let tokens_out = body.usage.completion_tokens;

        Ok(CloudCaption {
            caption,
            model: self.model.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
            cost_usd: self.pricing.cost_usd(tokens_in, tokens_out),
            tokens_in,
            tokens_out,
        })
    }

    fn name(&self) -> &'static str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
