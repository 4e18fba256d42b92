//! OpenAI-compatible chat-completions vision client.
//!
//! Works with any endpoint that accepts `image_url` content parts carrying
//! base64 data URLs: DashScope's compatible mode (Qwen-VL, the default),
//! OpenAI, Groq, or a local server.
//!
//! Rate limiting:
//! - `request_delay_ms` (env `VISION_DELAY_MS`) waits before every request
//! - HTTP 429 surfaces as [`VisionError::RateLimited`] carrying the
//!   `Retry-After` hint, which [`super::call_with_retry`] honors

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::{assess_prompt, locate_prompt};
use super::response::{parse_assess, parse_locate, AssessReply, LocateReply};
use super::{png_data_url, AssessRequest, LocateRequest, VisionError, VisionModel};
use crate::config::VisionConfig;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ChatContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Vision model reached over an OpenAI-compatible HTTP API.
pub struct OpenAiVision {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    locate_temperature: f32,
    assess_temperature: f32,
    request_delay: Duration,
}

impl OpenAiVision {
    /// Build a client from configuration. Fails when no API key is set.
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                VisionError::NotConfigured(
                    "no API key; set DASHSCOPE_API_KEY or VISION_API_KEY".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VisionError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            locate_temperature: config.locate_temperature,
            assess_temperature: config.assess_temperature,
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// One chat completion with a single image and a text prompt.
    async fn complete(
        &self,
        data_url: String,
        prompt: String,
        temperature: f32,
    ) -> Result<String, VisionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ChatContent::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                    ChatContent::Text { text: prompt },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature,
        };

        if self.request_delay > Duration::ZERO {
            debug!("Vision: waiting {:?} before request", self.request_delay);
            tokio::time::sleep(self.request_delay).await;
        }

        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VisionError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(VisionError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Parse(format!("response body: {}", e)))?;

        if let Some(error) = chat.error {
            return Err(VisionError::Api {
                status: status.as_u16(),
                body: error.message,
            });
        }

        Ok(chat
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn locate(&self, request: LocateRequest<'_>) -> Result<LocateReply, VisionError> {
        let data_url = png_data_url(request.image)?;
        let prompt = locate_prompt(request.label, request.mode);
        let text = self
            .complete(data_url, prompt, self.locate_temperature)
            .await?;
        debug!("locate {} -> {}", request.label, text.trim());
        parse_locate(&text)
    }

    async fn assess(&self, request: AssessRequest<'_>) -> Result<AssessReply, VisionError> {
        let data_url = png_data_url(request.overlay)?;
        let prompt = assess_prompt(request.label, request.mode, request.current);
        let text = self
            .complete(data_url, prompt, self.assess_temperature)
            .await?;
        debug!("assess {} -> {}", request.label, text.trim());
        parse_assess(&text)
    }
}
