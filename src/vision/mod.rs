//! Vision-model access.
//!
//! The extraction core talks to the model through the narrow [`VisionModel`]
//! trait: one call to locate a figure on a page, one call to grade a
//! candidate box drawn onto the page. The HTTP implementation lives in
//! [`openai`]; tests substitute scripted fakes.
//!
//! Transient failures (network, timeouts, 429, 5xx) are retried by
//! [`call_with_retry`] with exponential backoff.

pub mod openai;
pub mod prompts;
pub mod response;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::codecs::png::CompressionType;
use image::RgbImage;
use thiserror::Error;
use tracing::warn;

use crate::bbox::BoxMode;
use crate::label::FigureLabel;
use crate::render::encode_png;

pub use openai::OpenAiVision;
pub use response::{AssessReply, LocateReply};

/// Errors from a vision-model call.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision model not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Vision API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unparseable model response: {0}")]
    Parse(String),

    #[error("Image encoding failed: {0}")]
    Image(String),
}

impl VisionError {
    /// Network, timeout, rate-limit and server-side failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            VisionError::Http(_) | VisionError::RateLimited { .. } => true,
            VisionError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Ask the model where `label` is on a page.
#[derive(Debug, Clone, Copy)]
pub struct LocateRequest<'a> {
    pub image: &'a RgbImage,
    pub label: &'a FigureLabel,
    pub mode: BoxMode,
}

/// Ask the model to grade `current` (already drawn onto `overlay`).
#[derive(Debug, Clone, Copy)]
pub struct AssessRequest<'a> {
    pub overlay: &'a RgbImage,
    pub label: &'a FigureLabel,
    pub mode: BoxMode,
    /// Current box in 0-1000 model units.
    pub current: [f64; 4],
}

/// The two questions the extraction core asks a vision model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    async fn locate(&self, request: LocateRequest<'_>) -> Result<LocateReply, VisionError>;

    async fn assess(&self, request: AssessRequest<'_>) -> Result<AssessReply, VisionError>;
}

/// How often and how patiently to retry transient model failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(Duration::from_secs(60))
}

/// Run `call`, retrying transient errors up to `policy.attempts` times.
///
/// A rate-limit error's `Retry-After` hint (capped at 60s) replaces the
/// computed backoff for that attempt.
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, VisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VisionError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let wait = match &e {
                    VisionError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => Duration::from_secs((*secs).min(60)),
                    _ => backoff_delay(attempt, policy.base_delay),
                };
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    attempts,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Encode an image as a PNG `data:` URL for chat-style vision APIs.
pub fn png_data_url(image: &RgbImage) -> Result<String, VisionError> {
    let bytes = encode_png(image, CompressionType::Fast)
        .map_err(|e| VisionError::Image(e.to_string()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:image/png;base64,{}", encoded))
}
