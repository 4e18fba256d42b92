//! Configuration for figcrop.
//!
//! Settings are layered: built-in defaults, then a TOML file (`--config`,
//! or `figcrop.toml` in the working directory), then environment
//! variables, then command-line flags (applied by the CLI).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::vision::RetryPolicy;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "figcrop.toml";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

impl Config {
    /// Load configuration from `path`, or from `figcrop.toml` in the working
    /// directory when present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(config.with_env_overrides())
    }

    /// Parse a TOML file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.extract.apply_overrides(&lookup);
        self.vision.apply_overrides(&lookup);
        self
    }

    /// Reject settings the extraction loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extract.validate()
    }
}

/// Extraction behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Page rendering resolution
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Maximum assess rounds per label
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Score (0-10) at which a box is accepted
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u8,
    /// Maximum vision-model calls in flight across a batch
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Attempts per model call on transient failure, including the first
    #[serde(default = "default_model_attempts")]
    pub model_attempts: u32,
    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// A correction moving no edge further than this (0-1000 units) ends refinement
    #[serde(default = "default_convergence_delta")]
    pub convergence_delta: f64,
    /// Try every page when the text index has no candidates
    #[serde(default = "default_true")]
    pub full_scan_fallback: bool,
    /// First page (1-based) considered for extraction
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    /// Limit on the number of pages considered, from `start_page`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    /// Default box mode: include caption, legend and notes
    #[serde(default = "default_true")]
    pub include_extras: bool,
}

fn default_dpi() -> u32 {
    crate::render::DEFAULT_DPI
}

fn default_max_rounds() -> u32 {
    3
}

fn default_quality_threshold() -> u8 {
    8
}

fn default_max_concurrent_calls() -> usize {
    4
}

fn default_model_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_convergence_delta() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

fn default_start_page() -> u32 {
    1
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            max_rounds: default_max_rounds(),
            quality_threshold: default_quality_threshold(),
            max_concurrent_calls: default_max_concurrent_calls(),
            model_attempts: default_model_attempts(),
            retry_base_ms: default_retry_base_ms(),
            convergence_delta: default_convergence_delta(),
            full_scan_fallback: true,
            start_page: default_start_page(),
            max_pages: None,
            include_extras: true,
        }
    }
}

impl ExtractConfig {
    /// Supported env vars:
    /// - `FIGCROP_DPI`: rendering resolution
    /// - `FIGCROP_MAX_ROUNDS`: assess rounds per label
    /// - `FIGCROP_WORKERS`: concurrent model calls
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(n) = lookup("FIGCROP_DPI").and_then(|v| v.parse().ok()) {
            self.dpi = n;
        }
        if let Some(n) = lookup("FIGCROP_MAX_ROUNDS").and_then(|v| v.parse().ok()) {
            self.max_rounds = n;
        }
        if let Some(n) = lookup("FIGCROP_WORKERS").and_then(|v| v.parse().ok()) {
            self.max_concurrent_calls = n;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dpi < 36 || self.dpi > 1200 {
            return Err(ConfigError::Invalid(format!(
                "dpi must be between 36 and 1200, got {}",
                self.dpi
            )));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".into()));
        }
        if self.quality_threshold > 10 {
            return Err(ConfigError::Invalid(format!(
                "quality_threshold must be 0-10, got {}",
                self.quality_threshold
            )));
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_calls must be at least 1".into(),
            ));
        }
        if self.start_page == 0 {
            return Err(ConfigError::Invalid("start_page is 1-based".into()));
        }
        if self.max_pages == Some(0) {
            return Err(ConfigError::Invalid("max_pages must be at least 1".into()));
        }
        Ok(())
    }

    /// Retry policy for individual model calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.model_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    /// Inclusive page window `(first, last)` for a document of `page_count` pages.
    pub fn page_window(&self, page_count: u32) -> (u32, u32) {
        let first = self.start_page.max(1);
        let last = match self.max_pages {
            Some(n) => first.saturating_add(n.saturating_sub(1)).min(page_count),
            None => page_count,
        };
        (first, last)
    }
}

/// Vision-model endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key (usually supplied through the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in each reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_locate_temperature")]
    pub locate_temperature: f32,
    #[serde(default = "default_assess_temperature")]
    pub assess_temperature: f32,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fixed delay before every request
    #[serde(default)]
    pub request_delay_ms: u64,
}

fn default_endpoint() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}

fn default_model() -> String {
    "qwen3-vl-plus".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_locate_temperature() -> f32 {
    0.1
}

fn default_assess_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            locate_temperature: default_locate_temperature(),
            assess_temperature: default_assess_temperature(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: 0,
        }
    }
}

impl VisionConfig {
    /// Supported env vars (generic names win over DashScope ones):
    /// - `VISION_API_KEY` / `DASHSCOPE_API_KEY`
    /// - `VISION_ENDPOINT` / `DASHSCOPE_BASE_URL`
    /// - `VISION_MODEL` / `QWEN_VL_MODEL`
    /// - `VISION_DELAY_MS`: delay before every request
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("VISION_API_KEY").or_else(|| non_empty("DASHSCOPE_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty("VISION_ENDPOINT").or_else(|| non_empty("DASHSCOPE_BASE_URL")) {
            self.endpoint = url;
        }
        if let Some(model) = non_empty("VISION_MODEL").or_else(|| non_empty("QWEN_VL_MODEL")) {
            self.model = model;
        }
        if let Some(ms) = non_empty("VISION_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.request_delay_ms = ms;
        }
    }
}
