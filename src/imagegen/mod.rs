mod openai;
mod retry;
mod sdwebui;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use openai::OpenAiImageProvider;
pub use retry::{
    GenerationOutcome, GenerationStep, Generator, ProgressFn, RetryConfig, FALLBACK_IMAGE_URL,
};
pub use sdwebui::SdWebUiProvider;

/// Result type for image generation operations
pub type ImageGenResult<T> = Result<T, ImageGenError>;

/// Errors that can occur while talking to a generation backend
#[derive(Debug, thiserror::Error)]
pub enum ImageGenError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// Hint for the desired output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHint {
    /// Small reference/thumbnail output
    Preview,
    /// Full-size submission output
    Full,
}

impl SizeHint {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SizeHint::Preview => (256, 256),
            SizeHint::Full => (512, 512),
        }
    }
}

/// A single generation request against a backend
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub size: SizeHint,
    /// Per-attempt budget, imposed by the caller (the retry orchestrator
    /// passes the remaining overall deadline here)
    pub timeout: Duration,
}

/// A successfully generated image reference
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub url: String,
    pub latency_ms: u64,
}

/// Trait all generation backends implement. No retry or backoff
/// responsibility here; that lives entirely in the orchestrator.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> ImageGenResult<GeneratedImage>;

    fn name(&self) -> &str;
}

/// Configuration for the generation backend and retry orchestration
#[derive(Debug, Clone)]
pub struct ImageGenConfig {
    pub openai_api_key: Option<String>,
    pub sdwebui_base_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for ImageGenConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            sdwebui_base_url: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ImageGenConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let non_empty = |var: &str| {
            std::env::var(var).ok().and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        let mut retry = RetryConfig::default();
        if let Some(secs) = non_empty("GEN_DEADLINE_SECS").and_then(|s| s.parse().ok()) {
            retry.overall_deadline = Duration::from_secs(secs);
        }
        if let Some(n) = non_empty("GEN_MAX_ATTEMPTS").and_then(|s| s.parse().ok()) {
            retry.max_attempts = n;
        }

        Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            sdwebui_base_url: non_empty("SDWEBUI_BASE_URL"),
            retry,
        }
    }

    /// Build the configured provider, preferring OpenAI when both are set.
    /// Returns None when no backend is configured; the orchestrator then
    /// serves fallback artifacts immediately.
    pub fn build_provider(&self) -> Option<Arc<dyn ImageProvider>> {
        if let Some(api_key) = &self.openai_api_key {
            return Some(Arc::new(OpenAiImageProvider::new(api_key.clone())));
        }
        if let Some(base_url) = &self.sdwebui_base_url {
            return Some(Arc::new(SdWebUiProvider::new(base_url.clone())));
        }
        None
    }

    pub fn build_generator(&self) -> Generator {
        Generator::new(self.build_provider(), self.retry.clone())
    }
}
