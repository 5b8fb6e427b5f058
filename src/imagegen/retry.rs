//! Bounded-retry orchestration around a generation backend.
//!
//! Wraps a single slow, fallible call with a maximum attempt count, an
//! overall deadline, and exponential backoff. Every attempt races the
//! *remaining* deadline, so one slow attempt cannot blow the budget. When
//! everything fails the caller gets a deterministic, clearly-tagged
//! fallback reference; a raw provider error never escapes this module.

use super::{GenerateRequest, ImageProvider, SizeHint};
use crate::types::GenerationStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deterministic placeholder reference substituted when generation fails
pub const FALLBACK_IMAGE_URL: &str = "fallback://generation-failed";

/// Knobs for the retry loop
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Overall budget across all attempts and backoff waits
    pub overall_deadline: Duration,
    pub max_attempts: u32,
    /// First backoff delay; doubles each attempt
    pub base_backoff: Duration,
    /// Backoff cap (also clamped to the remaining deadline)
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            overall_deadline: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Progress milestones emitted during submission-level generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStep {
    Queued,
    Generating { attempt: u32 },
    Saving,
    Complete,
    Failed,
}

impl GenerationStep {
    /// (step index, total steps, message) for progress notifications
    pub fn describe(&self) -> (u32, u32, String) {
        match self {
            GenerationStep::Queued => (1, 4, "Queued for generation".to_string()),
            GenerationStep::Generating { attempt } => {
                (2, 4, format!("Generating image (attempt {})", attempt))
            }
            GenerationStep::Saving => (3, 4, "Saving image".to_string()),
            GenerationStep::Complete => (4, 4, "Image ready".to_string()),
            GenerationStep::Failed => (4, 4, "Generation failed, using placeholder".to_string()),
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(GenerationStep) + Send + Sync>;

/// The result of an orchestrated generation. Always usable: callers only
/// ever see a real reference or the tagged fallback.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub url: String,
    pub status: GenerationStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl GenerationOutcome {
    fn fallback(attempts: u32, error: String) -> Self {
        Self {
            url: FALLBACK_IMAGE_URL.to_string(),
            status: GenerationStatus::Failed,
            attempts,
            error: Some(error),
        }
    }
}

/// Retry/timeout orchestrator over an optional backend
pub struct Generator {
    provider: Option<Arc<dyn ImageProvider>>,
    config: RetryConfig,
}

impl Generator {
    pub fn new(provider: Option<Arc<dyn ImageProvider>>, config: RetryConfig) -> Self {
        Self { provider, config }
    }

    /// True when a real backend is configured
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Generate an image for `prompt`, absorbing all provider failures.
    pub async fn generate(
        &self,
        prompt: &str,
        size: SizeHint,
        progress: Option<&ProgressFn>,
    ) -> GenerationOutcome {
        let emit = |step: GenerationStep| {
            if let Some(f) = progress {
                f(step);
            }
        };

        emit(GenerationStep::Queued);

        let provider = match &self.provider {
            Some(p) => p.clone(),
            None => {
                emit(GenerationStep::Failed);
                return GenerationOutcome::fallback(0, "no generation backend configured".into());
            }
        };

        let started = Instant::now();
        let mut last_error = "deadline elapsed before first attempt".to_string();
        let mut attempts = 0u32;

        for attempt in 1..=self.config.max_attempts {
            let remaining = match self.config.overall_deadline.checked_sub(started.elapsed()) {
                Some(d) if !d.is_zero() => d,
                _ => break,
            };

            attempts = attempt;
            emit(GenerationStep::Generating { attempt });

            let request = GenerateRequest {
                prompt: prompt.to_string(),
                size,
                timeout: remaining,
            };

            // The outer timeout abandons the in-flight attempt once the
            // overall deadline elapses; its eventual result is discarded.
            let result = tokio::time::timeout(remaining, provider.generate(request)).await;

            match result {
                Ok(Ok(image)) => {
                    // Sanity check: non-empty and not an error sentinel
                    if image.url.trim().is_empty() || image.url.starts_with("fallback://") {
                        last_error = format!(
                            "provider {} returned an unusable reference",
                            provider.name()
                        );
                        tracing::warn!("{} (attempt {})", last_error, attempt);
                    } else {
                        emit(GenerationStep::Saving);
                        tracing::info!(
                            "Generated image via {} in {}ms (attempt {})",
                            provider.name(),
                            image.latency_ms,
                            attempt
                        );
                        emit(GenerationStep::Complete);
                        return GenerationOutcome {
                            url: image.url,
                            status: GenerationStatus::Completed,
                            attempts,
                            error: None,
                        };
                    }
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "Generation attempt {}/{} failed: {}",
                        attempt,
                        self.config.max_attempts,
                        last_error
                    );
                }
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", remaining);
                    tracing::warn!("Generation attempt {} abandoned: {}", attempt, last_error);
                    // Remaining deadline is spent; no point backing off
                    break;
                }
            }

            if attempt < self.config.max_attempts {
                let backoff = self
                    .config
                    .base_backoff
                    .saturating_mul(1 << (attempt - 1))
                    .min(self.config.max_backoff);
                // Always shortened to respect the remaining deadline
                let backoff = match self.config.overall_deadline.checked_sub(started.elapsed()) {
                    Some(left) => backoff.min(left),
                    None => break,
                };
                tokio::time::sleep(backoff).await;
            }
        }

        emit(GenerationStep::Failed);
        GenerationOutcome::fallback(attempts, last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagegen::{GeneratedImage, ImageGenError, ImageGenResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ImageProvider for AlwaysFails {
        async fn generate(&self, _request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ImageGenError::ApiError("boom".to_string()))
        }

        fn name(&self) -> &str {
            "always-fails"
        }
    }

    struct SucceedsAfter {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ImageProvider for SucceedsAfter {
        async fn generate(&self, _request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ImageGenError::ApiError("flaky".to_string()))
            } else {
                Ok(GeneratedImage {
                    url: "https://images.example/ok.png".to_string(),
                    latency_ms: 5,
                })
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct HangsForever;

    #[async_trait]
    impl ImageProvider for HangsForever {
        async fn generate(&self, _request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hangs"
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            overall_deadline: Duration::from_millis(500),
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_no_provider_returns_fallback_immediately() {
        let generator = Generator::new(None, fast_config());
        let outcome = generator.generate("a cat", SizeHint::Full, None).await;

        assert_eq!(outcome.url, FALLBACK_IMAGE_URL);
        assert_eq!(outcome.status, GenerationStatus::Failed);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_always_failing_provider_exhausts_attempts_within_deadline() {
        let provider = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
        });
        let generator = Generator::new(Some(provider.clone()), fast_config());

        let started = Instant::now();
        let outcome = generator.generate("a cat", SizeHint::Full, None).await;

        assert_eq!(outcome.url, FALLBACK_IMAGE_URL);
        assert_eq!(outcome.status, GenerationStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(outcome.error.is_some());
        // Deadline plus a little slop, never more
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let provider = Arc::new(SucceedsAfter {
            failures_left: AtomicU32::new(2),
        });
        let generator = Generator::new(Some(provider), fast_config());

        let outcome = generator.generate("a cat", SizeHint::Full, None).await;

        assert_eq!(outcome.status, GenerationStatus::Completed);
        assert_eq!(outcome.url, "https://images.example/ok.png");
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_hanging_provider_is_abandoned_at_deadline() {
        let generator = Generator::new(Some(Arc::new(HangsForever)), fast_config());

        let started = Instant::now();
        let outcome = generator.generate("a cat", SizeHint::Full, None).await;

        assert_eq!(outcome.status, GenerationStatus::Failed);
        assert_eq!(outcome.url, FALLBACK_IMAGE_URL);
        // One in-flight attempt consumed the whole budget and was cut off
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_progress_milestones_reported_in_order() {
        let provider = Arc::new(SucceedsAfter {
            failures_left: AtomicU32::new(0),
        });
        let generator = Generator::new(Some(provider), fast_config());

        let steps: Arc<std::sync::Mutex<Vec<GenerationStep>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = steps.clone();
        let progress: ProgressFn = Arc::new(move |step| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(step);
            }
        });

        let outcome = generator
            .generate("a cat", SizeHint::Full, Some(&progress))
            .await;
        assert_eq!(outcome.status, GenerationStatus::Completed);

        let recorded = steps.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                GenerationStep::Queued,
                GenerationStep::Generating { attempt: 1 },
                GenerationStep::Saving,
                GenerationStep::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_unusable_reference_is_rejected() {
        struct EmptyUrl;

        #[async_trait]
        impl ImageProvider for EmptyUrl {
            async fn generate(&self, _request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
                Ok(GeneratedImage {
                    url: "  ".to_string(),
                    latency_ms: 1,
                })
            }

            fn name(&self) -> &str {
                "empty"
            }
        }

        let generator = Generator::new(Some(Arc::new(EmptyUrl)), fast_config());
        let outcome = generator.generate("a cat", SizeHint::Full, None).await;

        assert_eq!(outcome.status, GenerationStatus::Failed);
        assert_eq!(outcome.url, FALLBACK_IMAGE_URL);
    }
}
