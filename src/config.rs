//! Configuration types for a compliance check.
//!
//! All check behaviour is controlled through [`CheckConfig`], built via its
//! [`CheckConfigBuilder`]. The operational tuning values (retry counts,
//! backoff, rasterisation resolution, parallelism) all live here rather
//! than in the pipeline code.

use crate::backend::InferenceBackend;
use crate::error::CheckError;
use crate::pipeline::cache::VerdictCache;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Model used by the OpenAI backend when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a compliance check.
///
/// Built via [`CheckConfig::builder()`] or using [`CheckConfig::default()`].
///
/// # Example
/// ```rust
/// use creative_check::CheckConfig;
///
/// let config = CheckConfig::builder()
///     .dpi(150)
///     .concurrency(4)
///     .max_attempts(3)
///     .api_key("sk-test")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CheckConfig {
    /// Rendering DPI used when rasterising PDF pages. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps small print such as trademark symbols legible to the
    /// model while the PNG stays well below upload limits.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps PDF renders independently of DPI so a poster-sized page cannot
    /// exhaust memory. Raster image inputs are passed through unscaled.
    pub max_rendered_pixels: u32,

    /// Number of pages judged concurrently. Default: 4.
    ///
    /// Bounded to stay inside the provider's rate limits. 1 gives strictly
    /// sequential processing with identical results.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "anthropic", "gemini", "ollama").
    /// When set, the check goes through [`crate::backend::ProviderBackend`].
    pub provider_name: Option<String>,

    /// Pre-constructed backend. Takes precedence over everything else.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Already-resolved API credential for the OpenAI backend.
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint. Default: the OpenAI API.
    pub base_url: Option<String>,

    /// Sampling temperature. Default: 0.1 for consistent judgments.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2000.
    pub max_tokens: usize,

    /// Total attempts per page, first call included. Default: 3.
    ///
    /// Only rate limits, timeouts and transient server errors are retried.
    /// Authentication failures and malformed responses are not.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds. Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s, capped at `max_backoff_ms`.
    pub retry_backoff_ms: u64,

    /// Upper bound for the exponential backoff delay. Default: 8000.
    pub max_backoff_ms: u64,

    /// Upper bound applied to a server-provided `Retry-After` hint. Default: 60.
    pub max_retry_after_secs: u64,

    /// Per-call timeout in seconds. A timeout counts as a transient failure. Default: 60.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Compliance instruction text. If None, uses
    /// [`crate::prompts::DEFAULT_COMPLIANCE_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Memo of verdicts keyed by payload fingerprint. None disables memoisation.
    pub verdict_cache: Option<Arc<VerdictCache>>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 4,
            model: None,
            provider_name: None,
            backend: None,
            api_key: None,
            base_url: None,
            temperature: 0.1,
            max_tokens: 2000,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8000,
            max_retry_after_secs: 60,
            api_timeout_secs: 60,
            password: None,
            instruction: None,
            verdict_cache: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CheckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("max_retry_after_secs", &self.max_retry_after_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("instruction", &self.instruction.as_ref().map(|s| s.len()))
            .field("verdict_cache", &self.verdict_cache.is_some())
            .finish()
    }
}

impl CheckConfig {
    /// Create a new builder for `CheckConfig`.
    pub fn builder() -> CheckConfigBuilder {
        CheckConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Exponential backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_policy().backoff_for(retry)
    }

    /// The retry settings as one value the client can hold on to.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            retry_backoff_ms: self.retry_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Attempt bound and wait schedule for one page's model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls per page, the first one included.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Ceiling for a server-provided retry hint.
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    /// `retry_backoff_ms * 2^(retry-1)`, capped at `max_backoff_ms`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Wait before retry number `retry`. A server hint replaces the computed
    /// backoff but never exceeds `max_retry_after`.
    pub fn delay_before(&self, retry: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_retry_after),
            None => self.backoff_for(retry),
        }
    }
}

/// Builder for [`CheckConfig`].
pub struct CheckConfigBuilder {
    config: CheckConfig,
}

impl fmt::Debug for CheckConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl CheckConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn max_retry_after_secs(mut self, secs: u64) -> Self {
        self.config.max_retry_after_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn verdict_cache(mut self, cache: Arc<VerdictCache>) -> Self {
        self.config.verdict_cache = Some(cache);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CheckConfig, CheckError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(CheckError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(CheckError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(CheckError::InvalidConfig(
                "max_attempts must be ≥ 1 (the first call counts as an attempt)".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(CheckError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if matches!(c.instruction.as_deref(), Some(text) if text.trim().is_empty()) {
            return Err(CheckError::InvalidConfig(
                "Compliance instruction is empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = CheckConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_clamps() {
        let c = CheckConfig::builder()
            .dpi(1000)
            .concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn debug_redacts_secrets_and_shows_retry_ceiling() {
        let c = CheckConfig::builder()
            .api_key("sk-live-secret")
            .password("hunter2")
            .max_retry_after_secs(17)
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("max_retry_after_secs: 17"), "{dbg}");
        assert!(!dbg.contains("sk-live-secret"));
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("password: Some(\"<redacted>\")"), "{dbg}");
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = CheckConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, CheckError::InvalidConfig(_)));
    }

    #[test]
    fn blank_instruction_rejected() {
        let err = CheckConfig::builder().instruction("  \n").build().unwrap_err();
        assert!(err.to_string().contains("instruction"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = CheckConfig::builder()
            .retry_backoff_ms(500)
            .max_backoff_ms(1500)
            .build()
            .unwrap();
        assert_eq!(c.backoff_for(1), Duration::from_millis(500));
        assert_eq!(c.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(c.backoff_for(3), Duration::from_millis(1500));
        assert_eq!(c.backoff_for(40), Duration::from_millis(1500));

        let policy = c.retry_policy();
        assert_eq!(policy.delay_before(2, None), c.backoff_for(2));
        assert_eq!(
            policy.delay_before(1, Some(Duration::MAX)),
            Duration::from_secs(c.max_retry_after_secs)
        );
        assert_eq!(
            policy.delay_before(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }
}
