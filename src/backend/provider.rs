//! Adapter from any `edgequake_llm::LLMProvider` to [`InferenceBackend`].
//!
//! Lets the checker run against Anthropic, Gemini, Azure, Ollama and the
//! other providers edgequake-llm knows about. Provider errors arrive as
//! opaque error values, so they are classified from their message text.

use super::{BackendError, InferenceBackend, InferenceRequest, RawResponse};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Wraps an edgequake-llm provider.
#[derive(Clone)]
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl std::fmt::Debug for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBackend")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    /// Create a provider by name (`openai`, `anthropic`, `gemini`, `ollama`…).
    /// The provider reads its own API key from the environment.
    pub fn from_factory(provider_name: &str, model: &str) -> Result<Self, String> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model)
            .map_err(|e| e.to_string())?;
        Ok(Self::new(provider, provider_name))
    }
}

static RATE_LIMITED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests|quota exceeded").expect("valid regex")
});
static TIMED_OUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b408\b|time[ _-]?out|timed out").expect("valid regex"));
static AUTH_FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b40[13]\b|unauthori[sz]ed|forbidden|authentication|(invalid|incorrect|missing) api[ _-]?key",
    )
    .expect("valid regex")
});
static REJECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b40[0-79]\b|\b41[0-9]\b|\b42[02]\b|bad request|invalid_request|content policy|context length",
    )
    .expect("valid regex")
});

/// Classify a provider error message.
///
/// Rate limits are checked first: their messages carry token counts that
/// can contain any digit run. Status codes only match as whole words.
pub(crate) fn classify_provider_error(message: &str) -> BackendError {
    if RATE_LIMITED.is_match(message) {
        BackendError::RateLimited { retry_after: None }
    } else if AUTH_FAILED.is_match(message) {
        BackendError::Authentication(message.to_string())
    } else if TIMED_OUT.is_match(message) {
        BackendError::Timeout
    } else if REJECTED.is_match(message) {
        BackendError::Rejected(message.to_string())
    } else {
        BackendError::Transient(message.to_string())
    }
}

#[async_trait]
impl InferenceBackend for ProviderBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawResponse, BackendError> {
        let messages = vec![
            ChatMessage::system(request.instruction),
            ChatMessage::user_with_images(
                request.request_text,
                vec![request.payload.to_image_data()],
            ),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(BackendError::Malformed("provider returned no content".into()));
        }

        Ok(RawResponse {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}
