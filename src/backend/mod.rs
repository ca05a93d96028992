//! Inference backends: the seam between the pipeline and a vision model.
//!
//! The pipeline only needs one operation: send an instruction, a short
//! request text and one page image, and get text back. [`InferenceBackend`]
//! captures that, and [`BackendError`] classifies failures so the
//! [`crate::pipeline::llm::ComplianceClient`] can decide what to retry.
//!
//! | Backend | Transport | Error classification |
//! |---------|-----------|----------------------|
//! | [`OpenAiBackend`]   | chat-completions over `reqwest` | HTTP status + `Retry-After` |
//! | [`ProviderBackend`] | any `edgequake_llm::LLMProvider` | provider error message |
//!
//! Tests plug in scripted implementations of the trait.

pub mod openai;
pub mod provider;

pub use openai::OpenAiBackend;
pub use provider::ProviderBackend;

use crate::pipeline::encode::EncodedPayload;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One page submission.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    /// Compliance instruction, sent verbatim as the system message.
    pub instruction: &'a str,
    /// Short user-turn text naming the file and page.
    pub request_text: &'a str,
    pub payload: &'a EncodedPayload,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// What a backend returns for a successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Credential rejected (401/403). Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// HTTP 429. Retried, honouring `retry_after` when the server sent one.
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx, connection reset and similar. Retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// The call did not complete in time. Retried with backoff.
    #[error("request timed out")]
    Timeout,

    /// Request refused for a reason retrying will not fix (400, 404, 413…).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Response arrived but could not be read as a completion.
    #[error("malformed response: {0}")]
    Malformed(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

impl BackendError {
    /// Whether the client should try the same page again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. } | BackendError::Transient(_) | BackendError::Timeout
        )
    }
}

/// A vision-capable model endpoint.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short identifier used in logs and errors (e.g. "openai").
    fn name(&self) -> &str;

    /// Submit one page. Exactly one billed call per invocation.
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::Timeout.is_retryable());
        assert!(BackendError::Transient("503".into()).is_retryable());
        assert!(BackendError::RateLimited { retry_after: None }.is_retryable());
        assert!(!BackendError::Authentication("401".into()).is_retryable());
        assert!(!BackendError::Rejected("400".into()).is_retryable());
        assert!(!BackendError::Malformed("no choices".into()).is_retryable());
    }

    #[test]
    fn rate_limit_display_includes_hint() {
        let e = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(e.to_string(), "rate limited (retry after 2000ms)");
        let e = BackendError::RateLimited { retry_after: None };
        assert_eq!(e.to_string(), "rate limited");
    }
}
