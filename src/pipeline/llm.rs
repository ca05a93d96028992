//! Model interaction: submit one encoded page and get the raw verdict text.
//!
//! This module is intentionally thin. The instruction text lives in
//! [`crate::prompts`], parsing lives in [`crate::pipeline::verdict`], and the
//! transport lives behind [`InferenceBackend`]. What stays here is the retry
//! policy.
//!
//! ## Retry Strategy
//!
//! Rate limits, timeouts and transient server errors are retried with
//! exponential backoff (`retry_backoff_ms * 2^(n-1)`, capped at
//! `max_backoff_ms`). A server-provided retry hint replaces the computed
//! delay, clamped to `max_retry_after_secs`. With the defaults the wait
//! sequence is 500 ms → 1 s before the third and last attempt.
//!
//! Authentication failures abort the whole check: every remaining page would
//! fail the same way. Rejected and malformed responses fail the page at once.

use crate::backend::{BackendError, InferenceBackend, InferenceRequest};
use crate::config::{CheckConfig, RetryPolicy};
use crate::error::PageError;
use crate::pipeline::encode::EncodedPayload;
use crate::prompts::{page_request_text, DEFAULT_COMPLIANCE_INSTRUCTION};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A successful model answer for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub latency_ms: u64,
    /// Billed calls it took, including the successful one.
    pub attempts: u32,
}

/// Why a page got no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The credential was refused. Fatal for the whole check.
    Authentication {
        backend: String,
        detail: String,
        attempts: u32,
    },
    /// This page failed; the rest of the document continues.
    Page(PageError),
}

impl ClientError {
    /// Billed calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            ClientError::Authentication { attempts, .. } => *attempts,
            ClientError::Page(PageError::InferenceError { attempts, .. }) => *attempts,
            ClientError::Page(_) => 0,
        }
    }
}

/// Sends pages to the configured backend with retry, backoff and timeout.
pub struct ComplianceClient {
    backend: Arc<dyn InferenceBackend>,
    instruction: String,
    temperature: f32,
    max_tokens: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ComplianceClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &CheckConfig) -> Self {
        Self {
            backend,
            instruction: config
                .instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPLIANCE_INSTRUCTION.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: config.retry_policy(),
            call_timeout: config.api_timeout(),
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Delay before retry number `retry` (1-based).
    fn retry_delay(&self, retry: u32, error: &BackendError) -> Duration {
        let hint = match error {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        self.retry.delay_before(retry, hint)
    }

    /// Ask the model for a verdict on one page.
    ///
    /// Makes at most `max_attempts` billed calls.
    pub async fn judge(
        &self,
        payload: &EncodedPayload,
        document: &str,
        total_pages: usize,
    ) -> Result<InferenceResponse, ClientError> {
        let page_index = payload.page_index;
        let request_text = page_request_text(document, page_index, total_pages);
        let request = InferenceRequest {
            instruction: &self.instruction,
            request_text: &request_text,
            payload,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = match timeout(self.call_timeout, self.backend.infer(request)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            };

            let error = match outcome {
                Ok(raw) if !raw.text.trim().is_empty() => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {}ms, {} attempt(s)",
                        page_index + 1,
                        raw.input_tokens,
                        raw.output_tokens,
                        latency_ms,
                        attempt
                    );
                    return Ok(InferenceResponse {
                        text: raw.text,
                        input_tokens: raw.input_tokens,
                        output_tokens: raw.output_tokens,
                        latency_ms,
                        attempts: attempt,
                    });
                }
                Ok(_) => BackendError::Malformed("empty response".into()),
                Err(e) => e,
            };

            if let BackendError::Authentication(detail) = error {
                return Err(ClientError::Authentication {
                    backend: self.backend.name().to_string(),
                    detail,
                    attempts: attempt,
                });
            }

            if error.is_retryable() && attempt < self.retry.max_attempts {
                let delay = self.retry_delay(attempt, &error);
                warn!(
                    "Page {}: attempt {}/{} failed ({}), retrying in {}ms",
                    page_index + 1,
                    attempt,
                    self.retry.max_attempts,
                    error,
                    delay.as_millis()
                );
                sleep(delay).await;
                continue;
            }

            warn!(
                "Page {}: giving up after {} attempt(s): {}",
                page_index + 1,
                attempt,
                error
            );
            return Err(ClientError::Page(PageError::InferenceError {
                page_index,
                attempts: attempt,
                detail: error.to_string(),
            }));
        }
    }
}
