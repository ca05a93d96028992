//! OpenAI chat-completions backend over `reqwest`.
//!
//! Talks to `/chat/completions` directly rather than through a provider
//! abstraction so the HTTP status and `Retry-After` header are visible:
//! the client's retry policy depends on telling a 401 from a 429 from a 503.
//! Any OpenAI-compatible endpoint works through [`OpenAiBackend::with_base_url`].

use super::{BackendError, InferenceBackend, InferenceRequest, RawResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for one model.
#[derive(Clone)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Build a backend for `model`. `timeout` bounds each HTTP request.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at an OpenAI-compatible endpoint (Azure proxy, vLLM, LiteLLM…).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Content<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Content<'a> {
    Text(&'a str),
    Parts(Vec<Part<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

fn build_request<'a>(model: &'a str, request: &InferenceRequest<'a>) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            Message {
                role: "system",
                content: Content::Text(request.instruction),
            },
            Message {
                role: "user",
                content: Content::Parts(vec![
                    Part::Text {
                        text: request.request_text,
                    },
                    Part::ImageUrl {
                        image_url: ImageUrl {
                            url: request.payload.data_uri(),
                            detail: "high",
                        },
                    },
                ]),
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Map a non-success HTTP status to a [`BackendError`].
fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> BackendError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Authentication(detail),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => BackendError::Timeout,
        s if s.is_server_error() => BackendError::Transient(detail),
        _ => BackendError::Rejected(detail),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
///
/// Values too large for a [`Duration`] saturate to [`Duration::MAX`]; the
/// client clamps the hint to its own ceiling anyway.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn parse_completion(body: &str) -> Result<RawResponse, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Malformed(format!("invalid JSON body: {e}")))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(BackendError::Malformed("completion has no content".into()));
    }

    let (input_tokens, output_tokens) = parsed
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(RawResponse {
        text,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawResponse, BackendError> {
        let body = build_request(&self.model, &request);

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Transient(format!("reading body: {e}"))
            }
        })?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &text));
        }

        debug!("{}: HTTP {} ({} bytes)", self.model, status.as_u16(), text.len());
        parse_completion(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_page;
    use crate::pipeline::render::PageImage;
    use image::{DynamicImage, Rgba, RgbaImage};
    use reqwest::header::HeaderValue;

    #[test]
    fn status_classification() {
        let empty = HeaderMap::new();
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, &empty, "bad key"),
            BackendError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &empty, ""),
            BackendError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, ""),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, &empty, "image too large"),
            BackendError::Rejected(_)
        ));
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT, &empty, ""),
            BackendError::Timeout
        );
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, ""),
            BackendError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn oversized_retry_after_saturates() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, ""),
            BackendError::RateLimited {
                retry_after: Some(Duration::MAX)
            }
        );

        headers.insert(RETRY_AFTER, HeaderValue::from_static("inf"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn completion_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"status\":\"pass\"}"}}],
                       "usage":{"prompt_tokens":812,"completion_tokens":40,"total_tokens":852}}"#;
        let raw = parse_completion(body).unwrap();
        assert_eq!(raw.text, r#"{"status":"pass"}"#);
        assert_eq!((raw.input_tokens, raw.output_tokens), (812, 40));
    }

    #[test]
    fn empty_completion_is_malformed() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#;
        assert!(matches!(parse_completion(body), Err(BackendError::Malformed(_))));
        assert!(matches!(parse_completion("<html>"), Err(BackendError::Malformed(_))));
        assert!(matches!(parse_completion(r#"{"choices":[]}"#), Err(BackendError::Malformed(_))));
    }

    #[test]
    fn request_body_shape() {
        let page = PageImage {
            page_index: 0,
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]))),
            dpi: None,
        };
        let payload = encode_page(&page).unwrap();
        let request = InferenceRequest {
            instruction: "rules",
            request_text: "Review this creative.",
            payload: &payload,
            temperature: 0.1,
            max_tokens: 2000,
        };
        let json = serde_json::to_value(build_request("gpt-4o", &request)).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "rules");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(json["messages"][1]["content"][1]["image_url"]["detail"], "high");
        assert!(json["messages"][1]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let b = OpenAiBackend::new("k", "gpt-4o", Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(b.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert!(!format!("{b:?}").contains("\"k\""));
    }
}
