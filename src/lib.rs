//! # creative-check
//!
//! Check creative assets (banners, flyers, multi-page PDF decks) against the
//! branding rules of a customer-satisfaction survey program, using a
//! vision-capable language model as the reviewer.
//!
//! ## Why this crate?
//!
//! The rules ("state the survey year", "no unqualified No.1 claims", "the
//! issuer name carries ®") are written for people, not for a rules engine.
//! Instead of encoding them, this crate renders each page to an image, sends
//! it with the rule text to a vision model, and turns the answer into a typed
//! verdict a reviewer can act on: `pass`, `needs_review`, `fail`, or `error`
//! when the model could not be consulted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Input      sniff PNG / JPEG / GIF / WebP / BMP / PDF
//!  ├─ 2. Render     one image per page via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     PNG → base64, SHA-256 fingerprint
//!  ├─ 4. Judge      concurrent model calls with retry/backoff/timeout
//!  ├─ 5. Parse      tolerant verdict parsing (JSON, fences, plain text)
//!  └─ 6. Aggregate  ordered page verdicts + overall status → JSON export
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use creative_check::{check_file, CheckConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CheckConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .build()?;
//!     let output = check_file("banner.pdf", &config).await?;
//!     println!("{}", output.result.to_json()?);
//!     eprintln!("overall: {}", output.result.overall_status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `creative-check` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! creative-check = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod check;
pub mod config;
pub mod credentials;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendError, InferenceBackend, InferenceRequest, RawResponse};
pub use check::{check, check_file, check_pages, check_sync, check_to_file, resolve_backend};
pub use config::{CheckConfig, CheckConfigBuilder, RetryPolicy, DEFAULT_MODEL};
pub use credentials::{CredentialChain, CredentialSource, ResolvedCredential};
pub use error::{CheckError, PageError};
pub use output::{
    CheckOutput, CheckStats, DetectedElements, DocumentResult, Finding, PageStatus, PageVerdict,
    Severity, StatusCounts,
};
pub use pipeline::cache::VerdictCache;
pub use pipeline::input::{InputDocument, MediaType};
pub use progress::{CheckProgressCallback, NoopProgressCallback, ProgressCallback};
