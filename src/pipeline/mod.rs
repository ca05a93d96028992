//! Pipeline stages for a compliance check.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ verdict ──▶ aggregate
//! (bytes)  (pdfium)   (base64)  (model)   (parse)     (result)
//! ```
//!
//! 1. [`input`]  — sniff the media type of the uploaded bytes
//! 2. [`render`] — rasterise pages; runs in `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`encode`] — PNG-encode and base64-wrap each page, fingerprint it
//! 4. [`llm`]    — drive the model call with retry/backoff/timeout; the only
//!    stage with network I/O
//! 5. [`verdict`] — tolerant parsing of the model's answer into a typed verdict
//! 6. [`aggregate`] — fold page verdicts into the exported document result
//!
//! [`cache`] memoises verdicts by fingerprint across pages and runs.

pub mod aggregate;
pub mod cache;
pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
pub mod verdict;
