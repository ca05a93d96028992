//! Error types for the creative-check library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CheckError`] — **Fatal**: the check cannot proceed at all (unsupported
//!   file, empty document, rejected credential). Returned as
//!   `Err(CheckError)` from the top-level `check*` functions. No partial
//!   result is produced.
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be judged (render
//!   glitch, encoding fault, exhausted retries) but every other page is fine.
//!   Stored inside [`crate::output::PageVerdict`] with status
//!   [`crate::output::PageStatus::Error`], so the exported result still has
//!   exactly one verdict per page.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the creative-check library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageVerdict`] rather than propagated here.
#[derive(Debug, Error)]
pub enum CheckError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes are neither a supported image nor a readable PDF.
    #[error("Unsupported or corrupt input '{document}' ({media_type}): {detail}")]
    UnsupportedFormat {
        document: String,
        media_type: String,
        detail: String,
    },

    /// The document parsed but contains no pages.
    #[error("Document '{document}' has no pages")]
    EmptyDocument { document: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF requires a password but none was provided.
    #[error("PDF '{document}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { document: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{document}'")]
    WrongPassword { document: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium system-wide, or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n\
Image inputs (PNG, JPEG, GIF, WebP, BMP) do not need pdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Inference errors ──────────────────────────────────────────────────
    /// No inference backend could be built from the configuration.
    #[error("Inference backend '{backend}' is not configured.\n{hint}")]
    BackendNotConfigured { backend: String, hint: String },

    /// The inference endpoint rejected the credential (401/403).
    ///
    /// Retrying with the same key cannot succeed, so the whole run stops.
    #[error("Authentication error from backend '{backend}': {detail}")]
    AuthenticationError { backend: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the exported JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The result could not be serialised.
    #[error("Failed to serialise result: {0}")]
    Serialisation(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Page indices are 0-based, matching [`crate::output::PageVerdict::page_index`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page index {page_index}: rasterisation failed: {detail}")]
    RenderFailed { page_index: usize, detail: String },

    /// The rendered page could not be encoded for transport.
    #[error("Page index {page_index}: encoding failed: {detail}")]
    EncodingFailure { page_index: usize, detail: String },

    /// The inference call failed: transport fault, malformed response, or
    /// retries exhausted (rate limit, timeout, transient server error).
    #[error("Page index {page_index}: inference failed after {attempts} attempt(s): {detail}")]
    InferenceError {
        page_index: usize,
        attempts: u32,
        detail: String,
    },
}

impl PageError {
    /// 0-based index of the page this error belongs to.
    pub fn page_index(&self) -> usize {
        match self {
            PageError::RenderFailed { page_index, .. }
            | PageError::EncodingFailure { page_index, .. }
            | PageError::InferenceError { page_index, .. } => *page_index,
        }
    }

    /// The same error attributed to another page (a duplicate of this one).
    pub fn reindexed(&self, page_index: usize) -> Self {
        let mut error = self.clone();
        match &mut error {
            PageError::RenderFailed { page_index: idx, .. }
            | PageError::EncodingFailure { page_index: idx, .. }
            | PageError::InferenceError { page_index: idx, .. } => *idx = page_index,
        }
        error
    }
}
