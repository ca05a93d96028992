//! Progress-callback trait for per-page check events.
//!
//! Inject an [`Arc<dyn CheckProgressCallback>`] via
//! [`crate::config::CheckConfigBuilder::progress_callback`] to receive
//! events as the pipeline judges each page. The binary forwards them to an
//! `indicatif` progress bar; a web front end could forward them to a socket.
//!
//! # Example
//!
//! ```rust
//! use creative_check::{CheckConfig, CheckProgressCallback, PageStatus};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl CheckProgressCallback for FailCounter {
//!     fn on_page_complete(&self, _page_index: usize, _total: usize, status: PageStatus) {
//!         if status == PageStatus::Fail {
//!             self.failed.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = CheckConfig::builder()
//!     .progress_callback(Arc::new(FailCounter { failed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageStatus;
use std::sync::Arc;

/// Called by the pipeline as it judges each page.
///
/// Pages are judged concurrently, so the per-page methods may be called from
/// several tasks at once and in any order. All methods default to no-ops.
/// Page indices are 0-based.
pub trait CheckProgressCallback: Send + Sync {
    /// Called once, after rasterisation, with the number of pages.
    fn on_check_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is submitted to the model.
    fn on_page_start(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// Called when a page received a verdict.
    fn on_page_complete(&self, page_index: usize, total_pages: usize, status: PageStatus) {
        let _ = (page_index, total_pages, status);
    }

    /// Called when a page could not be judged (render, encode or inference failure).
    fn on_page_error(&self, page_index: usize, total_pages: usize, error: &str) {
        let _ = (page_index, total_pages, error);
    }

    /// Called once after every page has a verdict.
    fn on_check_complete(&self, total_pages: usize, judged_pages: usize) {
        let _ = (total_pages, judged_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CheckProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CheckConfig`].
pub type ProgressCallback = Arc<dyn CheckProgressCallback>;
