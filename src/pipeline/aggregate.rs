//! Fold page verdicts into a [`DocumentResult`].
//!
//! Pure functions: no I/O, no reordering. The caller hands over verdicts
//! already in page order.

use crate::output::{DocumentResult, PageStatus, PageVerdict};

/// The most severe page status, by `fail` > `error` > `needs_review` > `pass`.
///
/// An empty slice is `pass`; a document with no pages has nothing wrong
/// with it, although the pipeline never produces one.
pub fn overall_status(pages: &[PageVerdict]) -> PageStatus {
    pages
        .iter()
        .map(|p| p.status)
        .max()
        .unwrap_or(PageStatus::Pass)
}

/// Build the exportable result for `document`.
pub fn aggregate(document: impl Into<String>, pages: Vec<PageVerdict>) -> DocumentResult {
    debug_assert!(
        pages.iter().enumerate().all(|(i, p)| p.page_index == i),
        "page verdicts must be contiguous and ordered"
    );
    DocumentResult {
        document: document.into(),
        overall_status: overall_status(&pages),
        pages,
    }
}
