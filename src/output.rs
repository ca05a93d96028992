//! Verdict and result types produced by a compliance check.
//!
//! [`DocumentResult`] is the exported unit: it serialises to
//!
//! ```json
//! {"document": "banner.pdf", "overall_status": "fail",
//!  "pages": [{"page_index": 0, "status": "fail",
//!             "findings": [{"severity": "violation", "description": "…"}]}]}
//! ```
//!
//! Optional keys (`category`, `location`, `error`, `company_name`,
//! `detected_elements`, `notes`, `raw_response`) are left
//! out when empty so the common case matches the minimal shape above.
//! Run statistics live in [`CheckStats`], outside the exported JSON, so that
//! two runs over the same document with the same model answers export
//! byte-identical results.

use crate::error::{CheckError, PageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How serious a single [`Finding`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A rule is broken; the creative cannot ship as is.
    Violation,
    /// Something a reviewer should look at.
    Warning,
    /// Informational note, no action required.
    Info,
}

impl Severity {
    /// The page status a finding of this severity implies on its own.
    pub fn implied_status(self) -> PageStatus {
        match self {
            Severity::Violation => PageStatus::Fail,
            Severity::Warning => PageStatus::NeedsReview,
            Severity::Info => PageStatus::Pass,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Violation => "violation",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict status of a page or of a whole document.
///
/// Variants are declared from least to most severe, so `Ord` gives the
/// precedence used for aggregation: `fail` > `error` > `needs_review` > `pass`.
///
/// `Error` means the model could not be consulted for the page. It is kept
/// apart from `Fail` (the model found a violation) so the two are never
/// confused in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pass,
    NeedsReview,
    Error,
    Fail,
}

impl PageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PageStatus::Pass => "pass",
            PageStatus::NeedsReview => "needs_review",
            PageStatus::Error => "error",
            PageStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flagged compliance issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub description: String,
    /// Rule family the model attributed the issue to (e.g. "prohibited wording").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Where on the page the issue is, in the model's words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            category: None,
            location: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// The award-mention elements the model read off the page.
///
/// Reported so a reviewer can compare what the model saw with the creative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedElements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    /// Whether the ® symbol is attached to the issuer name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trademark_symbol: Option<bool>,
}

impl DetectedElements {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Description of the synthetic finding attached to unparseable responses.
pub const UNPARSEABLE_FINDING: &str = "unparseable model response";

/// The judgment for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVerdict {
    /// 0-based page index, matching the source document order.
    pub page_index: usize,
    pub status: PageStatus,
    pub findings: Vec<Finding>,
    /// Why the page could not be judged. Set only when `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    /// Advertiser named on the creative, when the model identified one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_elements: Option<DetectedElements>,
    /// Free-form remarks the model wants a reviewer to confirm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Model output kept verbatim when it could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl PageVerdict {
    pub fn new(page_index: usize, status: PageStatus, findings: Vec<Finding>) -> Self {
        Self {
            page_index,
            status,
            findings,
            error: None,
            company_name: None,
            detected_elements: None,
            notes: None,
            raw_response: None,
        }
    }

    /// Verdict for a page the pipeline could not get judged.
    pub fn failed(error: PageError) -> Self {
        Self {
            page_index: error.page_index(),
            status: PageStatus::Error,
            findings: Vec::new(),
            error: Some(error),
            company_name: None,
            detected_elements: None,
            notes: None,
            raw_response: None,
        }
    }

    /// Verdict for a page whose model response carried no recognisable verdict.
    pub fn unparseable(page_index: usize, raw: impl Into<String>) -> Self {
        Self {
            page_index,
            status: PageStatus::NeedsReview,
            findings: vec![Finding::new(Severity::Warning, UNPARSEABLE_FINDING)],
            error: None,
            company_name: None,
            detected_elements: None,
            notes: None,
            raw_response: Some(raw.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == PageStatus::Error
    }
}

/// Number of pages per status, as shown in the review summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub needs_review: usize,
    pub fail: usize,
    pub error: usize,
}

/// The aggregated, exportable judgment for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document: String,
    pub overall_status: PageStatus,
    /// One verdict per page, ascending and contiguous by `page_index`.
    pub pages: Vec<PageVerdict>,
}

impl DocumentResult {
    /// Pretty-printed JSON export.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write [`Self::to_json`] to `path`, creating parent directories.
    ///
    /// The JSON goes to a sibling `.json.tmp` file first and is renamed over
    /// `path`, so a crash never leaves a truncated result behind.
    pub async fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CheckError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let write_failed = |source: std::io::Error| CheckError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(write_failed)?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(write_failed)
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.pages
            .iter()
            .fold(StatusCounts::default(), |mut counts, page| {
                match page.status {
                    PageStatus::Pass => counts.pass += 1,
                    PageStatus::NeedsReview => counts.needs_review += 1,
                    PageStatus::Fail => counts.fail += 1,
                    PageStatus::Error => counts.error += 1,
                }
                counts
            })
    }

    /// Total number of findings of the given severity across all pages.
    pub fn count_findings(&self, severity: Severity) -> usize {
        self.pages
            .iter()
            .flat_map(|p| p.findings.iter())
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Statistics for one check run. Not part of the exported JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    pub total_pages: usize,
    /// Pages that received a verdict from the model (or the cache).
    pub judged_pages: usize,
    /// Pages with status `error`.
    pub error_pages: usize,
    /// Pages answered from the verdict cache without an API call.
    pub cached_pages: usize,
    /// Billed inference calls, retries included.
    pub api_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a check run returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutput {
    pub result: DocumentResult,
    pub stats: CheckStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_precedence_follows_declaration_order() {
        assert!(PageStatus::Fail > PageStatus::Error);
        assert!(PageStatus::Error > PageStatus::NeedsReview);
        assert!(PageStatus::NeedsReview > PageStatus::Pass);
    }

    #[test]
    fn severity_implies_status() {
        assert_eq!(Severity::Violation.implied_status(), PageStatus::Fail);
        assert_eq!(Severity::Warning.implied_status(), PageStatus::NeedsReview);
        assert_eq!(Severity::Info.implied_status(), PageStatus::Pass);
    }

    #[test]
    fn minimal_export_shape() {
        let result = DocumentResult {
            document: "ad.png".into(),
            overall_status: PageStatus::Fail,
            pages: vec![PageVerdict::new(
                0,
                PageStatus::Fail,
                vec![Finding::new(Severity::Violation, "uses a prohibited ranking phrase")],
            )],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"document":"ad.png","overall_status":"fail","pages":[{"page_index":0,"status":"fail","findings":[{"severity":"violation","description":"uses a prohibited ranking phrase"}]}]}"#
        );
    }

    #[tokio::test]
    async fn write_json_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("ad.json");
        let result = DocumentResult {
            document: "ad.png".into(),
            overall_status: PageStatus::Pass,
            pages: vec![PageVerdict::new(0, PageStatus::Pass, vec![])],
        };

        result.write_json(&path).await.unwrap();
        result.write_json(&path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, result.to_json().unwrap());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn error_verdict_is_distinct_from_fail() {
        let v = PageVerdict::failed(PageError::RenderFailed {
            page_index: 2,
            detail: "boom".into(),
        });
        assert_eq!(v.page_index, 2);
        assert_eq!(v.status, PageStatus::Error);
        assert_ne!(v.status, PageStatus::Fail);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "render_failed");
    }

    #[test]
    fn unparseable_verdict_has_one_synthetic_finding() {
        let v = PageVerdict::unparseable(0, "I like this banner.");
        assert_eq!(v.status, PageStatus::NeedsReview);
        assert_eq!(v.findings.len(), 1);
        assert_eq!(v.findings[0].description, UNPARSEABLE_FINDING);
        assert_eq!(v.raw_response.as_deref(), Some("I like this banner."));
    }

    #[test]
    fn status_counts_and_finding_counts() {
        let result = DocumentResult {
            document: "deck.pdf".into(),
            overall_status: PageStatus::Fail,
            pages: vec![
                PageVerdict::new(0, PageStatus::Pass, vec![]),
                PageVerdict::new(
                    1,
                    PageStatus::Fail,
                    vec![
                        Finding::new(Severity::Violation, "a"),
                        Finding::new(Severity::Warning, "b"),
                    ],
                ),
                PageVerdict::failed(PageError::EncodingFailure {
                    page_index: 2,
                    detail: "x".into(),
                }),
            ],
        };
        let counts = result.status_counts();
        assert_eq!(counts.pass, 1);
        assert_eq!(counts.fail, 1);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.needs_review, 0);
        assert_eq!(result.count_findings(Severity::Violation), 1);
        assert_eq!(result.count_findings(Severity::Warning), 1);
    }
}
