//! Pipeline integration tests against a scripted inference backend.
//!
//! No network, no pdfium: pages are either raster images (decoded by the
//! `image` crate) or pre-rasterised slots handed to `check_pages`.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use creative_check::pipeline::render::{PageImage, RasterizedPage};
use creative_check::{
    check, check_pages, check_sync, check_to_file, BackendError, CheckConfig, CheckError,
    CheckProgressCallback, InferenceBackend, InferenceRequest, InputDocument, PageError,
    PageStatus, RawResponse, Severity, VerdictCache,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const PASS: &str = r#"{"status": "pass", "findings": []}"#;
const REVIEW: &str = r#"```json
{"status": "needs_review", "findings": [{"severity": "warning", "description": "® mark is hard to read", "location": "footer"}]}
```"#;
const FAIL: &str = r#"{"status": "fail", "findings": [{"severity": "violation", "category": "required elements", "description": "survey year is missing"}]}"#;

type Outcome = Result<RawResponse, BackendError>;

fn answer(text: &str) -> Outcome {
    Ok(RawResponse {
        text: text.to_string(),
        input_tokens: 1000,
        output_tokens: 50,
    })
}

/// Per-page scripts keyed by page index. The last entry repeats; pages
/// without a script answer `PASS`.
#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<HashMap<usize, VecDeque<Outcome>>>,
    calls: Mutex<HashMap<usize, usize>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with(self: Arc<Self>, page_index: usize, script: Vec<Outcome>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(page_index, script.into());
        self
    }

    fn calls_for(&self, page_index: usize) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&page_index)
            .copied()
            .unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawResponse, BackendError> {
        let idx = request.payload.page_index;
        *self.calls.lock().unwrap().entry(idx).or_default() += 1;
        tokio::task::yield_now().await;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&idx) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap(),
            None => answer(PASS),
        }
    }
}

fn config_with(backend: Arc<ScriptedBackend>) -> CheckConfig {
    CheckConfig::builder()
        .backend(backend)
        .concurrency(3)
        .retry_backoff_ms(1)
        .max_backoff_ms(4)
        .build()
        .unwrap()
}

fn solid(shade: u8) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 9, Rgba([shade, 40, 200, 255])))
}

/// `n` distinct rendered pages.
fn slots(n: usize) -> Vec<RasterizedPage> {
    (0..n)
        .map(|i| {
            RasterizedPage::rendered(PageImage {
                page_index: i,
                image: solid(i as u8 * 10),
                dpi: Some(150),
            })
        })
        .collect()
}

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[derive(Default)]
struct RecordingCallback {
    completed: AtomicUsize,
    errored: Mutex<Vec<usize>>,
    finished: Mutex<Option<(usize, usize)>>,
}

impl CheckProgressCallback for RecordingCallback {
    fn on_page_complete(&self, _page_index: usize, _total: usize, _status: PageStatus) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, page_index: usize, _total: usize, _error: &str) {
        self.errored.lock().unwrap().push(page_index);
    }

    fn on_check_complete(&self, total_pages: usize, judged_pages: usize) {
        *self.finished.lock().unwrap() = Some((total_pages, judged_pages));
    }
}

// ── Page accounting ──────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_gets_exactly_one_verdict_in_order() {
    let backend = ScriptedBackend::new()
        .with(1, vec![answer(FAIL)])
        .with(3, vec![answer(REVIEW)]);
    let config = config_with(backend.clone());

    let output = check_pages("deck.pdf", slots(5), &config).await.unwrap();
    let result = &output.result;

    assert_eq!(result.pages.len(), 5);
    for (i, page) in result.pages.iter().enumerate() {
        assert_eq!(page.page_index, i);
    }
    assert_eq!(result.pages[1].status, PageStatus::Fail);
    assert_eq!(result.pages[3].status, PageStatus::NeedsReview);
    assert_eq!(result.overall_status, PageStatus::Fail);
    assert_eq!(backend.total_calls(), 5);
    assert_eq!(output.stats.api_calls, 5);
    assert_eq!(output.stats.total_input_tokens, 5000);
    assert_eq!(output.stats.judged_pages, 5);
}

/// Answers page `i` after `delays[i]`, logging the order pages finish in.
struct DelayedBackend {
    delays: Vec<Duration>,
    answers: HashMap<usize, &'static str>,
    finished: Mutex<Vec<usize>>,
}

#[async_trait]
impl InferenceBackend for DelayedBackend {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn infer(&self, request: InferenceRequest<'_>) -> Result<RawResponse, BackendError> {
        let idx = request.payload.page_index;
        tokio::time::sleep(self.delays[idx]).await;
        self.finished.lock().unwrap().push(idx);
        answer(self.answers.get(&idx).copied().unwrap_or(PASS))
    }
}

#[tokio::test]
async fn pages_finishing_out_of_order_are_reassembled_by_index() {
    let backend = Arc::new(DelayedBackend {
        delays: vec![
            Duration::from_millis(240),
            Duration::from_millis(120),
            Duration::ZERO,
            Duration::from_millis(60),
        ],
        answers: HashMap::from([(0, REVIEW), (2, FAIL)]),
        finished: Mutex::new(Vec::new()),
    });
    let config = CheckConfig::builder()
        .backend(backend.clone())
        .concurrency(4)
        .build()
        .unwrap();

    let mut pages = slots(4);
    pages.reverse();
    let output = check_pages("deck.pdf", pages, &config).await.unwrap();

    assert_eq!(*backend.finished.lock().unwrap(), vec![2, 3, 1, 0]);
    let indices: Vec<usize> = output.result.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    let statuses: Vec<PageStatus> = output.result.pages.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![
            PageStatus::NeedsReview,
            PageStatus::Pass,
            PageStatus::Fail,
            PageStatus::Pass
        ]
    );
    assert_eq!(output.result.overall_status, PageStatus::Fail);
}

#[tokio::test]
async fn identical_runs_export_identical_json() {
    let run = || async {
        let backend = ScriptedBackend::new()
            .with(0, vec![answer(REVIEW)])
            .with(2, vec![answer(FAIL)]);
        check_pages("deck.pdf", slots(4), &config_with(backend))
            .await
            .unwrap()
            .result
            .to_json()
            .unwrap()
    };
    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
    assert!(first.contains("\"overall_status\": \"fail\""));
    assert!(!first.contains("total_input_tokens"), "stats must stay out of the export");
}

// ── Partial failure ──────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_on_middle_page_keeps_the_rest() {
    let mut pages = slots(3);
    pages[1] = RasterizedPage::failed(1, "corrupt content stream");

    let backend = ScriptedBackend::new();
    let progress = Arc::new(RecordingCallback::default());
    let config = CheckConfig::builder()
        .backend(backend.clone())
        .progress_callback(progress.clone())
        .build()
        .unwrap();

    let output = check_pages("deck.pdf", pages, &config).await.unwrap();
    let result = &output.result;

    assert_eq!(result.pages.len(), 3);
    assert_eq!(result.pages[0].status, PageStatus::Pass);
    assert_eq!(result.pages[1].status, PageStatus::Error);
    assert_eq!(result.pages[2].status, PageStatus::Pass);
    assert!(matches!(
        result.pages[1].error,
        Some(PageError::RenderFailed { page_index: 1, .. })
    ));
    assert_eq!(result.overall_status, PageStatus::Error);

    assert_eq!(backend.calls_for(1), 0, "a page that failed to render is never sent");
    assert_eq!(output.stats.error_pages, 1);
    assert_eq!(output.stats.judged_pages, 2);

    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(*progress.errored.lock().unwrap(), vec![1]);
    assert_eq!(*progress.finished.lock().unwrap(), Some((3, 2)));
}

#[tokio::test]
async fn rejected_page_becomes_error_verdict() {
    let backend = ScriptedBackend::new().with(
        2,
        vec![Err(BackendError::Rejected("HTTP 400: image too large".into()))],
    );
    let output = check_pages("deck.pdf", slots(3), &config_with(backend.clone()))
        .await
        .unwrap();
    assert_eq!(output.result.pages[2].status, PageStatus::Error);
    assert_eq!(backend.calls_for(2), 1);
    let json = output.result.to_json().unwrap();
    assert!(json.contains("\"kind\": \"inference_error\""));
}

// ── Retry behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_rate_limits_stop_at_max_attempts() {
    let backend = ScriptedBackend::new().with(
        0,
        vec![Err(BackendError::RateLimited {
            retry_after: Some(std::time::Duration::from_millis(1)),
        })],
    );
    let config = CheckConfig::builder()
        .backend(backend.clone())
        .max_attempts(3)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let output = check_pages("banner.png", slots(1), &config).await.unwrap();
    let page = &output.result.pages[0];

    assert_eq!(backend.calls_for(0), 3);
    assert_eq!(page.status, PageStatus::Error);
    assert!(matches!(
        page.error,
        Some(PageError::InferenceError { attempts: 3, .. })
    ));
    assert_eq!(output.stats.api_calls, 3);
}

#[tokio::test]
async fn transient_errors_then_success() {
    let backend = ScriptedBackend::new().with(
        0,
        vec![
            Err(BackendError::RateLimited { retry_after: None }),
            Err(BackendError::Transient("HTTP 503".into())),
            answer(FAIL),
        ],
    );
    let output = check_pages("banner.png", slots(1), &config_with(backend.clone()))
        .await
        .unwrap();
    assert_eq!(backend.calls_for(0), 3);
    assert_eq!(output.result.pages[0].status, PageStatus::Fail);
    assert_eq!(output.stats.api_calls, 3);
}

#[tokio::test]
async fn authentication_failure_aborts_the_run() {
    let backend = ScriptedBackend::new().with(
        1,
        vec![Err(BackendError::Authentication("HTTP 401: invalid api key".into()))],
    );
    let err = check_pages("deck.pdf", slots(3), &config_with(backend.clone()))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CheckError::AuthenticationError { ref backend, .. } if backend == "scripted"),
        "got: {err}"
    );
    assert_eq!(backend.calls_for(1), 1, "authentication failures are not retried");
}

// ── Verdict parsing through the pipeline ─────────────────────────────────────

#[tokio::test]
async fn unparseable_answer_needs_review() {
    let backend =
        ScriptedBackend::new().with(0, vec![answer("Looks like a nice banner to me!")]);
    let output = check_pages("banner.png", slots(1), &config_with(backend))
        .await
        .unwrap();
    let page = &output.result.pages[0];
    assert_eq!(page.status, PageStatus::NeedsReview);
    assert_eq!(page.findings.len(), 1);
    assert_eq!(page.findings[0].description, "unparseable model response");
    assert_eq!(page.raw_response.as_deref(), Some("Looks like a nice banner to me!"));
}

#[tokio::test]
async fn declared_pass_with_violation_is_fail() {
    let backend = ScriptedBackend::new().with(
        0,
        vec![answer(
            r#"{"status": "pass", "findings": [{"severity": "violation", "description": "unqualified No.1 claim"}]}"#,
        )],
    );
    let output = check_pages("banner.png", slots(1), &config_with(backend))
        .await
        .unwrap();
    assert_eq!(output.result.pages[0].status, PageStatus::Fail);
    assert_eq!(output.result.count_findings(Severity::Violation), 1);
}

// ── Verdict cache ────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_pages_are_judged_once() {
    let mut pages = slots(3);
    pages[2] = RasterizedPage::rendered(PageImage {
        page_index: 2,
        image: solid(0),
        dpi: Some(150),
    });

    let cache = Arc::new(VerdictCache::new());
    let backend = ScriptedBackend::new().with(0, vec![answer(FAIL)]);
    let config = CheckConfig::builder()
        .backend(backend.clone())
        .verdict_cache(cache.clone())
        .build()
        .unwrap();

    let output = check_pages("deck.pdf", pages, &config).await.unwrap();
    assert_eq!(backend.total_calls(), 2);
    assert_eq!(backend.calls_for(2), 0);
    assert_eq!(output.stats.cached_pages, 1);
    assert_eq!(output.result.pages[2].page_index, 2);
    assert_eq!(output.result.pages[2].status, PageStatus::Fail);
    assert_eq!(output.result.pages[2].findings, output.result.pages[0].findings);
    assert_eq!(cache.len(), 2);

    // A second run over the same pages is answered entirely from the cache.
    let again = check_pages("deck.pdf", slots(2), &config).await.unwrap();
    assert_eq!(backend.total_calls(), 2);
    assert_eq!(again.stats.cached_pages, 2);
    assert_eq!(again.stats.api_calls, 0);
    assert_eq!(again.result.pages[0].status, PageStatus::Fail);
}

#[tokio::test]
async fn without_cache_identical_pages_are_sent_separately() {
    let pages = vec![
        RasterizedPage::rendered(PageImage {
            page_index: 0,
            image: solid(7),
            dpi: None,
        }),
        RasterizedPage::rendered(PageImage {
            page_index: 1,
            image: solid(7),
            dpi: None,
        }),
    ];
    let backend = ScriptedBackend::new();
    check_pages("deck.pdf", pages, &config_with(backend.clone()))
        .await
        .unwrap();
    assert_eq!(backend.total_calls(), 2);
}

#[tokio::test]
async fn errors_are_not_cached() {
    let cache = Arc::new(VerdictCache::new());
    let backend =
        ScriptedBackend::new().with(0, vec![Err(BackendError::Malformed("no choices".into()))]);
    let config = CheckConfig::builder()
        .backend(backend.clone())
        .verdict_cache(cache.clone())
        .build()
        .unwrap();
    let output = check_pages("banner.png", slots(1), &config).await.unwrap();
    assert_eq!(output.result.pages[0].status, PageStatus::Error);
    assert!(cache.is_empty());
}

// ── Whole-file entry points ──────────────────────────────────────────────────

#[tokio::test]
async fn image_input_is_one_page() {
    let input = InputDocument::new("banner.png", png_bytes(&solid(90)), Some("image/png")).unwrap();
    let backend = ScriptedBackend::new().with(0, vec![answer(REVIEW)]);
    let output = check(&input, &config_with(backend)).await.unwrap();

    assert_eq!(output.result.document, "banner.png");
    assert_eq!(output.result.pages.len(), 1);
    assert_eq!(output.result.overall_status, PageStatus::NeedsReview);
    assert_eq!(
        output.result.pages[0].findings[0].location.as_deref(),
        Some("footer")
    );
}

#[tokio::test]
async fn check_to_file_writes_the_export() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("flyer.png");
    std::fs::write(&input_path, png_bytes(&solid(3))).unwrap();
    let output_path = dir.path().join("results").join("flyer.json");

    let backend = ScriptedBackend::new().with(0, vec![answer(FAIL)]);
    let output = check_to_file(&input_path, &output_path, &config_with(backend))
        .await
        .unwrap();

    let written = std::fs::read_to_string(&output_path).unwrap();
    assert_eq!(written, output.result.to_json().unwrap());
    assert!(!output_path.with_extension("json.tmp").exists());

    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed["document"], "flyer.png");
    assert_eq!(parsed["overall_status"], "fail");
    assert_eq!(parsed["pages"][0]["findings"][0]["severity"], "violation");
}

#[test]
fn check_sync_runs_without_an_outer_runtime() {
    let input = InputDocument::new("a.png", png_bytes(&solid(1)), None).unwrap();
    let output = check_sync(&input, &config_with(ScriptedBackend::new())).unwrap();
    assert_eq!(output.result.overall_status, PageStatus::Pass);
}

#[test]
fn blocking_caller_with_tokio_test() {
    let input = InputDocument::new("c.png", png_bytes(&solid(2)), None).unwrap();
    let backend = ScriptedBackend::new().with(0, vec![answer(FAIL)]);
    let output = tokio_test::block_on(check(&input, &config_with(backend))).unwrap();
    assert_eq!(output.result.overall_status, PageStatus::Fail);
}

#[tokio::test]
async fn missing_backend_is_fatal() {
    let input = InputDocument::new("a.png", png_bytes(&solid(1)), None).unwrap();
    let err = check(&input, &CheckConfig::default()).await.unwrap_err();
    assert!(matches!(err, CheckError::BackendNotConfigured { .. }));
}

#[test]
fn unsupported_input_is_fatal() {
    let err = InputDocument::new("notes.txt", b"just text".to_vec(), Some("text/plain")).unwrap_err();
    assert!(matches!(err, CheckError::UnsupportedFormat { .. }));
}
