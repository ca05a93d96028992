//! Check entry points: one document in, one [`crate::output::DocumentResult`] out.
//!
//! ```text
//! InputDocument ─▶ rasterize ─▶ encode ─▶ judge (concurrent) ─▶ parse ─▶ aggregate
//! ```
//!
//! Every page leaves this module with exactly one verdict. Render, encode
//! and inference failures become `error` verdicts in place; only the fatal
//! conditions of [`CheckError`] return `Err`, and then with no partial
//! result.

use crate::backend::{InferenceBackend, OpenAiBackend, ProviderBackend};
use crate::config::CheckConfig;
use crate::error::CheckError;
use crate::output::{CheckOutput, CheckStats, PageVerdict};
use crate::pipeline::cache::VerdictCache;
use crate::pipeline::encode::{self, EncodedPayload};
use crate::pipeline::input::InputDocument;
use crate::pipeline::llm::{ClientError, ComplianceClient};
use crate::pipeline::render::{self, RasterizedPage};
use crate::pipeline::{aggregate, verdict};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Check a document that is already in memory.
///
/// # Returns
/// `Ok(CheckOutput)` whenever the document could be rasterised and the
/// credential was accepted, even if some pages ended up `error`.
///
/// # Errors
/// Fatal errors only:
/// - unsupported or corrupt input, zero pages, PDF password problems
/// - no backend configured, or the backend rejected the credential
pub async fn check(input: &InputDocument, config: &CheckConfig) -> Result<CheckOutput, CheckError> {
    let total_start = Instant::now();
    info!("Starting check: {} ({})", input.name(), input.media_type().mime());

    // ── Step 1: Resolve backend ──────────────────────────────────────────
    let backend = resolve_backend(config)?;

    // ── Step 2: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let pages = render::rasterize(input, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 3: Judge, parse, aggregate ──────────────────────────────────
    let mut output = judge_pages(input.name(), pages, backend, config).await?;
    output.stats.render_duration_ms = render_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Check complete: '{}' → {} ({}/{} pages judged, {}ms total)",
        input.name(),
        output.result.overall_status,
        output.stats.judged_pages,
        output.stats.total_pages,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Read a local file and check it.
pub async fn check_file(
    path: impl AsRef<Path>,
    config: &CheckConfig,
) -> Result<CheckOutput, CheckError> {
    let input = InputDocument::from_path(path).await?;
    check(&input, config).await
}

/// Check pages that were rasterised elsewhere.
///
/// `pages` must cover indices `0..pages.len()` exactly once, in any order.
/// Slots holding a [`crate::error::PageError`] become `error` verdicts.
pub async fn check_pages(
    document: &str,
    pages: Vec<RasterizedPage>,
    config: &CheckConfig,
) -> Result<CheckOutput, CheckError> {
    let total_start = Instant::now();
    let backend = resolve_backend(config)?;
    let mut output = judge_pages(document, pages, backend, config).await?;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Check a file and write the exported JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) so a crash never leaves a
/// truncated result behind.
pub async fn check_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &CheckConfig,
) -> Result<CheckOutput, CheckError> {
    let output = check_file(input_path, config).await?;
    let path = output_path.as_ref();
    output.result.write_json(path).await?;
    debug!("Wrote result to {}", path.display());
    Ok(output)
}

/// Synchronous wrapper around [`check`].
///
/// Creates a temporary tokio runtime internally.
pub fn check_sync(input: &InputDocument, config: &CheckConfig) -> Result<CheckOutput, CheckError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CheckError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(check(input, config))
}

/// Resolve the inference backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`), used as is.
/// 2. **Named provider** (`config.provider_name`), created through
///    edgequake-llm's `ProviderFactory`, which reads that provider's own
///    API key variable.
/// 3. **Resolved API key** (`config.api_key`), the OpenAI chat-completions
///    backend, optionally pointed at `config.base_url`.
///
/// Anything else is [`CheckError::BackendNotConfigured`].
pub fn resolve_backend(config: &CheckConfig) -> Result<Arc<dyn InferenceBackend>, CheckError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let model = config.model_or_default();

    if let Some(ref name) = config.provider_name {
        let backend = ProviderBackend::from_factory(name, model).map_err(|hint| {
            CheckError::BackendNotConfigured {
                backend: name.clone(),
                hint,
            }
        })?;
        info!("Using provider '{}' with model '{}'", name, model);
        return Ok(Arc::new(backend));
    }

    if let Some(ref key) = config.api_key {
        let mut backend = OpenAiBackend::new(key.clone(), model, config.api_timeout())
            .map_err(|e| CheckError::Internal(format!("HTTP client: {e}")))?;
        if let Some(ref url) = config.base_url {
            backend = backend.with_base_url(url.clone());
        }
        info!("Using OpenAI backend with model '{}'", model);
        return Ok(Arc::new(backend));
    }

    Err(CheckError::BackendNotConfigured {
        backend: "openai".to_string(),
        hint: "No API key was provided. Set OPENAI_API_KEY, add an [openai] api_key \
               entry to the secrets file, or pass --api-key."
            .to_string(),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// One inference call, possibly standing in for several identical pages.
struct Job {
    payload: EncodedPayload,
    cache_key: Option<String>,
    duplicates: Vec<usize>,
}

/// What came back for a [`Job`].
struct JobOutcome {
    job: Job,
    verdict: PageVerdict,
    attempts: u32,
    input_tokens: usize,
    output_tokens: usize,
}

/// Cache key: the payload fingerprint namespaced by everything else that
/// shapes the answer (backend, model, instruction).
fn cache_namespace(client: &ComplianceClient, config: &CheckConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client.backend_name().as_bytes());
    hasher.update([0]);
    hasher.update(config.model_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(client.instruction().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn notify(cb: Option<&ProgressCallback>, verdict: &PageVerdict, total: usize) {
    let Some(cb) = cb else { return };
    match &verdict.error {
        Some(e) => cb.on_page_error(verdict.page_index, total, &e.to_string()),
        None => cb.on_page_complete(verdict.page_index, total, verdict.status),
    }
}

/// Put page slots in index order, checking they cover `0..n` exactly once.
fn order_slots(
    document: &str,
    mut pages: Vec<RasterizedPage>,
) -> Result<Vec<RasterizedPage>, CheckError> {
    if pages.is_empty() {
        return Err(CheckError::EmptyDocument {
            document: document.to_string(),
        });
    }
    pages.sort_by_key(|p| p.page_index);
    if let Some((pos, slot)) = pages
        .iter()
        .enumerate()
        .find(|(pos, slot)| slot.page_index != *pos)
    {
        return Err(CheckError::Internal(format!(
            "page slots are not contiguous: expected index {}, found {}",
            pos, slot.page_index
        )));
    }
    Ok(pages)
}

async fn judge_pages(
    document: &str,
    pages: Vec<RasterizedPage>,
    backend: Arc<dyn InferenceBackend>,
    config: &CheckConfig,
) -> Result<CheckOutput, CheckError> {
    let pages = order_slots(document, pages)?;
    let total = pages.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_check_start(total);
    }

    let client = ComplianceClient::new(backend, config);
    let cache: Option<&Arc<VerdictCache>> = config.verdict_cache.as_ref();
    let namespace = cache.map(|_| cache_namespace(&client, config));

    let mut verdicts: Vec<Option<PageVerdict>> = vec![None; total];
    let mut stats = CheckStats {
        total_pages: total,
        ..Default::default()
    };

    // ── Encode, answer from cache, group duplicates ──────────────────────
    let mut jobs: Vec<Job> = Vec::new();
    let mut pending: HashMap<String, usize> = HashMap::new();

    for slot in pages {
        let idx = slot.page_index;
        let payload = match slot.outcome.and_then(|image| encode::encode_page(&image)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Page {}: {}", idx + 1, e);
                let verdict = PageVerdict::failed(e);
                notify(cb, &verdict, total);
                verdicts[idx] = Some(verdict);
                continue;
            }
        };

        let key = namespace
            .as_ref()
            .map(|ns| format!("{}:{}", ns, payload.fingerprint()));

        if let (Some(cache), Some(key)) = (cache, key.as_ref()) {
            if let Some(hit) = cache.get(key, idx) {
                debug!("Page {}: verdict served from cache", idx + 1);
                stats.cached_pages += 1;
                notify(cb, &hit, total);
                verdicts[idx] = Some(hit);
                continue;
            }
            if let Some(&first) = pending.get(key) {
                debug!(
                    "Page {}: identical to page {}",
                    idx + 1,
                    jobs[first].payload.page_index + 1
                );
                jobs[first].duplicates.push(idx);
                continue;
            }
            pending.insert(key.clone(), jobs.len());
        }

        jobs.push(Job {
            payload,
            cache_key: key,
            duplicates: Vec::new(),
        });
    }

    // ── Judge concurrently ───────────────────────────────────────────────
    let inference_start = Instant::now();
    let client = &client;
    let outcomes: Vec<JobOutcome> = stream::iter(jobs.into_iter().map(|job| async move {
        let idx = job.payload.page_index;
        if let Some(cb) = cb {
            cb.on_page_start(idx, total);
        }

        let outcome = match client.judge(&job.payload, document, total).await {
            Ok(response) => JobOutcome {
                verdict: verdict::parse_verdict(idx, &response.text),
                attempts: response.attempts,
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                job,
            },
            Err(err) => {
                let attempts = err.attempts();
                match err {
                    ClientError::Authentication { backend, detail, .. } => {
                        return Err(CheckError::AuthenticationError { backend, detail });
                    }
                    ClientError::Page(page_error) => JobOutcome {
                        verdict: PageVerdict::failed(page_error),
                        attempts,
                        input_tokens: 0,
                        output_tokens: 0,
                        job,
                    },
                }
            }
        };

        notify(cb, &outcome.verdict, total);
        for &dup in &outcome.job.duplicates {
            notify(cb, &reindex(&outcome.verdict, dup), total);
        }
        Ok(outcome)
    }))
    .buffer_unordered(config.concurrency.max(1))
    .try_collect()
    .await?;
    stats.inference_duration_ms = inference_start.elapsed().as_millis() as u64;

    // ── Reassemble by page index ─────────────────────────────────────────
    for outcome in outcomes {
        stats.api_calls += outcome.attempts as usize;
        stats.total_input_tokens += outcome.input_tokens as u64;
        stats.total_output_tokens += outcome.output_tokens as u64;

        if let (Some(cache), Some(key)) = (cache, outcome.job.cache_key.as_ref()) {
            cache.insert(key.clone(), &outcome.verdict);
        }
        if !outcome.verdict.is_error() {
            stats.cached_pages += outcome.job.duplicates.len();
        }
        for &dup in &outcome.job.duplicates {
            verdicts[dup] = Some(reindex(&outcome.verdict, dup));
        }
        let idx = outcome.verdict.page_index;
        verdicts[idx] = Some(outcome.verdict);
    }

    let pages = verdicts
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| CheckError::Internal(format!("page index {} has no verdict", i)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    stats.error_pages = pages.iter().filter(|p| p.is_error()).count();
    stats.judged_pages = total - stats.error_pages;

    if let Some(cb) = cb {
        cb.on_check_complete(total, stats.judged_pages);
    }

    Ok(CheckOutput {
        result: aggregate::aggregate(document, pages),
        stats,
    })
}

fn reindex(verdict: &PageVerdict, page_index: usize) -> PageVerdict {
    PageVerdict {
        page_index,
        error: verdict.error.as_ref().map(|e| e.reindexed(page_index)),
        ..verdict.clone()
    }
}
