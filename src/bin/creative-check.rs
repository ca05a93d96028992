//! CLI binary for creative-check.
//!
//! A thin shim over the library crate that resolves the API key, maps CLI
//! flags to `CheckConfig` and prints the exported result.

use anyhow::{Context, Result};
use clap::Parser;
use creative_check::credentials::CredentialChain;
use creative_check::{
    check, CheckConfig, CheckError, CheckOutput, CheckProgressCallback, DocumentResult,
    InputDocument, PageStatus, ProgressCallback, Severity, StatusCounts, VerdictCache,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn status_badge(status: PageStatus) -> String {
    match status {
        PageStatus::Pass => green("✓ pass"),
        PageStatus::NeedsReview => yellow("? needs_review"),
        PageStatus::Fail => red("✗ fail"),
        PageStatus::Error => red("! error"),
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// page. Pages complete out of order when judged concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_check_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Checking");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&page_index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl CheckProgressCallback for CliProgressCallback {
    fn on_check_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Checking {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(page_index, Instant::now());
        self.bar.set_message(format!("page {}", page_index + 1));
    }

    fn on_page_complete(&self, page_index: usize, total: usize, status: PageStatus) {
        let secs = self.elapsed_secs(page_index);
        self.bar.println(format!(
            "  Page {:>3}/{:<3}  {:<24}  {}",
            page_index + 1,
            total,
            status_badge(status),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['\u{2026}']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  Page {:>3}/{:<3}  {}  {}",
            page_index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_check_complete(&self, total_pages: usize, judged_pages: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors == 0 {
            eprintln!("{} {} page(s) judged", green("✔"), bold(&judged_pages.to_string()));
        } else {
            eprintln!(
                "{} {}/{} page(s) judged  ({} could not be checked)",
                cyan("⚠"),
                bold(&judged_pages.to_string()),
                total_pages,
                red(&errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check a banner, print the JSON result
  creative-check banner.png

  # Check a PDF deck and save the result
  creative-check deck.pdf -o deck.result.json

  # Check several creatives; one result file per input in results/
  creative-check banner.png flyer.pdf deck.pdf -o results/

  # Custom rule text
  creative-check --instruction rules/2025.txt flyer.jpg

  # Another provider through edgequake-llm
  creative-check --provider anthropic --model claude-sonnet-4-20250514 deck.pdf

STATUSES:
  pass           every rule clearly met
  needs_review   something a reviewer should confirm (or the answer was unreadable)
  fail           the model found a violation
  error          the page could not be checked (render, encoding or API failure)

API KEY (first match wins):
  1. --api-key / CREATIVE_CHECK_API_KEY
  2. [openai] api_key in the secrets file (--secrets, default secrets.toml)
  3. OPENAI_API_KEY
  4. interactive prompt when stdin is a terminal (disable with --no-interactive)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library is used)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Check creative assets against branding compliance rules using a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "creative-check",
    version,
    about = "Check creative assets against branding compliance rules using a vision model",
    long_about = "Render an image or PDF page by page, ask a vision model to review each page \
against the compliance instruction, and export one structured verdict per page plus an \
overall status.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Images (PNG, JPEG, GIF, WebP, BMP) or PDFs to check.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write the JSON result to this file instead of stdout. With several
    /// inputs this is a directory receiving one `<input name>.json` each.
    #[arg(short, long, env = "CREATIVE_CHECK_OUTPUT")]
    output: Option<PathBuf>,

    /// Declared MIME type, used when the content cannot be sniffed.
    #[arg(long, env = "CREATIVE_CHECK_MEDIA_TYPE")]
    media_type: Option<String>,

    /// Model ID (default: gpt-4o).
    #[arg(long, env = "CREATIVE_CHECK_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider (anthropic, gemini, ollama, azure, …) instead of
    /// the built-in OpenAI backend.
    #[arg(long, env = "CREATIVE_CHECK_PROVIDER")]
    provider: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long, env = "CREATIVE_CHECK_BASE_URL")]
    base_url: Option<String>,

    /// OpenAI API key.
    #[arg(long, env = "CREATIVE_CHECK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Secrets TOML file with an [openai] api_key entry.
    #[arg(long, env = "CREATIVE_CHECK_SECRETS", default_value = "secrets.toml")]
    secrets: PathBuf,

    /// Text file holding the compliance instruction.
    /// Default: config/prompt.txt if present, else the built-in rules.
    #[arg(long, env = "CREATIVE_CHECK_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "CREATIVE_CHECK_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Number of pages judged concurrently.
    #[arg(short, long, env = "CREATIVE_CHECK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Total attempts per page, first call included.
    #[arg(long, env = "CREATIVE_CHECK_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "CREATIVE_CHECK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per page.
    #[arg(long, env = "CREATIVE_CHECK_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// Per-call timeout in seconds.
    #[arg(long, env = "CREATIVE_CHECK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "CREATIVE_CHECK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Judge identical pages separately instead of once.
    #[arg(long, env = "CREATIVE_CHECK_NO_CACHE")]
    no_cache: bool,

    /// Never prompt for an API key.
    #[arg(long, env = "CREATIVE_CHECK_NO_INTERACTIVE")]
    no_interactive: bool,

    /// Disable progress bar.
    #[arg(long, env = "CREATIVE_CHECK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CREATIVE_CHECK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, env = "CREATIVE_CHECK_QUIET")]
    quiet: bool,
}

const DEFAULT_INSTRUCTION_PATH: &str = "config/prompt.txt";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback; library INFO logs would only
    // break its rendering.
    let show_progress = !cli.quiet && !cli.no_progress && io::stderr().is_terminal();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let several = cli.inputs.len() > 1;

    // ── Run checks ───────────────────────────────────────────────────────
    let mut results: Vec<DocumentResult> = Vec::new();
    let mut failures: Vec<anyhow::Error> = Vec::new();

    for path in &cli.inputs {
        let mut run_config = config.clone();
        let progress = show_progress.then(CliProgressCallback::new_dynamic);
        if let Some(ref cb) = progress {
            run_config.progress_callback = Some(cb.clone() as ProgressCallback);
        }

        let output = match check_one(path, cli.media_type.as_deref(), &run_config).await {
            Ok(output) => output,
            Err(err) => {
                if let Some(ref cb) = progress {
                    cb.bar.finish_and_clear();
                }
                // Every remaining file would be refused the same way.
                if matches!(
                    err.downcast_ref::<CheckError>(),
                    Some(CheckError::AuthenticationError { .. })
                ) {
                    return Err(err);
                }
                eprintln!("{} {}: {err:#}", red("✗"), path.display());
                failures.push(err);
                continue;
            }
        };

        let written_to = match cli.output {
            Some(ref out) if several => Some(out.join(format!("{}.json", output.result.document))),
            Some(ref out) => Some(out.clone()),
            None => None,
        };
        if let Some(ref target) = written_to {
            output
                .result
                .write_json(target)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }

        if !cli.quiet {
            print_summary(&output, written_to.as_deref());
        }
        results.push(output.result);
    }

    if cli.output.is_none() {
        let json = if several {
            serde_json::to_string_pretty(&results)
        } else {
            results.first().map(DocumentResult::to_json).unwrap_or_else(|| Ok(String::new()))
        }
        .context("Failed to serialise result")?;
        if !json.is_empty() {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{json}").context("Failed to write to stdout")?;
        }
    }

    if several && !cli.quiet {
        print_totals(&results, failures.len());
    }

    match failures.len() {
        0 => Ok(()),
        1 if !several => Err(failures.remove(0)),
        n => anyhow::bail!("{n} of {} file(s) could not be checked", cli.inputs.len()),
    }
}

/// Read, sniff and check one input file.
async fn check_one(path: &Path, media_type: Option<&str>, config: &CheckConfig) -> Result<CheckOutput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let input = InputDocument::new(name, bytes, media_type)?;
    Ok(check(&input, config).await?)
}

/// Map CLI args to `CheckConfig`.
async fn build_config(cli: &Cli) -> Result<CheckConfig> {
    let instruction = match cli.instruction {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instruction from {}", path.display()))?,
        ),
        None => tokio::fs::read_to_string(DEFAULT_INSTRUCTION_PATH).await.ok(),
    };

    let mut builder = CheckConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(text) = instruction {
        builder = builder.instruction(text);
    }
    if !cli.no_cache {
        builder = builder.verdict_cache(Arc::new(VerdictCache::new()));
    }

    // A named provider reads its own key; only the OpenAI backend needs ours.
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    } else {
        let chain = CredentialChain::standard(
            cli.api_key.clone(),
            cli.secrets.clone(),
            !cli.no_interactive,
        );
        let credential = chain
            .resolve()
            .context("Failed to resolve API key")?
            .context(
                "No OpenAI API key found. Pass --api-key, add [openai] api_key to the \
                 secrets file, or set OPENAI_API_KEY.",
            )?;
        builder = builder.api_key(credential.secret);
        if let Some(ref url) = cli.base_url {
            builder = builder.base_url(url.clone());
        }
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &CheckOutput, written_to: Option<&Path>) {
    let result = &output.result;
    let counts = result.status_counts();
    let stats = &output.stats;

    eprintln!(
        "{}  {}  →  {}",
        bold(&result.document),
        status_badge(result.overall_status),
        written_to
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string()),
    );
    eprintln!(
        "   pages: {} pass, {} needs_review, {} fail, {} error",
        counts.pass, counts.needs_review, counts.fail, counts.error
    );
    eprintln!(
        "   findings: {} violation(s), {} warning(s), {} info",
        result.count_findings(Severity::Violation),
        result.count_findings(Severity::Warning),
        result.count_findings(Severity::Info),
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "{} call(s), {} cached page(s), {} tokens in / {} tokens out, {}ms",
            stats.api_calls,
            stats.cached_pages,
            stats.total_input_tokens,
            stats.total_output_tokens,
            stats.total_duration_ms
        ))
    );
    for page in &result.pages {
        if let Some(ref notes) = page.notes {
            eprintln!("   {}", dim(&format!("page {}: {notes}", page.page_index + 1)));
        }
    }
}

/// One line over every file checked in this run.
fn print_totals(results: &[DocumentResult], failed_files: usize) {
    let mut totals = StatusCounts::default();
    for counts in results.iter().map(DocumentResult::status_counts) {
        totals.pass += counts.pass;
        totals.needs_review += counts.needs_review;
        totals.fail += counts.fail;
        totals.error += counts.error;
    }
    let overall = results
        .iter()
        .map(|r| r.overall_status)
        .max()
        .unwrap_or(PageStatus::Error);

    eprintln!(
        "{}  {}  {} file(s): {} pass, {} needs_review, {} fail, {} error page(s)",
        bold("total"),
        status_badge(overall),
        results.len(),
        totals.pass,
        totals.needs_review,
        totals.fail,
        totals.error,
    );
    if failed_files > 0 {
        eprintln!("   {}", red(&format!("{failed_files} file(s) could not be checked")));
    }
}
