//! Turn free-form model output into a [`PageVerdict`].
//!
//! Models are asked for a JSON object but answer in many shapes: fenced
//! ```json blocks, bare objects wrapped in prose, alternative key names,
//! Japanese status words, or plain bullet lists. Parsing is tolerant and
//! never fails. A response with no recognisable status becomes an
//! `unparseable` verdict (`needs_review` plus one synthetic finding) so a
//! human looks at the page.
//!
//! The final page status is the most severe of the declared status and the
//! statuses implied by the findings. A model that says "pass" while listing
//! a violation gets `fail`.

use crate::output::{DetectedElements, Finding, PageStatus, PageVerdict, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

const STATUS_KEYS: &[&str] = &["status", "overall_status", "judgment", "judgement", "verdict", "result"];
const FINDINGS_KEYS: &[&str] = &["findings", "issues", "violations", "problems"];
const SEVERITY_KEYS: &[&str] = &["severity", "level", "type"];
const DESCRIPTION_KEYS: &[&str] = &["description", "message", "detail", "issue", "text"];
const CATEGORY_KEYS: &[&str] = &["category", "rule", "check"];
const LOCATION_KEYS: &[&str] = &["location", "position", "where"];
const NOTES_KEYS: &[&str] = &["notes", "note", "remarks", "comments", "comment"];
const COMPANY_KEYS: &[&str] = &["company_name", "company", "advertiser"];
const ELEMENTS_KEYS: &[&str] = &["detected_elements", "elements"];
const YEAR_KEYS: &[&str] = &["year", "survey_year"];
const ISSUER_KEYS: &[&str] = &["issuer", "issuer_name"];
const RANKING_KEYS: &[&str] = &["ranking_name", "ranking", "category_name"];
const POSITION_KEYS: &[&str] = &["position", "rank", "place"];
const TRADEMARK_KEYS: &[&str] = &["trademark_symbol", "trademark", "registered_mark"];

/// ```json … ``` or ``` … ``` fenced blocks, JSON-tagged ones first.
static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*json[ \t]*\n(.*?)```").expect("valid regex"));
static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*[ \t]*\n(.*?)```").expect("valid regex"));

/// `Status: needs review`, `**Verdict**: fail`, `判定：問題あり`.
static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[\s#>*_-]*(?:overall[ _])?(?:status|verdict|judge?ment|result|総合判定|判定|結果)[*_\s]*[:：]\s*(.+?)\s*$",
    )
    .expect("valid regex")
});

/// `- [violation] text`, `* [warning] text`.
static BRACKET_FINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])?\s*\[([^\]\n]+)\]\s*[:：-]?\s*(.+?)\s*$")
        .expect("valid regex")
});

/// `- VIOLATION: text`, `WARNING - text`, `注意：text`.
static LABEL_FINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(?:[-*•]|\d+[.)])?\s*\**(violation|critical|warning|info|重大|注意|情報)\**\s*[:：-]\s*(.+?)\s*$",
    )
    .expect("valid regex")
});

/// Parse one model response into a verdict for `page_index`.
pub fn parse_verdict(page_index: usize, raw: &str) -> PageVerdict {
    let cleaned = clean_response(raw);
    let object = extract_json_object(&cleaned);

    let (declared, findings) = match &object {
        Some(object) => {
            let declared = object_status(object).or_else(|| text_status(&cleaned));
            (declared, object_findings(object))
        }
        None => (text_status(&cleaned), text_findings(&cleaned)),
    };

    let Some(declared) = declared else {
        debug!("Page {}: no status marker in model response", page_index + 1);
        return PageVerdict::unparseable(page_index, raw);
    };

    let status = findings
        .iter()
        .map(|f| f.severity.implied_status())
        .fold(declared, PageStatus::max);

    let mut verdict = PageVerdict::new(page_index, status, findings);
    if let Some(object) = &object {
        verdict.company_name = first_scalar(object, COMPANY_KEYS);
        verdict.detected_elements = object_elements(object);
        verdict.notes = object_notes(object);
    }
    verdict
}

/// Normalise line endings and drop invisible characters models sometimes emit.
fn clean_response(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{2060}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// First JSON object found in a ```json fence, any fence, or the outermost
/// `{ … }` span, in that order.
fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let fenced = JSON_FENCE
        .captures_iter(text)
        .chain(ANY_FENCE.captures_iter(text))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));

    let braces = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(text[start..=end].to_string()),
        _ => None,
    };

    fenced
        .chain(braces)
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

fn first_value<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| {
        object
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(k))
            .map(|(_, v)| v)
    })
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_value(object, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Like [`first_string`], but also accepts numbers (`"year": 2024`) and
/// drops the placeholders models write for "could not tell".
fn first_scalar(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let text = match first_value(object, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let placeholder = matches!(
        text.to_lowercase().as_str(),
        "" | "unknown" | "n/a" | "none" | "null" | "不明" | "なし"
    );
    (!placeholder).then_some(text)
}

fn object_notes(object: &Map<String, Value>) -> Option<String> {
    let notes = match first_value(object, NOTES_KEYS)? {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    (!notes.is_empty()).then_some(notes)
}

fn object_elements(object: &Map<String, Value>) -> Option<DetectedElements> {
    let Some(Value::Object(entry)) = first_value(object, ELEMENTS_KEYS) else {
        return None;
    };
    let trademark_symbol = match first_value(entry, TRADEMARK_KEYS) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match normalise(s).as_str() {
            "true" | "yes" | "present" | "あり" => Some(true),
            "false" | "no" | "absent" | "missing" | "なし" => Some(false),
            _ => None,
        },
        _ => None,
    };
    let elements = DetectedElements {
        year: first_scalar(entry, YEAR_KEYS),
        issuer: first_scalar(entry, ISSUER_KEYS),
        ranking_name: first_scalar(entry, RANKING_KEYS),
        position: first_scalar(entry, POSITION_KEYS),
        trademark_symbol,
    };
    (!elements.is_empty()).then_some(elements)
}

fn object_status(object: &Map<String, Value>) -> Option<PageStatus> {
    match first_value(object, STATUS_KEYS)? {
        Value::String(s) => parse_status(s),
        Value::Bool(true) => Some(PageStatus::Pass),
        Value::Bool(false) => Some(PageStatus::Fail),
        _ => None,
    }
}

fn object_findings(object: &Map<String, Value>) -> Vec<Finding> {
    let Some(Value::Array(items)) = first_value(object, FINDINGS_KEYS) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => {
                Some(Finding::new(Severity::Warning, s.trim()))
            }
            Value::Object(entry) => {
                let description = first_string(entry, DESCRIPTION_KEYS)
                    .or_else(|| first_string(entry, CATEGORY_KEYS))?;
                let severity = first_string(entry, SEVERITY_KEYS)
                    .map(|s| parse_severity(&s))
                    .unwrap_or(Severity::Warning);
                let mut finding = Finding::new(severity, description);
                finding.category = first_string(entry, CATEGORY_KEYS);
                finding.location = first_string(entry, LOCATION_KEYS);
                Some(finding)
            }
            _ => None,
        })
        .collect()
}

fn text_status(text: &str) -> Option<PageStatus> {
    STATUS_LINE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| status_from_phrase(m.as_str()))
}

fn text_findings(text: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in text.lines() {
        if let Some(c) = BRACKET_FINDING.captures(line) {
            if let Some(severity) = severity_label(&c[1]) {
                findings.push(Finding::new(severity, &c[2]));
                continue;
            }
        }
        if let Some(c) = LABEL_FINDING.captures(line) {
            if let Some(severity) = severity_label(&c[1]) {
                findings.push(Finding::new(severity, &c[2]));
            }
        }
    }
    findings
}

/// Try the whole phrase, then its first two words, then its first word.
fn status_from_phrase(phrase: &str) -> Option<PageStatus> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    parse_status(phrase)
        .or_else(|| words.get(..2).and_then(|w| parse_status(&w.join(" "))))
        .or_else(|| words.first().and_then(|w| parse_status(w)))
}

fn normalise(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| {
            matches!(c, '*' | '"' | '\'' | '`' | '.' | '。' | '!' | ',' | '、' | '[' | ']' | '(' | ')' | '「' | '」')
        })
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Map a status word (English or Japanese) to a [`PageStatus`].
pub fn parse_status(s: &str) -> Option<PageStatus> {
    match normalise(s).as_str() {
        "pass" | "passed" | "ok" | "compliant" | "approved" | "問題なし" | "合格" | "適合" => {
            Some(PageStatus::Pass)
        }
        "needs_review" | "need_review" | "needs_human_review" | "review" | "review_required"
        | "requires_review" | "uncertain" | "要確認" | "確認が必要" => Some(PageStatus::NeedsReview),
        "fail" | "failed" | "non_compliant" | "noncompliant" | "rejected" | "violation" | "ng"
        | "問題あり" | "不合格" | "不適合" => Some(PageStatus::Fail),
        _ => None,
    }
}

/// Severity words that label a finding line. Unknown labels return `None`
/// so ordinary bracketed text is not mistaken for a finding.
fn severity_label(s: &str) -> Option<Severity> {
    match normalise(s).as_str() {
        "violation" | "critical" | "error" | "fail" | "重大" | "違反" => Some(Severity::Violation),
        "warning" | "warn" | "caution" | "注意" | "要確認" => Some(Severity::Warning),
        "info" | "information" | "note" | "情報" | "参考" => Some(Severity::Info),
        _ => None,
    }
}

/// Severity of a JSON finding. Unknown values are treated as warnings.
fn parse_severity(s: &str) -> Severity {
    severity_label(s).unwrap_or_else(|| match normalise(s).as_str() {
        "high" | "severe" | "major" => Severity::Violation,
        "low" | "minor" | "suggestion" => Severity::Info,
        _ => Severity::Warning,
    })
}
