//! In-memory memo of page verdicts keyed by payload fingerprint.
//!
//! Creative decks often repeat a page (a shared end card, the same banner
//! in two slots). With a cache attached to the config, identical pages are
//! judged once per run, and a cache shared across runs answers repeat
//! uploads without another billed call.
//!
//! Only verdicts the model actually produced are stored. `error` verdicts
//! are never cached, so a later run retries them.

use crate::output::PageVerdict;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct VerdictCache {
    entries: Mutex<HashMap<String, PageVerdict>>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PageVerdict>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached verdict for `key`, re-indexed to `page_index`.
    pub fn get(&self, key: &str, page_index: usize) -> Option<PageVerdict> {
        self.entries().get(key).map(|v| PageVerdict {
            page_index,
            ..v.clone()
        })
    }

    /// Store a verdict. Returns `false` (and stores nothing) for `error` verdicts.
    pub fn insert(&self, key: impl Into<String>, verdict: &PageVerdict) -> bool {
        if verdict.is_error() {
            return false;
        }
        self.entries().insert(key.into(), verdict.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::output::{Finding, PageStatus, Severity};

    #[test]
    fn hit_is_reindexed() {
        let cache = VerdictCache::new();
        let v = PageVerdict::new(
            0,
            PageStatus::Fail,
            vec![Finding::new(Severity::Violation, "no survey year")],
        );
        assert!(cache.insert("abc", &v));
        let hit = cache.get("abc", 5).unwrap();
        assert_eq!(hit.page_index, 5);
        assert_eq!(hit.status, PageStatus::Fail);
        assert_eq!(hit.findings, v.findings);
        assert!(cache.get("zzz", 0).is_none());
    }

    #[test]
    fn error_verdicts_not_cached() {
        let cache = VerdictCache::new();
        let v = PageVerdict::failed(PageError::InferenceError {
            page_index: 0,
            attempts: 3,
            detail: "rate limited".into(),
        });
        assert!(!cache.insert("abc", &v));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = VerdictCache::new();
        cache.insert("a", &PageVerdict::new(0, PageStatus::Pass, vec![]));
        cache.insert("b", &PageVerdict::new(0, PageStatus::Pass, vec![]));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
