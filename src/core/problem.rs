use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a player problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Error,
}

/// A non-fatal, user-visible diagnostic attached to the player state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,

    /// Optional extra detail (underlying error text, record offset, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Problem {
    pub fn warn(message: impl Into<String>) -> Self {
        Self { severity: Severity::Warn, message: message.into(), detail: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Keyed problem store with deduplication.
///
/// Problems are keyed (per topic, per range, or source-wide) so a later
/// successful read can clear the matching entry instead of letting
/// diagnostics accumulate unboundedly. Re-adding an unchanged problem does
/// not count as a change.
#[derive(Debug, Default)]
pub struct ProblemManager {
    problems: BTreeMap<String, Problem>,
}

impl ProblemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the problem for `key`. Returns true if the set changed.
    pub fn add(&mut self, key: impl Into<String>, problem: Problem) -> bool {
        let key = key.into();
        match self.problems.get(&key) {
            Some(existing) if *existing == problem => false,
            _ => {
                self.problems.insert(key, problem);
                true
            }
        }
    }

    /// Remove the problem for `key`. Returns true if one was present.
    pub fn clear(&mut self, key: &str) -> bool {
        self.problems.remove(key).is_some()
    }

    pub fn clear_all(&mut self) {
        self.problems.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Snapshot of current problems in key order.
    pub fn problems(&self) -> Vec<Problem> {
        self.problems.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_unchanged() {
        let mut mgr = ProblemManager::new();
        assert!(mgr.add("topic:/imu", Problem::warn("decode failed")));
        assert!(!mgr.add("topic:/imu", Problem::warn("decode failed")));
        assert_eq!(mgr.problems().len(), 1);
    }

    #[test]
    fn test_replace_and_clear() {
        let mut mgr = ProblemManager::new();
        mgr.add("fetch", Problem::warn("timeout"));
        assert!(mgr.add("fetch", Problem::error("worker gone")));
        assert_eq!(mgr.problems().len(), 1);
        assert!(mgr.clear("fetch"));
        assert!(!mgr.clear("fetch"));
        assert!(mgr.is_empty());
    }
}
