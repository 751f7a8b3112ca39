//! # Stage: Feedback Collector
//!
//! ## Responsibility
//! Bounded store of typed feedback about the analytics layer's output:
//! error reports, performance notes, user suggestions, and validation
//! outcomes from completed improvement cycles. The cycle orchestrator reads
//! the aggregate feedback score as one input to its validation scoring.
//!
//! ## Guarantees
//! - Bounded: at most `max_entries` records (oldest evicted first)
//! - Non-panicking: aggregates over an empty store return `None`
//! - Thread-safe usage: designed to be wrapped in `Arc<Mutex<..>>` by callers

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

// ---------------------------------------------------------------------------
// FeedbackKind + FeedbackEntry
// ---------------------------------------------------------------------------

/// What sort of feedback a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackKind {
    /// A detected error was surfaced to a reviewer.
    ErrorReport,
    /// An observation about result quality or latency.
    PerformanceNote,
    /// A human asked for different behavior.
    UserSuggestion,
    /// The outcome of a completed improvement cycle.
    ValidationOutcome,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackKind::ErrorReport       => write!(f, "error_report"),
            FeedbackKind::PerformanceNote   => write!(f, "performance_note"),
            FeedbackKind::UserSuggestion    => write!(f, "user_suggestion"),
            FeedbackKind::ValidationOutcome => write!(f, "validation_outcome"),
        }
    }
}

/// One feedback record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub kind: FeedbackKind,
    /// Sentiment in [-1, 1]: -1 strongly negative, +1 strongly positive.
    pub score: f64,
    pub note: String,
    pub tags: Vec<String>,
    pub recorded_at_ms: u64,
}

impl FeedbackEntry {
    pub fn new(kind: FeedbackKind, score: f64, note: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            score: score.clamp(-1.0, 1.0),
            note: note.into(),
            tags: Vec::new(),
            recorded_at_ms: now_ms(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// ---------------------------------------------------------------------------
// FeedbackCollector
// ---------------------------------------------------------------------------

/// Configuration for the collector.
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    /// Maximum entries retained.
    pub max_entries: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { max_entries: 1_000 }
    }
}

/// The bounded feedback store.
pub struct FeedbackCollector {
    entries: VecDeque<FeedbackEntry>,
    max_entries: usize,
}

impl FeedbackCollector {
    pub fn new(cfg: FeedbackConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(cfg.max_entries.min(256)),
            max_entries: cfg.max_entries.max(1),
        }
    }

    /// Record an entry, evicting the oldest when full.
    pub fn record(&mut self, entry: FeedbackEntry) {
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FeedbackEntry> {
        self.entries.iter()
    }

    pub fn by_kind(&self, kind: FeedbackKind) -> impl Iterator<Item = &FeedbackEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Mean score across all entries, `None` when empty.
    pub fn mean_score(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.iter().map(|e| e.score).sum::<f64>() / self.entries.len() as f64)
    }

    /// Mean score for one kind, `None` when that kind has no entries.
    pub fn mean_score_for(&self, kind: FeedbackKind) -> Option<f64> {
        let scores: Vec<f64> = self.by_kind(kind).map(|e| e.score).collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// Mean score mapped into [0, 1] for validation weighting; 0.5 when the
    /// store is empty (no feedback is treated as neutral, not as failure).
    pub fn normalized_score(&self) -> f64 {
        match self.mean_score() {
            Some(s) => (s + 1.0) / 2.0,
            None => 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> FeedbackCollector {
        FeedbackCollector::new(FeedbackConfig::default())
    }

    #[test]
    fn test_empty_store_aggregates_none() {
        let c = collector();
        assert!(c.is_empty());
        assert_eq!(c.mean_score(), None);
        assert_eq!(c.mean_score_for(FeedbackKind::ErrorReport), None);
    }

    #[test]
    fn test_record_and_count() {
        let mut c = collector();
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, -0.5, "broke"));
        c.record(FeedbackEntry::new(FeedbackKind::UserSuggestion, 0.2, "idea"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.by_kind(FeedbackKind::ErrorReport).count(), 1);
    }

    #[test]
    fn test_score_clamped_to_unit_interval() {
        let e = FeedbackEntry::new(FeedbackKind::PerformanceNote, 9.0, "too good");
        assert_eq!(e.score, 1.0);
        let e = FeedbackEntry::new(FeedbackKind::PerformanceNote, -9.0, "too bad");
        assert_eq!(e.score, -1.0);
    }

    #[test]
    fn test_mean_score() {
        let mut c = collector();
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, -1.0, "a"));
        c.record(FeedbackEntry::new(FeedbackKind::ValidationOutcome, 1.0, "b"));
        assert!((c.mean_score().unwrap() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_score_for_kind_isolated() {
        let mut c = collector();
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, -1.0, "a"));
        c.record(FeedbackEntry::new(FeedbackKind::ValidationOutcome, 0.8, "b"));
        c.record(FeedbackEntry::new(FeedbackKind::ValidationOutcome, 0.4, "c"));
        let m = c.mean_score_for(FeedbackKind::ValidationOutcome).unwrap();
        assert!((m - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut c = FeedbackCollector::new(FeedbackConfig { max_entries: 2 });
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, -1.0, "oldest"));
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, 0.0, "mid"));
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, 1.0, "newest"));
        assert_eq!(c.len(), 2);
        let notes: Vec<&str> = c.entries().map(|e| e.note.as_str()).collect();
        assert_eq!(notes, vec!["mid", "newest"]);
    }

    #[test]
    fn test_normalized_score_neutral_when_empty() {
        assert!((collector().normalized_score() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_score_maps_to_unit_interval() {
        let mut c = collector();
        c.record(FeedbackEntry::new(FeedbackKind::ValidationOutcome, 1.0, "great"));
        assert!((c.normalized_score() - 1.0).abs() < 1e-12);
        let mut c = collector();
        c.record(FeedbackEntry::new(FeedbackKind::ErrorReport, -1.0, "bad"));
        assert!(c.normalized_score().abs() < 1e-12);
    }

    #[test]
    fn test_tags_attached() {
        let e = FeedbackEntry::new(FeedbackKind::UserSuggestion, 0.1, "x")
            .with_tag("ratios")
            .with_tag("ux");
        assert_eq!(e.tags, vec!["ratios".to_string(), "ux".to_string()]);
    }
}
