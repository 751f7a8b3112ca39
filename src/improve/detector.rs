//! # Stage: Error Detector
//!
//! ## Responsibility
//! Scans generated artifacts for errors. Three detection methods:
//!
//! 1. **Pattern rules** — substring patterns over rendered report text
//!    (failure markers, non-finite values leaking into output).
//!
//! 2. **Bounds rules** — numeric sanity ranges over named report metrics;
//!    NaN or out-of-range values are data-quality errors.
//!
//! 3. **Drift** — a rolling z-score over the validation scores of past
//!    improvement cycles, flagging sustained quality degradation even when
//!    each individual score looks acceptable.
//!
//! ## Guarantees
//! - Bounded: the error history ring has fixed capacity
//! - Non-panicking: statistics are guarded against empty/degenerate input
//! - Immutable events: a [`DetectedError`] is never mutated after creation
//!
//! ## NOT Responsible For
//! - Choosing a remediation strategy (learning engine)
//! - Running or validating fixes (regression suite, cycle)

use std::collections::{HashMap, VecDeque};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

// ---------------------------------------------------------------------------
// ErrorKind + ErrorSeverity
// ---------------------------------------------------------------------------

/// Classification of a detected error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A metric computation failed (zero denominator, no convergence).
    Calculation,
    /// An input failed validation before computation.
    Validation,
    /// An artifact is internally contradictory.
    Logic,
    /// Quality of results is degrading over time.
    Performance,
    /// A value is present but implausible (NaN, out of sane range).
    DataQuality,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Calculation => write!(f, "calculation"),
            ErrorKind::Validation  => write!(f, "validation"),
            ErrorKind::Logic       => write!(f, "logic"),
            ErrorKind::Performance => write!(f, "performance"),
            ErrorKind::DataQuality => write!(f, "data_quality"),
        }
    }
}

/// How bad a detected error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low      => write!(f, "low"),
            ErrorSeverity::Medium   => write!(f, "medium"),
            ErrorSeverity::High     => write!(f, "high"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// DetectedError — immutable once created
// ---------------------------------------------------------------------------

/// One detected error event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub error_id: Uuid,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    /// Free-form context: metric name, observed value, artifact section.
    pub context: HashMap<String, String>,
    pub detected_at_ms: u64,
    pub suggested_fix: Option<String>,
}

impl DetectedError {
    fn new(kind: ErrorKind, severity: ErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            error_id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            context: HashMap::new(),
            detected_at_ms: now_ms(),
            suggested_fix: None,
        }
    }

    fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// PatternRule — substring scanning over artifact text
// ---------------------------------------------------------------------------

/// A substring pattern that marks an artifact line as erroneous.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Substring searched for, case-sensitive.
    pub needle: &'static str,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub fix_hint: Option<&'static str>,
}

/// Built-in rule table: the markers the analytics layer writes into report
/// artifacts when something went wrong, plus float-formatting leak checks.
static DEFAULT_PATTERN_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule {
            needle: "division by zero",
            kind: ErrorKind::Calculation,
            severity: ErrorSeverity::High,
            fix_hint: Some("verify statement inputs for zero denominators"),
        },
        PatternRule {
            needle: "no convergence",
            kind: ErrorKind::Calculation,
            severity: ErrorSeverity::Medium,
            fix_hint: Some("widen solver bracket or review cash-flow signs"),
        },
        PatternRule {
            needle: "insufficient data",
            kind: ErrorKind::Validation,
            severity: ErrorSeverity::Medium,
            fix_hint: Some("supply a complete schedule before reassessing"),
        },
        PatternRule {
            needle: "invalid input",
            kind: ErrorKind::Validation,
            severity: ErrorSeverity::High,
            fix_hint: None,
        },
        PatternRule {
            needle: "NaN",
            kind: ErrorKind::DataQuality,
            severity: ErrorSeverity::Critical,
            fix_hint: Some("a non-finite value leaked into a rendered artifact"),
        },
        PatternRule {
            // Colon-prefixed so "information"/"insufficient" don't match.
            needle: ": inf",
            kind: ErrorKind::DataQuality,
            severity: ErrorSeverity::Critical,
            fix_hint: None,
        },
        PatternRule {
            needle: "inconsistent",
            kind: ErrorKind::Logic,
            severity: ErrorSeverity::Medium,
            fix_hint: Some("re-elicit pairwise judgments"),
        },
    ]
});

// ---------------------------------------------------------------------------
// MetricBoundsRule — numeric sanity ranges
// ---------------------------------------------------------------------------

/// A sanity range for one named metric. Values outside `[min, max]` (or
/// non-finite) are flagged.
#[derive(Debug, Clone)]
pub struct MetricBoundsRule {
    pub metric: &'static str,
    pub min: f64,
    pub max: f64,
    pub severity: ErrorSeverity,
}

impl MetricBoundsRule {
    fn check(&self, value: f64) -> Option<DetectedError> {
        if !value.is_finite() {
            return Some(
                DetectedError::new(
                    ErrorKind::DataQuality,
                    ErrorSeverity::Critical,
                    format!("{}: non-finite value", self.metric),
                )
                .with_context("metric", self.metric)
                .with_context("observed", value.to_string()),
            );
        }
        if value < self.min || value > self.max {
            return Some(
                DetectedError::new(
                    ErrorKind::DataQuality,
                    self.severity,
                    format!(
                        "{}: {:.4} outside sane range [{}, {}]",
                        self.metric, value, self.min, self.max
                    ),
                )
                .with_context("metric", self.metric)
                .with_context("observed", value.to_string()),
            );
        }
        None
    }
}

/// Default bounds for the ratio battery. Ranges are generous — they catch
/// sign errors and unit mix-ups, not unusual-but-real businesses.
static DEFAULT_BOUNDS_RULES: Lazy<Vec<MetricBoundsRule>> = Lazy::new(|| {
    vec![
        MetricBoundsRule { metric: "current_ratio", min: 0.0, max: 100.0, severity: ErrorSeverity::Medium },
        MetricBoundsRule { metric: "quick_ratio", min: -10.0, max: 100.0, severity: ErrorSeverity::Medium },
        MetricBoundsRule { metric: "gross_margin", min: -5.0, max: 1.0, severity: ErrorSeverity::High },
        MetricBoundsRule { metric: "operating_margin", min: -5.0, max: 1.0, severity: ErrorSeverity::High },
        MetricBoundsRule { metric: "net_profit_margin", min: -5.0, max: 1.0, severity: ErrorSeverity::High },
        MetricBoundsRule { metric: "debt_ratio", min: 0.0, max: 10.0, severity: ErrorSeverity::Medium },
        MetricBoundsRule { metric: "oee", min: 0.0, max: 1.0, severity: ErrorSeverity::High },
    ]
});

// ---------------------------------------------------------------------------
// DriftDetector — rolling z-score over cycle validation scores
// ---------------------------------------------------------------------------

/// Flags sustained quality drift: keeps the last `window` validation scores
/// and scores each new observation against the history before it.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    window: usize,
    warn_threshold: f64,
    samples: Vec<f64>,
}

impl DriftDetector {
    pub fn new(window: usize, warn_threshold: f64) -> Self {
        Self { window: window.max(2), warn_threshold, samples: Vec::new() }
    }

    /// Feed a new validation score. Returns a Performance error when the
    /// score sits more than `warn_threshold` standard deviations *below*
    /// the rolling mean (quality drift is one-sided: higher is better).
    pub fn observe(&mut self, score: f64) -> Option<DetectedError> {
        if self.samples.len() >= self.window {
            self.samples.remove(0);
        }
        self.samples.push(score);

        if self.samples.len() < self.window {
            return None;
        }

        // Score the newest value against the history excluding it.
        let history = &self.samples[..self.samples.len() - 1];
        let n = history.len() as f64;
        if n < 2.0 {
            return None;
        }
        let mean: f64 = history.iter().sum::<f64>() / n;
        let variance: f64 =
            history.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();
        if std_dev < 1e-10 {
            return None; // constant history — no reference variance
        }

        let z = (score - mean) / std_dev;
        if z >= -self.warn_threshold {
            return None;
        }

        Some(
            DetectedError::new(
                ErrorKind::Performance,
                if z < -2.0 * self.warn_threshold {
                    ErrorSeverity::Critical
                } else {
                    ErrorSeverity::High
                },
                format!(
                    "validation score {:.3} is {:.1}σ below rolling mean {:.3}",
                    score, -z, mean
                ),
            )
            .with_context("observed", score.to_string())
            .with_context("mean", format!("{mean:.4}")),
        )
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ---------------------------------------------------------------------------
// DetectorConfig + ErrorDetector
// ---------------------------------------------------------------------------

/// Configuration for the full detection pipeline.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Maximum errors retained in history (oldest evicted).
    pub history_cap: usize,
    /// Drift window (number of cycle scores).
    pub drift_window: usize,
    /// Drift z-score threshold.
    pub drift_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_cap: 500,
            drift_window: 10,
            drift_threshold: 2.0,
        }
    }
}

/// The full error-detection pipeline.
pub struct ErrorDetector {
    pattern_rules: Vec<PatternRule>,
    bounds_rules: Vec<MetricBoundsRule>,
    drift: DriftDetector,
    history: VecDeque<DetectedError>,
    history_cap: usize,
}

impl ErrorDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            pattern_rules: DEFAULT_PATTERN_RULES.clone(),
            bounds_rules: DEFAULT_BOUNDS_RULES.clone(),
            drift: DriftDetector::new(cfg.drift_window, cfg.drift_threshold),
            history: VecDeque::with_capacity(cfg.history_cap.min(256)),
            history_cap: cfg.history_cap.max(1),
        }
    }

    /// Add a custom pattern rule ahead of the defaults.
    pub fn add_pattern_rule(&mut self, rule: PatternRule) {
        self.pattern_rules.insert(0, rule);
    }

    /// Scan rendered artifact text line by line against the pattern table.
    pub fn scan_artifact(&mut self, artifact: &str) -> Vec<DetectedError> {
        let mut found = Vec::new();
        for (line_no, line) in artifact.lines().enumerate() {
            for rule in &self.pattern_rules {
                if line.contains(rule.needle) {
                    let mut err = DetectedError::new(
                        rule.kind,
                        rule.severity,
                        format!("artifact line {}: matched '{}'", line_no + 1, rule.needle),
                    )
                    .with_context("line", line.trim().to_string());
                    if let Some(hint) = rule.fix_hint {
                        err = err.with_fix(hint);
                    }
                    found.push(err);
                    break; // first matching rule wins per line
                }
            }
        }
        self.remember(&found);
        found
    }

    /// Scan named metric values against the bounds table.
    pub fn scan_metrics(&mut self, metrics: &[(&str, f64)]) -> Vec<DetectedError> {
        let mut found = Vec::new();
        for (name, value) in metrics {
            for rule in &self.bounds_rules {
                if rule.metric == *name {
                    if let Some(err) = rule.check(*value) {
                        found.push(err);
                    }
                }
            }
        }
        self.remember(&found);
        found
    }

    /// Feed one cycle validation score into the drift detector.
    pub fn observe_cycle_score(&mut self, score: f64) -> Option<DetectedError> {
        let maybe = self.drift.observe(score);
        if let Some(ref err) = maybe {
            self.remember(std::slice::from_ref(err));
        }
        maybe
    }

    fn remember(&mut self, errors: &[DetectedError]) {
        for err in errors {
            while self.history.len() >= self.history_cap {
                self.history.pop_front();
            }
            self.history.push_back(err.clone());
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &DetectedError> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Count of history errors at or above `severity`.
    pub fn count_at_least(&self, severity: ErrorSeverity) -> usize {
        self.history.iter().filter(|e| e.severity >= severity).count()
    }

    /// The most common kind in history, with its count. `None` when empty.
    pub fn dominant_kind(&self) -> Option<(ErrorKind, usize)> {
        let mut counts: HashMap<ErrorKind, usize> = HashMap::new();
        for e in &self.history {
            *counts.entry(e.kind).or_insert(0) += 1;
        }
        counts.into_iter().max_by_key(|(_, n)| *n)
    }

    /// Drop all recorded history (used after a deploy consumes the errors).
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_detector() -> ErrorDetector {
        ErrorDetector::new(DetectorConfig::default())
    }

    // ===== Severity / kind =====

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::DataQuality.to_string(), "data_quality");
        assert_eq!(ErrorSeverity::Critical.to_string(), "critical");
    }

    // ===== Pattern scanning =====

    #[test]
    fn test_scan_clean_artifact_finds_nothing() {
        let mut d = make_detector();
        let found = d.scan_artifact("current_ratio: 2.67\nnet_profit_margin: 0.105\n");
        assert!(found.is_empty());
        assert_eq!(d.history_len(), 0);
    }

    #[test]
    fn test_scan_detects_division_by_zero_marker() {
        let mut d = make_detector();
        let found = d.scan_artifact("return_on_equity: division by zero (shareholders_equity is 0)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ErrorKind::Calculation);
        assert_eq!(found[0].severity, ErrorSeverity::High);
        assert!(found[0].suggested_fix.is_some());
    }

    #[test]
    fn test_scan_nan_leak_is_critical() {
        let mut d = make_detector();
        let found = d.scan_artifact("oee: NaN");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, ErrorSeverity::Critical);
        assert_eq!(found[0].kind, ErrorKind::DataQuality);
    }

    #[test]
    fn test_scan_one_error_per_line() {
        let mut d = make_detector();
        // Line matches both "division by zero" and "NaN" — first rule wins.
        let found = d.scan_artifact("x: division by zero NaN");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scan_multiple_lines() {
        let mut d = make_detector();
        let found = d.scan_artifact("a: division by zero\nb: fine\nc: no convergence after 50");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_custom_rule_takes_precedence() {
        let mut d = make_detector();
        d.add_pattern_rule(PatternRule {
            needle: "division",
            kind: ErrorKind::Logic,
            severity: ErrorSeverity::Low,
            fix_hint: None,
        });
        let found = d.scan_artifact("x: division by zero");
        assert_eq!(found[0].kind, ErrorKind::Logic);
    }

    // ===== Bounds scanning =====

    #[test]
    fn test_bounds_in_range_passes() {
        let mut d = make_detector();
        assert!(d.scan_metrics(&[("current_ratio", 2.5)]).is_empty());
    }

    #[test]
    fn test_bounds_out_of_range_flagged() {
        let mut d = make_detector();
        let found = d.scan_metrics(&[("net_profit_margin", 3.0)]); // 300% margin
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ErrorKind::DataQuality);
    }

    #[test]
    fn test_bounds_nan_is_critical() {
        let mut d = make_detector();
        let found = d.scan_metrics(&[("oee", f64::NAN)]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_bounds_unknown_metric_ignored() {
        let mut d = make_detector();
        assert!(d.scan_metrics(&[("made_up_metric", 1e9)]).is_empty());
    }

    // ===== Drift =====

    #[test]
    fn test_drift_needs_full_window() {
        let mut d = DriftDetector::new(5, 2.0);
        for _ in 0..4 {
            assert!(d.observe(0.9).is_none());
        }
    }

    #[test]
    fn test_drift_constant_history_no_signal() {
        let mut d = DriftDetector::new(5, 2.0);
        for _ in 0..20 {
            assert!(d.observe(0.9).is_none());
        }
    }

    #[test]
    fn test_drift_detects_score_collapse() {
        let mut d = DriftDetector::new(5, 2.0);
        // Varied-but-healthy history, then a collapse.
        for i in 0..10 {
            d.observe(if i % 2 == 0 { 0.88 } else { 0.92 });
        }
        let err = d.observe(0.10);
        assert!(err.is_some(), "collapse should trigger drift detection");
        assert_eq!(err.unwrap().kind, ErrorKind::Performance);
    }

    #[test]
    fn test_drift_is_one_sided() {
        let mut d = DriftDetector::new(5, 2.0);
        for i in 0..10 {
            d.observe(if i % 2 == 0 { 0.48 } else { 0.52 });
        }
        // A big *improvement* must not be flagged.
        assert!(d.observe(0.99).is_none());
    }

    // ===== History =====

    #[test]
    fn test_history_bounded() {
        let mut d = ErrorDetector::new(DetectorConfig { history_cap: 3, ..DetectorConfig::default() });
        for _ in 0..10 {
            d.scan_artifact("x: division by zero");
        }
        assert_eq!(d.history_len(), 3);
    }

    #[test]
    fn test_count_at_least_filters_by_severity() {
        let mut d = make_detector();
        d.scan_artifact("a: division by zero"); // High
        d.scan_artifact("b: no convergence after 9"); // Medium
        assert_eq!(d.count_at_least(ErrorSeverity::High), 1);
        assert_eq!(d.count_at_least(ErrorSeverity::Medium), 2);
    }

    #[test]
    fn test_dominant_kind() {
        let mut d = make_detector();
        d.scan_artifact("a: division by zero");
        d.scan_artifact("b: division by zero");
        d.scan_artifact("c: insufficient data (needed 1, got 0)");
        let (kind, count) = d.dominant_kind().unwrap();
        assert_eq!(kind, ErrorKind::Calculation);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_clear_history() {
        let mut d = make_detector();
        d.scan_artifact("a: division by zero");
        d.clear_history();
        assert_eq!(d.history_len(), 0);
        assert!(d.dominant_kind().is_none());
    }
}
