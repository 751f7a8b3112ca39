//! # Stage: Learning Engine
//!
//! ## Responsibility
//! Turns detected errors into a concrete remediation proposal. Strategy
//! selection is a fixed mapping from the dominant error kind; the proposal
//! itself is a set of typed parameter deltas against the current
//! [`EngineTuning`] — executable changes, not prose about changes.
//!
//! Proposals are deduplicated and cooldown-limited so a burst of identical
//! errors does not flood the cycle orchestrator with identical updates.
//!
//! ## Guarantees
//! - Rate-limited: one proposal per strategy per `cooldown` window
//! - Bounded: the applied-update history has fixed capacity
//! - Non-panicking: empty error sets simply produce no proposal
//!
//! ## NOT Responsible For
//! - Validating proposals (regression suite)
//! - Applying or rolling back proposals (cycle orchestrator + snapshots)

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::detector::{DetectedError, ErrorKind, ErrorSeverity};
use super::now_ms;
use super::snapshot::EngineTuning;

// ---------------------------------------------------------------------------
// ImprovementStrategy
// ---------------------------------------------------------------------------

/// The remediation playbook. Each strategy maps to a fixed set of tuning
/// deltas computed against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImprovementStrategy {
    /// Raise the deploy bar — more scrutiny before changes land.
    TightenValidation,
    /// Loosen the regression comparison tolerance one notch.
    RelaxTolerance,
    /// Widen the drift window so scoring has more context.
    RecalibrateBounds,
    /// Lower the trigger threshold so cycles start earlier.
    ExpandPatterns,
    /// No parameter change; try the same configuration again later.
    Requeue,
}

impl ImprovementStrategy {
    /// Fixed kind → strategy table.
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Calculation => ImprovementStrategy::RelaxTolerance,
            ErrorKind::Validation  => ImprovementStrategy::TightenValidation,
            ErrorKind::Logic       => ImprovementStrategy::ExpandPatterns,
            ErrorKind::Performance => ImprovementStrategy::RecalibrateBounds,
            ErrorKind::DataQuality => ImprovementStrategy::TightenValidation,
        }
    }
}

impl std::fmt::Display for ImprovementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImprovementStrategy::TightenValidation => write!(f, "tighten_validation"),
            ImprovementStrategy::RelaxTolerance    => write!(f, "relax_tolerance"),
            ImprovementStrategy::RecalibrateBounds => write!(f, "recalibrate_bounds"),
            ImprovementStrategy::ExpandPatterns    => write!(f, "expand_patterns"),
            ImprovementStrategy::Requeue           => write!(f, "requeue"),
        }
    }
}

// ---------------------------------------------------------------------------
// ParamChange / LearningUpdate / LearningResult
// ---------------------------------------------------------------------------

/// One typed tuning delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamChange {
    pub param: String,
    pub before: f64,
    pub after: f64,
}

/// A proposed change set, ready for regression testing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningUpdate {
    pub id: Uuid,
    pub strategy: ImprovementStrategy,
    pub changes: Vec<ParamChange>,
    pub rationale: String,
    pub created_at_ms: u64,
}

impl LearningUpdate {
    /// Apply every change to a copy of `tuning`, returning the candidate.
    pub fn candidate_tuning(&self, tuning: &EngineTuning) -> EngineTuning {
        let mut candidate = tuning.clone();
        for change in &self.changes {
            candidate.apply_change(&change.param, change.after);
        }
        candidate
    }
}

/// The recorded outcome of one update after the cycle finished with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningResult {
    pub update_id: Uuid,
    pub applied: bool,
    /// Fraction of the triggering errors expected to be addressed, [0, 1].
    pub error_reduction: f64,
    pub notes: String,
}

// ---------------------------------------------------------------------------
// LearningEngine
// ---------------------------------------------------------------------------

/// Configuration for proposal generation.
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Minimum ms between proposals for the same strategy.
    pub cooldown_ms: u64,
    /// Maximum results kept in the applied-history ring.
    pub history_cap: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 60_000,
            history_cap: 200,
        }
    }
}

/// Strategy selector and proposal factory.
pub struct LearningEngine {
    config: LearningConfig,
    /// Last proposal timestamp per strategy, for cooldown gating.
    last_proposed_ms: HashMap<ImprovementStrategy, u64>,
    history: VecDeque<LearningResult>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            last_proposed_ms: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Select a strategy and build a proposal from the detected errors and
    /// the current tuning. `None` when there are no errors or the selected
    /// strategy is still cooling down.
    pub fn propose(
        &mut self,
        errors: &[DetectedError],
        tuning: &EngineTuning,
    ) -> Option<LearningUpdate> {
        self.propose_at(errors, tuning, now_ms())
    }

    /// Clock-injected variant so tests can drive the cooldown deterministically.
    pub fn propose_at(
        &mut self,
        errors: &[DetectedError],
        tuning: &EngineTuning,
        now_ms: u64,
    ) -> Option<LearningUpdate> {
        let dominant = dominant_kind(errors)?;
        let strategy = ImprovementStrategy::for_kind(dominant);

        if let Some(&last) = self.last_proposed_ms.get(&strategy) {
            if now_ms.saturating_sub(last) < self.config.cooldown_ms {
                tracing::debug!(
                    target: "improve::learning",
                    %strategy,
                    "proposal suppressed by cooldown"
                );
                return None;
            }
        }
        self.last_proposed_ms.insert(strategy, now_ms);

        let changes = strategy_changes(strategy, tuning);
        let worst = errors.iter().map(|e| e.severity).max().unwrap_or(ErrorSeverity::Low);
        Some(LearningUpdate {
            id: Uuid::new_v4(),
            strategy,
            changes,
            rationale: format!(
                "{} dominant among {} error(s), worst severity {}",
                dominant,
                errors.len(),
                worst
            ),
            created_at_ms: now_ms,
        })
    }

    /// Record the outcome of a finished update.
    pub fn record_result(&mut self, result: LearningResult) {
        while self.history.len() >= self.config.history_cap.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(result);
    }

    pub fn history(&self) -> impl Iterator<Item = &LearningResult> {
        self.history.iter()
    }

    /// Fraction of recorded results that were applied, `None` when empty.
    pub fn apply_rate(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let applied = self.history.iter().filter(|r| r.applied).count();
        Some(applied as f64 / self.history.len() as f64)
    }
}

/// The most common kind among `errors`, ties broken by worst severity.
fn dominant_kind(errors: &[DetectedError]) -> Option<ErrorKind> {
    if errors.is_empty() {
        return None;
    }
    let mut counts: HashMap<ErrorKind, (usize, ErrorSeverity)> = HashMap::new();
    for e in errors {
        let entry = counts.entry(e.kind).or_insert((0, e.severity));
        entry.0 += 1;
        entry.1 = entry.1.max(e.severity);
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(kind, _)| kind)
}

/// The fixed delta set for one strategy against the current tuning.
fn strategy_changes(strategy: ImprovementStrategy, tuning: &EngineTuning) -> Vec<ParamChange> {
    match strategy {
        ImprovementStrategy::TightenValidation => vec![ParamChange {
            param: "validation_threshold".into(),
            before: tuning.validation_threshold,
            after: (tuning.validation_threshold + 0.05).min(0.95),
        }],
        ImprovementStrategy::RelaxTolerance => vec![ParamChange {
            param: "ratio_tolerance".into(),
            before: tuning.ratio_tolerance,
            after: (tuning.ratio_tolerance * 10.0).min(0.1),
        }],
        ImprovementStrategy::RecalibrateBounds => vec![ParamChange {
            param: "drift_window".into(),
            before: tuning.drift_window as f64,
            after: (tuning.drift_window as f64 + 5.0).min(100.0),
        }],
        ImprovementStrategy::ExpandPatterns => vec![ParamChange {
            param: "min_error_threshold".into(),
            before: tuning.min_error_threshold as f64,
            after: (tuning.min_error_threshold.saturating_sub(1)).max(1) as f64,
        }],
        ImprovementStrategy::Requeue => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
