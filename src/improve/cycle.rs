//! # Stage: Improvement Cycle Orchestrator
//!
//! The state machine that closes the self-improvement loop:
//!
//! ```text
//! Monitoring ─► Analyzing ─► Learning ─► Testing ─► Validated ─► Deployed
//!                  │            │           │           │
//!                  └────────────┴───────────┴───────────┴──────► Failed
//! ```
//!
//! ## What it does
//!
//! 1. `trigger_cycle` admits a cycle (error threshold + concurrency cap),
//!    snapshots the pre-cycle tuning, and spawns the run under a real
//!    `tokio::time::timeout`.
//! 2. The run walks the phases through [`ImprovementCycle::advance_to`] —
//!    illegal jumps are typed errors, so a cycle can only move forward or
//!    terminate at `Failed`.
//! 3. Validation scores the cycle as a weighted sum of error reduction,
//!    regression pass rate, and feedback sentiment (defaults 0.4/0.4/0.2).
//! 4. At or above the validation threshold the candidate tuning is installed
//!    and committed; below it the pre-cycle snapshot is restored.
//! 5. Completed cycles move from the active map into bounded history.
//!
//! ## Guarantees
//! - Forward-only: phases cannot be skipped or revisited
//! - Timeout-bounded: a hung cycle is failed, never leaked
//! - State-safe: the shared tuning only changes at deploy or rollback

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::detector::DetectedError;
use super::feedback::{FeedbackCollector, FeedbackEntry, FeedbackKind};
use super::learning::{LearningConfig, LearningEngine, LearningResult, LearningUpdate};
use super::now_ms;
use super::regression::{RegressionReport, RegressionSuite};
use super::snapshot::{ChangeSource, EngineTuning, SnapshotRegistry};

// ---------------------------------------------------------------------------
// CycleStatus — the six-phase state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of an improvement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Monitoring,
    Analyzing,
    Learning,
    Testing,
    Validated,
    Deployed,
    Failed,
}

impl CycleStatus {
    /// The single legal forward successor, `None` for terminal states.
    fn successor(self) -> Option<CycleStatus> {
        match self {
            CycleStatus::Monitoring => Some(CycleStatus::Analyzing),
            CycleStatus::Analyzing  => Some(CycleStatus::Learning),
            CycleStatus::Learning   => Some(CycleStatus::Testing),
            CycleStatus::Testing    => Some(CycleStatus::Validated),
            CycleStatus::Validated  => Some(CycleStatus::Deployed),
            CycleStatus::Deployed | CycleStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CycleStatus::Deployed | CycleStatus::Failed)
    }

    /// Legal transitions: the next phase in order, or `Failed` from any
    /// non-terminal state. Nothing else.
    pub fn can_advance_to(self, next: CycleStatus) -> bool {
        if next == CycleStatus::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Monitoring => write!(f, "monitoring"),
            CycleStatus::Analyzing  => write!(f, "analyzing"),
            CycleStatus::Learning   => write!(f, "learning"),
            CycleStatus::Testing    => write!(f, "testing"),
            CycleStatus::Validated  => write!(f, "validated"),
            CycleStatus::Deployed   => write!(f, "deployed"),
            CycleStatus::Failed     => write!(f, "failed"),
        }
    }
}

/// An attempted illegal status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal cycle transition {from} → {to}")]
pub struct TransitionError {
    pub from: CycleStatus,
    pub to: CycleStatus,
}

// ---------------------------------------------------------------------------
// FailureReason + ImprovementCycle
// ---------------------------------------------------------------------------

/// Why a cycle terminated at `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The configured cycle timeout elapsed.
    Timeout,
    /// The regression suite rejected the candidate tuning.
    RegressionFailed { failed: Vec<String> },
    /// The validation score did not reach the deploy threshold.
    ScoreBelowThreshold { score: f64, threshold: f64 },
    /// The learning engine produced no proposal (cooldown or no errors).
    NoStrategy,
    /// Anything else, preserved for the record.
    Internal { detail: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::RegressionFailed { failed } => {
                write!(f, "regression failed: [{}]", failed.join(", "))
            }
            FailureReason::ScoreBelowThreshold { score, threshold } => {
                write!(f, "score {score:.3} below threshold {threshold:.3}")
            }
            FailureReason::NoStrategy => write!(f, "no strategy proposed"),
            FailureReason::Internal { detail } => write!(f, "internal: {detail}"),
        }
    }
}

/// The cycle record: created at trigger, advanced in place, moved to history
/// on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementCycle {
    pub cycle_id: Uuid,
    pub started_at_ms: u64,
    pub status: CycleStatus,
    pub errors_detected: u32,
    pub improvements_made: u32,
    /// Weighted validation score, [0, 1]. Meaningful from `Validated` on.
    pub validation_score: f64,
    pub completed_at_ms: Option<u64>,
    pub failure: Option<FailureReason>,
}

impl ImprovementCycle {
    fn new(errors_detected: u32) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at_ms: now_ms(),
            status: CycleStatus::Monitoring,
            errors_detected,
            improvements_made: 0,
            validation_score: 0.0,
            completed_at_ms: None,
            failure: None,
        }
    }

    /// Move to `next`, enforcing the legal transition graph.
    pub fn advance_to(&mut self, next: CycleStatus) -> Result<(), TransitionError> {
        if !self.status.can_advance_to(next) {
            return Err(TransitionError { from: self.status, to: next });
        }
        tracing::debug!(
            target: "improve::cycle",
            cycle_id = %self.cycle_id,
            from = %self.status,
            to = %next,
            "phase transition"
        );
        self.status = next;
        if next.is_terminal() {
            self.completed_at_ms = Some(now_ms());
        }
        Ok(())
    }

    /// Terminate at `Failed` with a reason. Only legal from non-terminal states.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), TransitionError> {
        self.advance_to(CycleStatus::Failed)?;
        tracing::warn!(
            target: "improve::cycle",
            cycle_id = %self.cycle_id,
            reason = %reason,
            "cycle failed"
        );
        self.failure = Some(reason);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CycleContext + CycleError
// ---------------------------------------------------------------------------

/// What triggered a cycle: the detected errors plus any performance figures
/// the caller wants on the record.
#[derive(Debug, Clone, Default)]
pub struct CycleContext {
    pub description: String,
    pub errors: Vec<DetectedError>,
    pub performance: HashMap<String, f64>,
}

/// Why a trigger was refused. These are caller-visible admission decisions,
/// not silent drops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("{detected} error(s) detected, below trigger threshold {required}")]
    BelowThreshold { detected: u32, required: u32 },

    #[error("{active} cycle(s) active, at admission cap {cap}")]
    AtCapacity { active: u32, cap: u32 },
}

// ---------------------------------------------------------------------------
// CycleConfig + EngineStats
// ---------------------------------------------------------------------------

/// Orchestrator configuration. The validation-score weights default to the
/// canonical 0.4 / 0.4 / 0.2 split.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Completed cycles retained in history (oldest evicted).
    pub history_cap: usize,
    pub weight_error_reduction: f64,
    pub weight_regression: f64,
    pub weight_feedback: f64,
    /// Configuration forwarded to the learning engine.
    pub learning: LearningConfig,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            history_cap: 200,
            weight_error_reduction: 0.4,
            weight_regression: 0.4,
            weight_feedback: 0.2,
            learning: LearningConfig::default(),
        }
    }
}

/// Counters readable from outside the loop.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles_started: u64,
    pub cycles_deployed: u64,
    pub cycles_failed: u64,
    pub rollbacks: u64,
    pub timeouts: u64,
}

// ---------------------------------------------------------------------------
// ImprovementEngine
// ---------------------------------------------------------------------------

/// Ties detector output, learning, regression, snapshots, and feedback into
/// the runnable cycle loop.
pub struct ImprovementEngine {
    config: CycleConfig,
    tuning: Arc<Mutex<EngineTuning>>,
    snapshots: Arc<Mutex<SnapshotRegistry>>,
    learning: Arc<Mutex<LearningEngine>>,
    suite: Arc<RegressionSuite>,
    feedback: Arc<Mutex<FeedbackCollector>>,
    active: Arc<Mutex<HashMap<Uuid, ImprovementCycle>>>,
    history: Arc<Mutex<VecDeque<ImprovementCycle>>>,
    stats: Arc<Mutex<EngineStats>>,
    /// Join handles for spawned cycle runs, drained by [`Self::await_spawned`].
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Recover a usable guard even if a panicking test poisoned the lock.
fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ImprovementEngine {
    /// Build an engine around an initial tuning. The initial state is
    /// committed as snapshot 1 so there is always something to roll back to.
    pub fn new(
        config: CycleConfig,
        tuning: EngineTuning,
        suite: RegressionSuite,
        feedback: Arc<Mutex<FeedbackCollector>>,
    ) -> Self {
        let mut snapshots = SnapshotRegistry::new(256);
        snapshots.commit(&tuning, ChangeSource::Initial, Some("startup baseline".into()));
        let learning = LearningEngine::new(config.learning.clone());

        Self {
            config,
            tuning: Arc::new(Mutex::new(tuning)),
            snapshots: Arc::new(Mutex::new(snapshots)),
            learning: Arc::new(Mutex::new(learning)),
            suite: Arc::new(suite),
            feedback,
            active: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            stats: Arc::new(Mutex::new(EngineStats::default())),
            handles: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Current tuning (cloned).
    pub fn tuning(&self) -> EngineTuning {
        lock_or_recover(&self.tuning).clone()
    }

    /// Shared tuning handle for callers that track deploys live.
    pub fn tuning_handle(&self) -> Arc<Mutex<EngineTuning>> {
        Arc::clone(&self.tuning)
    }

    /// Shared snapshot registry handle.
    pub fn snapshot_handle(&self) -> Arc<Mutex<SnapshotRegistry>> {
        Arc::clone(&self.snapshots)
    }

    pub fn stats(&self) -> EngineStats {
        *lock_or_recover(&self.stats)
    }

    pub fn active_count(&self) -> usize {
        lock_or_recover(&self.active).len()
    }

    /// A completed or active cycle by id (active map first, then history).
    pub fn cycle(&self, cycle_id: Uuid) -> Option<ImprovementCycle> {
        if let Some(c) = lock_or_recover(&self.active).get(&cycle_id) {
            return Some(c.clone());
        }
        lock_or_recover(&self.history)
            .iter()
            .find(|c| c.cycle_id == cycle_id)
            .cloned()
    }

    /// Completed cycles, oldest first (cloned).
    pub fn history(&self) -> Vec<ImprovementCycle> {
        lock_or_recover(&self.history).iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admit a cycle: enforce the error threshold and the concurrency cap,
    /// snapshot the pre-cycle tuning, and register the cycle as active.
    ///
    /// # Errors
    /// [`CycleError::BelowThreshold`] or [`CycleError::AtCapacity`] — both
    /// leave no trace in the active map.
    pub fn admit(&self, ctx: &CycleContext) -> Result<ImprovementCycle, CycleError> {
        let (min_errors, cap) = {
            let t = lock_or_recover(&self.tuning);
            (t.min_error_threshold, t.max_active_cycles)
        };

        let detected = ctx.errors.len() as u32;
        if detected < min_errors {
            return Err(CycleError::BelowThreshold { detected, required: min_errors });
        }

        let mut active = lock_or_recover(&self.active);
        let current = active.len() as u32;
        if current >= cap {
            return Err(CycleError::AtCapacity { active: current, cap });
        }

        let cycle = ImprovementCycle::new(detected);
        {
            let tuning = lock_or_recover(&self.tuning).clone();
            lock_or_recover(&self.snapshots).commit(
                &tuning,
                ChangeSource::CycleBackup { cycle_id: cycle.cycle_id },
                Some(format!("pre-cycle backup: {}", ctx.description)),
            );
        }
        active.insert(cycle.cycle_id, cycle.clone());
        lock_or_recover(&self.stats).cycles_started += 1;

        tracing::info!(
            target: "improve::cycle",
            cycle_id = %cycle.cycle_id,
            errors = detected,
            "cycle admitted"
        );
        Ok(cycle)
    }

    /// Admit and run in a background task under the configured timeout.
    /// Returns the admitted cycle record immediately.
    ///
    /// Must be called within a tokio runtime; the run happens on a spawned
    /// task. Use [`Self::admit`] + [`Self::drive`] to run a cycle inline.
    pub fn trigger_cycle(self: &Arc<Self>, ctx: CycleContext) -> Result<ImprovementCycle, CycleError> {
        let cycle = self.admit(&ctx)?;
        let engine = Arc::clone(self);
        let cycle_id = cycle.cycle_id;
        let handle = tokio::spawn(async move {
            engine.drive(cycle_id, ctx).await;
        });
        lock_or_recover(&self.handles).push(handle);
        Ok(cycle)
    }

    /// Await every spawned cycle run (test and shutdown hook).
    pub async fn await_spawned(&self) {
        let handles: Vec<_> = lock_or_recover(&self.handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    // -----------------------------------------------------------------------
    // The run itself
    // -----------------------------------------------------------------------

    /// Run an admitted cycle to completion under the configured timeout and
    /// return the final record. Public so tests can drive cycles
    /// deterministically without background tasks.
    pub async fn drive(&self, cycle_id: Uuid, ctx: CycleContext) -> ImprovementCycle {
        let timeout_ms = lock_or_recover(&self.tuning).cycle_timeout_ms;
        let admitted = self.cycle(cycle_id);
        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.run_phases(cycle_id, &ctx))
                .await;

        let final_cycle = match outcome {
            Ok(cycle) => cycle,
            Err(_elapsed) => {
                // The phase future was dropped mid-flight; shared tuning is
                // only touched at deploy, so state is still the backup state.
                let mut cycle = self
                    .take_active(cycle_id)
                    .or(admitted)
                    .unwrap_or_else(|| ImprovementCycle { cycle_id, ..ImprovementCycle::new(0) });
                let _ = cycle.fail(FailureReason::Timeout);
                let mut stats = lock_or_recover(&self.stats);
                stats.timeouts += 1;
                stats.cycles_failed += 1;
                cycle
            }
        };

        self.finish(final_cycle.clone());
        final_cycle
    }

    /// The six phases. Yields between phases so the timeout can preempt.
    async fn run_phases(&self, cycle_id: Uuid, ctx: &CycleContext) -> ImprovementCycle {
        let mut cycle = match self.take_active(cycle_id) {
            Some(c) => c,
            None => ImprovementCycle { cycle_id, ..ImprovementCycle::new(ctx.errors.len() as u32) },
        };

        // Phase: Analyzing — classify what triggered us.
        if cycle.advance_to(CycleStatus::Analyzing).is_err() {
            return cycle;
        }
        let worst_kind_count = dominant_kind_count(&ctx.errors);
        tokio::task::yield_now().await;

        // Phase: Learning — select a strategy and build the proposal.
        if cycle.advance_to(CycleStatus::Learning).is_err() {
            return cycle;
        }
        let pre_cycle_tuning = self.tuning();
        let update: Option<LearningUpdate> =
            lock_or_recover(&self.learning).propose(&ctx.errors, &pre_cycle_tuning);
        let Some(update) = update else {
            let _ = cycle.fail(FailureReason::NoStrategy);
            lock_or_recover(&self.stats).cycles_failed += 1;
            return cycle;
        };
        tokio::task::yield_now().await;

        // Phase: Testing — regression suite against the candidate tuning.
        if cycle.advance_to(CycleStatus::Testing).is_err() {
            return cycle;
        }
        let candidate = update.candidate_tuning(&pre_cycle_tuning);
        let report: RegressionReport = self.suite.run_all(&candidate);
        tracing::debug!(target: "improve::cycle", cycle_id = %cycle.cycle_id, "{}", report.summary());
        if !report.overall_passed {
            let failed = report.failed_names();
            self.record_learning_outcome(&update, false, "regression rejected candidate");
            let _ = cycle.fail(FailureReason::RegressionFailed { failed });
            lock_or_recover(&self.stats).cycles_failed += 1;
            return cycle;
        }
        tokio::task::yield_now().await;

        // Phase: Validated — weighted scoring.
        if cycle.advance_to(CycleStatus::Validated).is_err() {
            return cycle;
        }
        let error_reduction = if ctx.errors.is_empty() {
            0.0
        } else {
            worst_kind_count as f64 / ctx.errors.len() as f64
        };
        let feedback_score = lock_or_recover(&self.feedback).normalized_score();
        let score = (self.config.weight_error_reduction * error_reduction
            + self.config.weight_regression * report.pass_rate
            + self.config.weight_feedback * feedback_score)
            .clamp(0.0, 1.0);
        cycle.validation_score = score;
        let threshold = pre_cycle_tuning.validation_threshold;
        tokio::task::yield_now().await;

        // Phase: Deploy or rollback.
        if score >= threshold {
            self.deploy(&mut cycle, &update, &candidate, score);
        } else {
            self.rollback(&mut cycle, &update, score, threshold);
        }
        cycle
    }

    fn deploy(
        &self,
        cycle: &mut ImprovementCycle,
        update: &LearningUpdate,
        candidate: &EngineTuning,
        score: f64,
    ) {
        *lock_or_recover(&self.tuning) = candidate.clone();
        lock_or_recover(&self.snapshots).commit(
            candidate,
            ChangeSource::CycleDeploy { cycle_id: cycle.cycle_id },
            Some(format!("strategy {}", update.strategy)),
        );
        cycle.improvements_made = update.changes.len() as u32;
        self.record_learning_outcome(update, true, "deployed");
        lock_or_recover(&self.feedback).record(
            FeedbackEntry::new(
                FeedbackKind::ValidationOutcome,
                score * 2.0 - 1.0,
                format!("cycle {} deployed at score {score:.3}", cycle.cycle_id),
            )
            .with_tag(update.strategy.to_string()),
        );

        if cycle.advance_to(CycleStatus::Deployed).is_ok() {
            lock_or_recover(&self.stats).cycles_deployed += 1;
            tracing::info!(
                target: "improve::cycle",
                cycle_id = %cycle.cycle_id,
                score,
                changes = cycle.improvements_made,
                "cycle deployed"
            );
        }
    }

    fn rollback(
        &self,
        cycle: &mut ImprovementCycle,
        update: &LearningUpdate,
        score: f64,
        threshold: f64,
    ) {
        // Restore the pre-cycle backup. Nothing was installed yet, but the
        // restore is committed so history shows the decision, and the shared
        // tuning is pinned back to the backup value in case a concurrent
        // cycle deployed mid-validation.
        let backup_id = {
            let snapshots = lock_or_recover(&self.snapshots);
            snapshots
                .all()
                .filter(|s| s.source == ChangeSource::CycleBackup { cycle_id: cycle.cycle_id })
                .map(|s| s.id)
                .last()
        };
        if let Some(backup_id) = backup_id {
            let restored = lock_or_recover(&self.snapshots)
                .rollback_to(backup_id, ChangeSource::Rollback { to_snapshot: backup_id });
            if let Ok(restored) = restored {
                *lock_or_recover(&self.tuning) = restored;
            }
        }
        self.record_learning_outcome(update, false, "score below threshold");
        lock_or_recover(&self.feedback).record(FeedbackEntry::new(
            FeedbackKind::ValidationOutcome,
            score - 1.0, // always negative: a rejected cycle is bad news
            format!("cycle {} rolled back at score {score:.3}", cycle.cycle_id),
        ));

        let _ = cycle.fail(FailureReason::ScoreBelowThreshold { score, threshold });
        let mut stats = lock_or_recover(&self.stats);
        stats.cycles_failed += 1;
        stats.rollbacks += 1;
    }

    fn record_learning_outcome(&self, update: &LearningUpdate, applied: bool, notes: &str) {
        lock_or_recover(&self.learning).record_result(LearningResult {
            update_id: update.id,
            applied,
            error_reduction: if applied { 1.0 } else { 0.0 },
            notes: notes.to_string(),
        });
    }

    /// Remove a cycle from the active map.
    fn take_active(&self, cycle_id: Uuid) -> Option<ImprovementCycle> {
        lock_or_recover(&self.active).remove(&cycle_id)
    }

    /// Push a finished record into bounded history.
    fn finish(&self, cycle: ImprovementCycle) {
        // The record may still be in the active map if run_phases bailed early.
        self.take_active(cycle.cycle_id);
        let mut history = lock_or_recover(&self.history);
        while history.len() >= self.config.history_cap.max(1) {
            history.pop_front();
        }
        history.push_back(cycle);
    }
}

/// Count of errors sharing the most common kind.
fn dominant_kind_count(errors: &[DetectedError]) -> usize {
    let mut counts: HashMap<_, usize> = HashMap::new();
    for e in errors {
        *counts.entry(e.kind).or_insert(0) += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improve::detector::{DetectorConfig, ErrorDetector};
    use crate::improve::feedback::FeedbackConfig;

    fn errors(n: usize) -> Vec<DetectedError> {
        let mut d = ErrorDetector::new(DetectorConfig::default());
        let artifact = "x: division by zero\n".repeat(n);
        d.scan_artifact(&artifact)
    }

    fn make_engine(tuning: EngineTuning) -> Arc<ImprovementEngine> {
        Arc::new(ImprovementEngine::new(
            CycleConfig::default(),
            tuning,
            RegressionSuite::with_builtins(),
            Arc::new(Mutex::new(FeedbackCollector::new(FeedbackConfig::default()))),
        ))
    }

    fn ctx(n_errors: usize) -> CycleContext {
        CycleContext {
            description: "test trigger".into(),
            errors: errors(n_errors),
            performance: HashMap::new(),
        }
    }

    // ===== CycleStatus transitions =====

    #[test]
    fn test_phases_advance_in_order_only() {
        assert!(CycleStatus::Monitoring.can_advance_to(CycleStatus::Analyzing));
        assert!(CycleStatus::Analyzing.can_advance_to(CycleStatus::Learning));
        assert!(CycleStatus::Learning.can_advance_to(CycleStatus::Testing));
        assert!(CycleStatus::Testing.can_advance_to(CycleStatus::Validated));
        assert!(CycleStatus::Validated.can_advance_to(CycleStatus::Deployed));
    }

    #[test]
    fn test_phase_skipping_is_illegal() {
        assert!(!CycleStatus::Monitoring.can_advance_to(CycleStatus::Learning));
        assert!(!CycleStatus::Monitoring.can_advance_to(CycleStatus::Deployed));
        assert!(!CycleStatus::Analyzing.can_advance_to(CycleStatus::Validated));
    }

    #[test]
    fn test_backward_transitions_illegal() {
        assert!(!CycleStatus::Testing.can_advance_to(CycleStatus::Analyzing));
        assert!(!CycleStatus::Deployed.can_advance_to(CycleStatus::Monitoring));
    }

    #[test]
    fn test_any_nonterminal_can_fail() {
        for s in [
            CycleStatus::Monitoring,
            CycleStatus::Analyzing,
            CycleStatus::Learning,
            CycleStatus::Testing,
            CycleStatus::Validated,
        ] {
            assert!(s.can_advance_to(CycleStatus::Failed), "{s} should be able to fail");
        }
    }

    #[test]
    fn test_terminal_states_cannot_move() {
        assert!(!CycleStatus::Deployed.can_advance_to(CycleStatus::Failed));
        assert!(!CycleStatus::Failed.can_advance_to(CycleStatus::Failed));
        assert!(!CycleStatus::Failed.can_advance_to(CycleStatus::Analyzing));
    }

    #[test]
    fn test_advance_to_rejects_illegal_jump() {
        let mut cycle = ImprovementCycle::new(5);
        let err = cycle.advance_to(CycleStatus::Deployed).unwrap_err();
        assert_eq!(err.from, CycleStatus::Monitoring);
        assert_eq!(err.to, CycleStatus::Deployed);
        // Status unchanged after a rejected transition.
        assert_eq!(cycle.status, CycleStatus::Monitoring);
    }

    #[test]
    fn test_fail_sets_reason_and_completion() {
        let mut cycle = ImprovementCycle::new(5);
        cycle.advance_to(CycleStatus::Analyzing).unwrap();
        cycle.fail(FailureReason::NoStrategy).unwrap();
        assert_eq!(cycle.status, CycleStatus::Failed);
        assert_eq!(cycle.failure, Some(FailureReason::NoStrategy));
        assert!(cycle.completed_at_ms.is_some());
    }

    #[test]
    fn test_fail_twice_rejected() {
        let mut cycle = ImprovementCycle::new(5);
        cycle.fail(FailureReason::NoStrategy).unwrap();
        assert!(cycle.fail(FailureReason::Timeout).is_err());
        // First reason survives.
        assert_eq!(cycle.failure, Some(FailureReason::NoStrategy));
    }

    // ===== Admission =====

    #[test]
    fn test_admit_below_threshold_rejected() {
        let engine = make_engine(EngineTuning { min_error_threshold: 3, ..EngineTuning::default() });
        let err = engine.admit(&ctx(2)).unwrap_err();
        assert_eq!(err, CycleError::BelowThreshold { detected: 2, required: 3 });
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_admit_at_capacity_rejected() {
        let engine = make_engine(EngineTuning { max_active_cycles: 1, ..EngineTuning::default() });
        engine.admit(&ctx(5)).unwrap();
        let err = engine.admit(&ctx(5)).unwrap_err();
        assert_eq!(err, CycleError::AtCapacity { active: 1, cap: 1 });
    }

    #[test]
    fn test_admit_takes_pre_cycle_backup() {
        let engine = make_engine(EngineTuning::default());
        let cycle = engine.admit(&ctx(5)).unwrap();
        let snapshots = engine.snapshot_handle();
        let reg = snapshots.lock().unwrap();
        assert!(reg
            .all()
            .any(|s| s.source == ChangeSource::CycleBackup { cycle_id: cycle.cycle_id }));
    }

    #[test]
    fn test_admit_registers_active_cycle() {
        let engine = make_engine(EngineTuning::default());
        let cycle = engine.admit(&ctx(5)).unwrap();
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.cycle(cycle.cycle_id).unwrap().status, CycleStatus::Monitoring);
        assert_eq!(engine.stats().cycles_started, 1);
    }

    // ===== drive — full runs =====

    #[tokio::test]
    async fn test_successful_cycle_deploys_and_moves_to_history() {
        // Default tuning: threshold 0.7. Score = 0.4·1.0 + 0.4·1.0 + 0.2·0.5 = 0.9.
        let engine = make_engine(EngineTuning::default());
        let c = ctx(5);
        let admitted = engine.admit(&c).unwrap();
        let done = engine.drive(admitted.cycle_id, c).await;

        assert_eq!(done.status, CycleStatus::Deployed);
        assert!((done.validation_score - 0.9).abs() < 1e-9);
        assert_eq!(done.improvements_made, 1);
        assert!(done.completed_at_ms.is_some());
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.stats().cycles_deployed, 1);
    }

    #[tokio::test]
    async fn test_deploy_installs_candidate_tuning() {
        let engine = make_engine(EngineTuning::default());
        let before = engine.tuning();
        let c = ctx(5); // calculation errors → RelaxTolerance
        let admitted = engine.admit(&c).unwrap();
        engine.drive(admitted.cycle_id, c).await;

        let after = engine.tuning();
        assert!(after.ratio_tolerance > before.ratio_tolerance);
        // Deploy snapshot committed.
        let snapshots = engine.snapshot_handle();
        let reg = snapshots.lock().unwrap();
        assert!(matches!(
            reg.latest().unwrap().source,
            ChangeSource::CycleDeploy { .. }
        ));
    }

    #[tokio::test]
    async fn test_score_below_threshold_rolls_back() {
        // Threshold 0.95 > achievable 0.9 → rollback.
        let engine = make_engine(EngineTuning {
            validation_threshold: 0.95,
            ..EngineTuning::default()
        });
        let before = engine.tuning();
        let c = ctx(5);
        let admitted = engine.admit(&c).unwrap();
        let done = engine.drive(admitted.cycle_id, c).await;

        assert_eq!(done.status, CycleStatus::Failed);
        assert!(matches!(done.failure, Some(FailureReason::ScoreBelowThreshold { .. })));
        // Tuning unchanged.
        assert_eq!(engine.tuning(), before);
        let stats = engine.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.cycles_failed, 1);
        // Rollback entry committed.
        let snapshots = engine.snapshot_handle();
        let reg = snapshots.lock().unwrap();
        assert!(matches!(reg.latest().unwrap().source, ChangeSource::Rollback { .. }));
    }

    #[tokio::test]
    async fn test_cycle_never_skips_phases() {
        // Inspect history record of a deployed cycle: it must have passed
        // through Validated (validation_score set) and carry no failure.
        let engine = make_engine(EngineTuning::default());
        let c = ctx(5);
        let admitted = engine.admit(&c).unwrap();
        let done = engine.drive(admitted.cycle_id, c).await;
        assert_eq!(done.status, CycleStatus::Deployed);
        assert!(done.validation_score > 0.0);
        assert!(done.failure.is_none());
    }

    #[tokio::test]
    async fn test_no_strategy_fails_cycle() {
        let engine = make_engine(EngineTuning::default());
        // First cycle consumes the RelaxTolerance cooldown slot.
        let c1 = ctx(5);
        let a1 = engine.admit(&c1).unwrap();
        engine.drive(a1.cycle_id, c1).await;
        // Second cycle with the same error kind inside the cooldown window.
        let c2 = ctx(5);
        let a2 = engine.admit(&c2).unwrap();
        let done = engine.drive(a2.cycle_id, c2).await;
        assert_eq!(done.status, CycleStatus::Failed);
        assert_eq!(done.failure, Some(FailureReason::NoStrategy));
    }

    #[tokio::test]
    async fn test_timeout_fails_cycle() {
        let engine = make_engine(EngineTuning {
            cycle_timeout_ms: 0, // expires immediately
            ..EngineTuning::default()
        });
        let c = ctx(5);
        let admitted = engine.admit(&c).unwrap();
        let done = engine.drive(admitted.cycle_id, c).await;
        assert_eq!(done.status, CycleStatus::Failed);
        assert_eq!(done.failure, Some(FailureReason::Timeout));
        assert_eq!(engine.stats().timeouts, 1);
        // Timed-out cycles still land in history, not the active map.
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.history().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_cycle_background_run() {
        let engine = make_engine(EngineTuning::default());
        let admitted = engine.trigger_cycle(ctx(5)).unwrap();
        assert_eq!(admitted.status, CycleStatus::Monitoring);
        engine.await_spawned().await;
        let done = engine.cycle(admitted.cycle_id).unwrap();
        assert_eq!(done.status, CycleStatus::Deployed);
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_frees_after_completion() {
        let engine = make_engine(EngineTuning { max_active_cycles: 1, ..EngineTuning::default() });
        let c = ctx(5);
        let admitted = engine.admit(&c).unwrap();
        assert!(engine.admit(&ctx(5)).is_err());
        engine.drive(admitted.cycle_id, c).await;
        // Slot freed — next admission succeeds.
        assert!(engine.admit(&ctx(5)).is_ok());
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let engine = Arc::new(ImprovementEngine::new(
            CycleConfig {
                history_cap: 2,
                learning: LearningConfig { cooldown_ms: 0, ..LearningConfig::default() },
                ..CycleConfig::default()
            },
            EngineTuning::default(),
            RegressionSuite::with_builtins(),
            Arc::new(Mutex::new(FeedbackCollector::new(FeedbackConfig::default()))),
        ));
        for _ in 0..4 {
            let c = ctx(5);
            let admitted = engine.admit(&c).unwrap();
            engine.drive(admitted.cycle_id, c).await;
        }
        assert_eq!(engine.history().len(), 2);
    }

    // ===== Scoring weights =====

    #[test]
    fn test_default_weights_are_canonical_split() {
        let cfg = CycleConfig::default();
        assert!((cfg.weight_error_reduction - 0.4).abs() < 1e-12);
        assert!((cfg.weight_regression - 0.4).abs() < 1e-12);
        assert!((cfg.weight_feedback - 0.2).abs() < 1e-12);
    }
}
