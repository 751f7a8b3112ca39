//! # Stage: Business Operations Engine
//!
//! ## Responsibility
//! The dependency-injected coordinator. Owns the error detector, the
//! feedback store, and the improvement engine; runs the analytics
//! capabilities and feeds what they produce into the improvement loop.
//!
//! There is no process-wide instance: callers construct a
//! [`BusinessOpsEngine`] explicitly and pass it where it is needed.
//!
//! ## Guarantees
//! - Assessment methods never panic; per-metric failures are recorded, not
//!   thrown away
//! - Every artifact the engine renders is scanned for errors before it is
//!   returned
//! - Improvement cycles only trigger past the configured error threshold,
//!   and admission refusals are typed, not silent

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::compliance::{ComplianceControl, ComplianceError, Scorecard};
use crate::config::{ConfigError, EngineConfig};
use crate::finance::capital::CapitalAssessment;
use crate::finance::ratios::RatioReport;
use crate::finance::statements::{BalanceSheet, CashFlowSchedule, IncomeStatement};
use crate::improve::cycle::{
    CycleContext, CycleError, CycleStatus, FailureReason, ImprovementCycle, ImprovementEngine,
};
use crate::improve::detector::{DetectedError, ErrorDetector};
use crate::improve::feedback::{FeedbackCollector, FeedbackEntry, FeedbackKind};
use crate::improve::now_ms;
use crate::improve::regression::RegressionSuite;
use crate::strategy::{rank_initiatives, InitiativeScores, PairwiseMatrix, StrategyError, SwotAnalysis};

// ---------------------------------------------------------------------------
// Report input / output records
// ---------------------------------------------------------------------------

/// Everything a full operations report can draw on. Optional sections are
/// simply omitted from the report.
#[derive(Debug, Clone, Default)]
pub struct ReportInput {
    pub balance_sheet: BalanceSheet,
    pub income_statement: IncomeStatement,
    pub cash_flows: Option<CashFlowSchedule>,
    pub discount_rate: f64,
    pub controls: Vec<ComplianceControl>,
    pub swot: Option<SwotAnalysis>,
}

/// The outcome of a strategic review: rendered SWOT plus AHP ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicReview {
    pub rendered: String,
    pub favorability: Option<f64>,
    /// `(initiative, composite score)`, best first.
    pub ranked: Vec<(String, f64)>,
}

/// The aggregate artifact: one report over every section that was supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsReport {
    pub generated_at_ms: u64,
    pub ratios: RatioReport,
    pub capital: Option<CapitalAssessment>,
    pub scorecard: Option<Scorecard>,
    pub strategic_text: Option<String>,
    pub favorability: Option<f64>,
    /// Every per-metric failure message, in computation order.
    pub issues: Vec<String>,
    /// Errors the detector found when scanning this report.
    pub errors_detected: usize,
}

impl OperationsReport {
    /// Deterministic text rendering — the artifact the error detector scans.
    pub fn render(&self) -> String {
        let mut out = String::from("Business Operations Report\n");

        out.push_str("\n== Financial ratios ==\n");
        for (name, value) in self.ratios.named_values() {
            out.push_str(&format!("{name}: {value:.4}\n"));
        }

        if let Some(capital) = &self.capital {
            out.push_str("\n== Capital budgeting ==\n");
            if let Some(npv) = capital.npv {
                out.push_str(&format!("npv@{:.2}: {npv:.2}\n", capital.discount_rate));
            }
            if let Some(irr) = capital.irr {
                out.push_str(&format!("irr: {irr:.4}\n"));
            }
            if let Some(payback) = capital.payback_periods {
                out.push_str(&format!("payback_periods: {payback:.2}\n"));
            }
        }

        if let Some(card) = &self.scorecard {
            out.push_str("\n== Compliance ==\n");
            out.push_str(&format!(
                "overall: {:.3} coverage: {:.2} failed: {}\n",
                card.overall,
                card.coverage,
                card.failed_controls.len()
            ));
        }

        if let Some(text) = &self.strategic_text {
            out.push_str("\n== Strategy ==\n");
            out.push_str(text);
        }

        if !self.issues.is_empty() {
            out.push_str("\n== Issues ==\n");
            for issue in &self.issues {
                out.push_str(issue);
                out.push('\n');
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// BusinessOpsEngine
// ---------------------------------------------------------------------------

/// The coordinator. See module docs.
pub struct BusinessOpsEngine {
    config: EngineConfig,
    detector: Mutex<ErrorDetector>,
    feedback: Arc<Mutex<FeedbackCollector>>,
    improvement: Arc<ImprovementEngine>,
    /// Completed-cycle count already fed to the drift detector.
    drift_fed: Mutex<usize>,
}

fn lock_or_recover<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BusinessOpsEngine {
    /// Build an engine from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let feedback = Arc::new(Mutex::new(FeedbackCollector::new(config.feedback_config())));
        let improvement = Arc::new(ImprovementEngine::new(
            config.cycle_config(),
            config.tuning.clone(),
            RegressionSuite::with_builtins(),
            Arc::clone(&feedback),
        ));
        Ok(Self {
            detector: Mutex::new(ErrorDetector::new(config.detector_config())),
            feedback,
            improvement,
            config,
            drift_fed: Mutex::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The improvement subsystem (shared).
    pub fn improvement(&self) -> Arc<ImprovementEngine> {
        Arc::clone(&self.improvement)
    }

    // -----------------------------------------------------------------------
    // Analytics operations
    // -----------------------------------------------------------------------

    /// Full ratio battery over one statement pair. Failures flow into the
    /// error detector as both text patterns and metric bounds violations.
    pub fn financial_assessment(
        &self,
        bs: &BalanceSheet,
        is: &IncomeStatement,
    ) -> RatioReport {
        let report = RatioReport::compute(bs, is);
        let mut detector = lock_or_recover(&self.detector);
        detector.scan_metrics(&report.named_values());
        if !report.failures.is_empty() {
            let text = report
                .failures
                .iter()
                .map(|(_, msg)| msg.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let found = detector.scan_artifact(&text);
            tracing::warn!(
                target: "bizops::engine",
                failures = report.failures.len(),
                detected = found.len(),
                "financial assessment had failing metrics"
            );
        }
        report
    }

    /// NPV / IRR / payback for one schedule.
    pub fn capital_assessment(
        &self,
        schedule: &CashFlowSchedule,
        discount_rate: f64,
    ) -> CapitalAssessment {
        let assessment = CapitalAssessment::compute(schedule, discount_rate);
        if !assessment.failures.is_empty() {
            let text = assessment
                .failures
                .iter()
                .map(|(_, msg)| msg.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            lock_or_recover(&self.detector).scan_artifact(&text);
        }
        assessment
    }

    /// Weighted compliance scorecard. Failed controls are recorded as
    /// negative feedback so they weigh on future cycle validation.
    pub fn compliance_audit(
        &self,
        controls: &[ComplianceControl],
    ) -> Result<Scorecard, ComplianceError> {
        let card = Scorecard::compute(controls)?;
        if !card.failed_controls.is_empty() {
            let mut feedback = lock_or_recover(&self.feedback);
            for id in &card.failed_controls {
                feedback.record(
                    FeedbackEntry::new(
                        FeedbackKind::ErrorReport,
                        -0.5,
                        format!("compliance control {id} failed"),
                    )
                    .with_tag("compliance"),
                );
            }
        }
        Ok(card)
    }

    /// SWOT rendering plus AHP initiative ranking. The criteria matrix and
    /// initiative scores are optional; without them only the SWOT part runs.
    pub fn strategic_review(
        &self,
        swot: &SwotAnalysis,
        criteria: Option<&PairwiseMatrix>,
        initiatives: &[InitiativeScores],
    ) -> Result<StrategicReview, StrategyError> {
        let ranked = match criteria {
            Some(matrix) => rank_initiatives(matrix, initiatives)?,
            None => Vec::new(),
        };
        Ok(StrategicReview {
            rendered: swot.render(),
            favorability: swot.favorability(),
            ranked,
        })
    }

    /// Aggregate every supplied section into one report, render it, and scan
    /// the rendered artifact for errors.
    ///
    /// Sections are computed with the pure calculators so each failure is
    /// detected exactly once, from the rendered artifact.
    pub fn operations_report(&self, input: &ReportInput) -> OperationsReport {
        let ratios = RatioReport::compute(&input.balance_sheet, &input.income_statement);
        let mut issues: Vec<String> =
            ratios.failures.iter().map(|(_, msg)| msg.clone()).collect();

        let capital = input.cash_flows.as_ref().map(|schedule| {
            let assessment = CapitalAssessment::compute(schedule, input.discount_rate);
            issues.extend(assessment.failures.iter().map(|(_, msg)| msg.clone()));
            assessment
        });

        let scorecard = if input.controls.is_empty() {
            None
        } else {
            match self.compliance_audit(&input.controls) {
                Ok(card) => Some(card),
                Err(e) => {
                    issues.push(e.to_string());
                    None
                }
            }
        };

        let (strategic_text, favorability) = match &input.swot {
            Some(swot) => (Some(swot.render()), swot.favorability()),
            None => (None, None),
        };

        let mut report = OperationsReport {
            generated_at_ms: now_ms(),
            ratios,
            capital,
            scorecard,
            strategic_text,
            favorability,
            issues,
            errors_detected: 0,
        };

        // The rendered report is itself an artifact the detector watches.
        let rendered = report.render();
        let mut detector = lock_or_recover(&self.detector);
        detector.scan_metrics(&report.ratios.named_values());
        let found = detector.scan_artifact(&rendered);
        report.errors_detected = found.len();
        drop(detector);

        tracing::info!(
            target: "bizops::engine",
            issues = report.issues.len(),
            errors = report.errors_detected,
            "operations report generated"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Feedback and error introspection
    // -----------------------------------------------------------------------

    pub fn record_feedback(&self, entry: FeedbackEntry) {
        lock_or_recover(&self.feedback).record(entry);
    }

    /// Number of detected errors currently pending (not yet consumed by a
    /// triggered cycle).
    pub fn pending_error_count(&self) -> usize {
        lock_or_recover(&self.detector).history_len()
    }

    /// Cloned snapshot of the pending errors.
    pub fn pending_errors(&self) -> Vec<DetectedError> {
        lock_or_recover(&self.detector).history().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Improvement triggering
    // -----------------------------------------------------------------------

    /// Trigger an improvement cycle when enough errors have accumulated.
    ///
    /// Returns `Ok(None)` below the trigger threshold, `Ok(Some(cycle))`
    /// when a cycle was admitted and spawned, and `Err` only for admission
    /// refusals the caller should act on (capacity). Must be called within
    /// a tokio runtime; the cycle runs on a spawned task.
    pub fn maybe_improve(&self) -> Result<Option<ImprovementCycle>, CycleError> {
        self.feed_drift();

        let errors = self.pending_errors();
        let required = self.improvement.tuning().min_error_threshold;
        if (errors.len() as u32) < required {
            return Ok(None);
        }

        let ctx = CycleContext {
            description: format!("auto-trigger on {} pending error(s)", errors.len()),
            errors,
            performance: HashMap::new(),
        };

        match self.improvement.trigger_cycle(ctx) {
            Ok(cycle) => {
                // The triggering errors are consumed by the cycle.
                lock_or_recover(&self.detector).clear_history();
                Ok(Some(cycle))
            }
            Err(CycleError::BelowThreshold { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Await all spawned cycle runs (shutdown / test hook).
    pub async fn await_improvements(&self) {
        self.improvement.await_spawned().await;
        self.feed_drift();
    }

    /// Feed validation scores of newly completed cycles into the drift
    /// detector. Only scored cycles count — a `NoStrategy` failure carries
    /// no signal about result quality.
    fn feed_drift(&self) {
        let history = self.improvement.history();
        let mut fed = lock_or_recover(&self.drift_fed);
        if history.len() <= *fed {
            return;
        }
        let mut detector = lock_or_recover(&self.detector);
        for cycle in history.iter().skip(*fed) {
            let scored = cycle.status == CycleStatus::Deployed
                || matches!(cycle.failure, Some(FailureReason::ScoreBelowThreshold { .. }));
            if scored {
                detector.observe_cycle_score(cycle.validation_score);
            }
        }
        *fed = history.len();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ControlStatus;
    use crate::strategy::{Impact, SwotCategory, SwotEntry};

    fn engine() -> BusinessOpsEngine {
        BusinessOpsEngine::new(EngineConfig::default()).unwrap()
    }

    fn clean_bs() -> BalanceSheet {
        BalanceSheet {
            current_assets: 8_000_000.0,
            inventory: 1_500_000.0,
            cash_and_equivalents: 2_000_000.0,
            total_assets: 20_000_000.0,
            current_liabilities: 3_000_000.0,
            total_liabilities: 9_000_000.0,
            shareholders_equity: 11_000_000.0,
        }
    }

    fn clean_is() -> IncomeStatement {
        IncomeStatement {
            revenue: 10_000_000.0,
            cost_of_goods_sold: 6_000_000.0,
            operating_income: 1_800_000.0,
            interest_expense: 400_000.0,
            net_income: 1_050_000.0,
        }
    }

    // ===== Construction =====

    #[test]
    fn test_new_engine_validates_config() {
        let bad = EngineConfig {
            weights: crate::config::ScoreWeights {
                error_reduction: 0.9,
                regression: 0.9,
                feedback: 0.9,
            },
            ..EngineConfig::default()
        };
        assert!(BusinessOpsEngine::new(bad).is_err());
    }

    #[test]
    fn test_engines_are_independent() {
        // No hidden global: errors in one engine do not leak into another.
        let a = engine();
        let b = engine();
        let bad_bs = BalanceSheet { current_liabilities: 0.0, ..clean_bs() };
        a.financial_assessment(&bad_bs, &clean_is());
        assert!(a.pending_error_count() > 0);
        assert_eq!(b.pending_error_count(), 0);
    }

    // ===== Assessments =====

    #[test]
    fn test_financial_assessment_clean_input_no_errors() {
        let e = engine();
        let report = e.financial_assessment(&clean_bs(), &clean_is());
        assert_eq!(report.failure_count(), 0);
        assert_eq!(e.pending_error_count(), 0);
    }

    #[test]
    fn test_financial_assessment_failures_feed_detector() {
        let e = engine();
        let bad = BalanceSheet { shareholders_equity: 0.0, ..clean_bs() };
        let report = e.financial_assessment(&bad, &clean_is());
        assert_eq!(report.failure_count(), 2);
        // Each failure message matched the division-by-zero pattern.
        assert_eq!(e.pending_error_count(), 2);
    }

    #[test]
    fn test_capital_assessment_failures_feed_detector() {
        let e = engine();
        let no_irr = CashFlowSchedule::new(0.0, vec![10.0, 10.0]);
        let assessment = e.capital_assessment(&no_irr, 0.1);
        assert!(assessment.irr.is_none());
        assert!(e.pending_error_count() > 0);
    }

    #[test]
    fn test_compliance_failed_controls_become_feedback() {
        let e = engine();
        let controls = vec![
            ComplianceControl {
                id: "AC-1".into(),
                title: "Access review".into(),
                domain: "access".into(),
                weight: 1.0,
                status: ControlStatus::Failed,
                notes: None,
            },
            ComplianceControl {
                id: "AC-2".into(),
                title: "Key rotation".into(),
                domain: "access".into(),
                weight: 1.0,
                status: ControlStatus::Satisfied,
                notes: None,
            },
        ];
        let card = e.compliance_audit(&controls).unwrap();
        assert_eq!(card.failed_controls, vec!["AC-1".to_string()]);
        let fb = e.feedback.lock().unwrap();
        assert_eq!(fb.by_kind(FeedbackKind::ErrorReport).count(), 1);
    }

    #[test]
    fn test_strategic_review_without_criteria() {
        let e = engine();
        let mut swot = SwotAnalysis::new("review");
        swot.add(SwotEntry {
            category: SwotCategory::Strength,
            summary: "strong cash position".into(),
            impact: Impact::High,
            confidence: 0.9,
        })
        .unwrap();
        let review = e.strategic_review(&swot, None, &[]).unwrap();
        assert!(review.rendered.contains("strong cash position"));
        assert!(review.favorability.unwrap() > 0.0);
        assert!(review.ranked.is_empty());
    }

    // ===== Reports =====

    #[test]
    fn test_operations_report_clean_input() {
        let e = engine();
        let input = ReportInput {
            balance_sheet: clean_bs(),
            income_statement: clean_is(),
            cash_flows: Some(CashFlowSchedule::new(1_000.0, vec![400.0; 4])),
            discount_rate: 0.10,
            ..ReportInput::default()
        };
        let report = e.operations_report(&input);
        assert!(report.issues.is_empty());
        assert_eq!(report.errors_detected, 0);
        let text = report.render();
        assert!(text.contains("current_ratio: 2.6667"));
        assert!(text.contains("net_profit_margin: 0.1050"));
        assert!(text.contains("irr:"));
    }

    #[test]
    fn test_operations_report_surfaces_issues() {
        let e = engine();
        let input = ReportInput {
            balance_sheet: BalanceSheet { current_liabilities: 0.0, ..clean_bs() },
            income_statement: clean_is(),
            ..ReportInput::default()
        };
        let report = e.operations_report(&input);
        assert!(!report.issues.is_empty());
        assert!(report.errors_detected > 0);
        assert!(report.render().contains("== Issues =="));
    }

    #[test]
    fn test_operations_report_serializes() {
        let e = engine();
        let input = ReportInput {
            balance_sheet: clean_bs(),
            income_statement: clean_is(),
            ..ReportInput::default()
        };
        let json = serde_json::to_string(&e.operations_report(&input)).unwrap();
        assert!(json.contains("generated_at_ms"));
    }

    // ===== Improvement wiring =====

    #[tokio::test]
    async fn test_maybe_improve_below_threshold_is_none() {
        let e = engine();
        assert!(e.maybe_improve().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_maybe_improve_triggers_and_consumes_errors() {
        let e = engine();
        let bad = BalanceSheet { current_liabilities: 0.0, shareholders_equity: 0.0, ..clean_bs() };
        e.financial_assessment(&bad, &clean_is()); // ≥ 3 division-by-zero failures
        assert!(e.pending_error_count() >= 3);

        let cycle = e.maybe_improve().unwrap().expect("cycle should trigger");
        assert_eq!(cycle.errors_detected, 5);
        // Triggering consumed the pending errors.
        assert_eq!(e.pending_error_count(), 0);

        e.await_improvements().await;
        let done = e.improvement().cycle(cycle.cycle_id).unwrap();
        assert!(done.status.is_terminal());
    }

    #[tokio::test]
    async fn test_capacity_error_surfaces_to_caller() {
        let mut config = EngineConfig::default();
        config.tuning.max_active_cycles = 1;
        // Long cooldown not needed; hold capacity by admitting directly.
        let e = BusinessOpsEngine::new(config).unwrap();
        let bad = BalanceSheet { current_liabilities: 0.0, shareholders_equity: 0.0, ..clean_bs() };
        e.financial_assessment(&bad, &clean_is());

        // Occupy the only slot without driving it.
        let improvement = e.improvement();
        let ctx = CycleContext {
            description: "occupier".into(),
            errors: e.pending_errors(),
            performance: HashMap::new(),
        };
        improvement.admit(&ctx).unwrap();

        let err = e.maybe_improve().unwrap_err();
        assert!(matches!(err, CycleError::AtCapacity { .. }));
    }
}
