//! # Stage: Regression Suite
//!
//! ## Responsibility
//! The gate every proposed tuning must clear before a cycle may deploy it.
//! Checks recompute pinned analytics fixtures and compare against known-good
//! values with the candidate tuning's tolerance, so a tuning that would make
//! the engine produce wrong numbers is caught before it lands.
//!
//! ## Guarantees
//! - Non-panicking: a check that cannot run reports `Failed`, never unwinds
//! - Auditable: every run produces a [`RegressionReport`] with per-check results
//! - Injectable: checks are trait objects, so callers can extend the suite
//!
//! ## NOT Responsible For
//! - Deciding deploy vs rollback (cycle orchestrator reads the report)
//! - Generating candidate tunings (learning engine)

use std::time::{Duration, Instant};

use crate::finance::capital::{irr, npv, payback_period};
use crate::finance::ratios::{current_ratio, net_profit_margin};
use crate::finance::statements::{BalanceSheet, CashFlowSchedule, IncomeStatement};

use super::snapshot::EngineTuning;

// ---------------------------------------------------------------------------
// Check result types
// ---------------------------------------------------------------------------

/// The outcome of a single regression check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Passed,
    Failed { reason: String },
    Skipped { reason: String },
}

impl CheckStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckStatus::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CheckStatus::Failed { .. })
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Passed => write!(f, "PASS"),
            CheckStatus::Failed { reason } => write!(f, "FAIL: {reason}"),
            CheckStatus::Skipped { reason } => write!(f, "SKIP: {reason}"),
        }
    }
}

/// Result of one named check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// RegressionCheck trait
// ---------------------------------------------------------------------------

/// One check in the suite. Object-safe so heterogeneous checks can live in a
/// single `Vec<Box<dyn RegressionCheck>>`.
pub trait RegressionCheck: Send + Sync {
    /// Stable name used in reports and logs.
    fn name(&self) -> &str;

    /// Run the check against a candidate tuning.
    fn run(&self, tuning: &EngineTuning) -> CheckStatus;
}

/// A check built from a closure, used for the built-in fixture set and for
/// ad-hoc checks in tests.
pub struct FnCheck {
    name: String,
    f: Box<dyn Fn(&EngineTuning) -> CheckStatus + Send + Sync>,
}

impl FnCheck {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&EngineTuning) -> CheckStatus + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), f: Box::new(f) }
    }
}

impl RegressionCheck for FnCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, tuning: &EngineTuning) -> CheckStatus {
        (self.f)(tuning)
    }
}

// ---------------------------------------------------------------------------
// Built-in fixture checks
// ---------------------------------------------------------------------------

/// Compare `observed` against `expected` within the tuning's tolerance.
fn expect_close(name: &str, observed: f64, expected: f64, tolerance: f64) -> CheckStatus {
    if !observed.is_finite() {
        return CheckStatus::Failed { reason: format!("{name}: non-finite result {observed}") };
    }
    if (observed - expected).abs() <= tolerance {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed {
            reason: format!("{name}: {observed:.6} differs from {expected:.6} by more than {tolerance}"),
        }
    }
}

/// The pinned fixture checks. Known-good values are fixed; only the
/// comparison tolerance follows the candidate tuning.
pub fn builtin_checks() -> Vec<Box<dyn RegressionCheck>> {
    vec![
        Box::new(FnCheck::new("current_ratio_fixture", |t| {
            let bs = BalanceSheet {
                current_assets: 8_000_000.0,
                current_liabilities: 3_000_000.0,
                ..BalanceSheet::default()
            };
            match current_ratio(&bs) {
                Ok(v) => expect_close("current_ratio", v, 8.0 / 3.0, t.ratio_tolerance),
                Err(e) => CheckStatus::Failed { reason: e.to_string() },
            }
        })),
        Box::new(FnCheck::new("net_profit_margin_fixture", |t| {
            let is = IncomeStatement {
                revenue: 10_000_000.0,
                net_income: 1_050_000.0,
                ..IncomeStatement::default()
            };
            match net_profit_margin(&is) {
                Ok(v) => expect_close("net_profit_margin", v, 0.105, t.ratio_tolerance),
                Err(e) => CheckStatus::Failed { reason: e.to_string() },
            }
        })),
        Box::new(FnCheck::new("zero_denominator_is_error", |_| {
            let bs = BalanceSheet { current_liabilities: 0.0, ..BalanceSheet::default() };
            match current_ratio(&bs) {
                Err(_) => CheckStatus::Passed,
                Ok(v) => CheckStatus::Failed {
                    reason: format!("zero denominator produced {v} instead of an error"),
                },
            }
        })),
        Box::new(FnCheck::new("npv_irr_consistency", |t| {
            // NPV evaluated at the schedule's own IRR must be ~0.
            let s = CashFlowSchedule::new(1_000.0, vec![400.0, 400.0, 400.0, 400.0]);
            let rate = match irr(&s) {
                Ok(r) => r,
                Err(e) => return CheckStatus::Failed { reason: e.to_string() },
            };
            match npv(rate, &s) {
                Ok(v) => expect_close("npv_at_irr", v, 0.0, t.ratio_tolerance.max(1e-4)),
                Err(e) => CheckStatus::Failed { reason: e.to_string() },
            }
        })),
        Box::new(FnCheck::new("payback_fixture", |t| {
            let s = CashFlowSchedule::new(1_000.0, vec![400.0, 400.0, 400.0, 400.0]);
            match payback_period(&s) {
                Ok(v) => expect_close("payback", v, 2.5, t.ratio_tolerance),
                Err(e) => CheckStatus::Failed { reason: e.to_string() },
            }
        })),
        Box::new(FnCheck::new("tuning_self_consistency", |t| {
            // A candidate that disables its own safety rails must not land.
            if !(0.0..=1.0).contains(&t.validation_threshold) {
                return CheckStatus::Failed {
                    reason: format!("validation_threshold {} outside [0,1]", t.validation_threshold),
                };
            }
            if t.max_active_cycles == 0 {
                return CheckStatus::Failed { reason: "max_active_cycles is 0".into() };
            }
            if t.ratio_tolerance <= 0.0 || t.ratio_tolerance > 0.5 {
                return CheckStatus::Failed {
                    reason: format!("ratio_tolerance {} outside (0, 0.5]", t.ratio_tolerance),
                };
            }
            CheckStatus::Passed
        })),
    ]
}

// ---------------------------------------------------------------------------
// RegressionReport + RegressionSuite
// ---------------------------------------------------------------------------

/// The complete output of one suite run.
#[derive(Debug, Clone)]
pub struct RegressionReport {
    pub checks: Vec<CheckResult>,
    /// Fraction of non-skipped checks that passed, [0, 1]. Zero when every
    /// check was skipped — an all-skip run proves nothing.
    pub pass_rate: f64,
    /// `true` iff every non-skipped check passed and at least one check ran.
    pub overall_passed: bool,
    pub total_duration: Duration,
}

impl RegressionReport {
    pub fn failed_names(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.status.is_failed())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Compact one-line summary for logs.
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.status.is_passed()).count();
        let failed = self.checks.iter().filter(|c| c.status.is_failed()).count();
        format!(
            "regression: {} — {passed} passed, {failed} failed, {} total",
            if self.overall_passed { "PASS" } else { "FAIL" },
            self.checks.len(),
        )
    }
}

/// The suite: the built-in fixtures plus any caller-registered checks.
pub struct RegressionSuite {
    checks: Vec<Box<dyn RegressionCheck>>,
}

impl RegressionSuite {
    /// Suite with the built-in fixture checks.
    pub fn with_builtins() -> Self {
        Self { checks: builtin_checks() }
    }

    /// Empty suite (tests compose their own checks).
    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn add_check(&mut self, check: Box<dyn RegressionCheck>) {
        self.checks.push(check);
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Run every check against the candidate tuning.
    pub fn run_all(&self, tuning: &EngineTuning) -> RegressionReport {
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let check_started = Instant::now();
            let status = check.run(tuning);
            results.push(CheckResult {
                name: check.name().to_string(),
                status,
                duration: check_started.elapsed(),
            });
        }

        let ran: Vec<&CheckResult> = results
            .iter()
            .filter(|c| !matches!(c.status, CheckStatus::Skipped { .. }))
            .collect();
        let passed = ran.iter().filter(|c| c.status.is_passed()).count();
        let pass_rate = if ran.is_empty() { 0.0 } else { passed as f64 / ran.len() as f64 };

        RegressionReport {
            overall_passed: !ran.is_empty() && passed == ran.len(),
            pass_rate,
            checks: results,
            total_duration: started.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
