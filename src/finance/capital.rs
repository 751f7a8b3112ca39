//! Capital budgeting: NPV, IRR, and payback period over a
//! [`CashFlowSchedule`].
//!
//! IRR uses Newton–Raphson seeded at 10% with a bisection fallback when the
//! derivative degenerates or Newton walks out of the bracket. Both solvers
//! are iteration-capped and return [`MetricError::NoConvergence`] rather than
//! spinning.

use serde::{Deserialize, Serialize};

use super::statements::CashFlowSchedule;
use super::MetricError;

/// Newton iteration cap before declaring non-convergence.
const IRR_NEWTON_MAX_ITERS: u32 = 50;
/// Bisection iteration cap.
const IRR_BISECT_MAX_ITERS: u32 = 200;
/// Convergence tolerance on |NPV|.
const IRR_NPV_TOLERANCE: f64 = 1e-7;
/// Bracket for the bisection fallback: rates in (-99%, 10_000%).
const IRR_BRACKET_LO: f64 = -0.99;
const IRR_BRACKET_HI: f64 = 100.0;

// ---------------------------------------------------------------------------
// NPV
// ---------------------------------------------------------------------------

/// Net present value of the schedule at the given per-period discount rate.
///
/// `rate <= -1.0` would put a zero or negative base under the power and is
/// rejected as invalid input.
pub fn npv(rate: f64, schedule: &CashFlowSchedule) -> Result<f64, MetricError> {
    if !rate.is_finite() || rate <= -1.0 {
        return Err(MetricError::InvalidInput {
            metric: "npv",
            reason: format!("discount rate must be finite and > -1.0, got {rate}"),
        });
    }
    if schedule.inflows.is_empty() {
        return Err(MetricError::InsufficientData { metric: "npv", needed: 1, got: 0 });
    }

    let mut acc = -schedule.initial_outlay;
    for (t, &cf) in schedule.inflows.iter().enumerate() {
        acc += cf / (1.0 + rate).powi(t as i32 + 1);
    }
    Ok(acc)
}

/// d(NPV)/d(rate) at the given rate — used by the Newton step.
fn npv_derivative(rate: f64, schedule: &CashFlowSchedule) -> f64 {
    let mut acc = 0.0;
    for (t, &cf) in schedule.inflows.iter().enumerate() {
        let period = t as f64 + 1.0;
        acc += -period * cf / (1.0 + rate).powi(t as i32 + 2);
    }
    acc
}

// ---------------------------------------------------------------------------
// IRR
// ---------------------------------------------------------------------------

/// Internal rate of return: the rate at which the schedule's NPV is zero.
///
/// Requires at least one sign change in the flow sequence; a schedule that
/// never changes sign has no IRR and is reported as insufficient data.
pub fn irr(schedule: &CashFlowSchedule) -> Result<f64, MetricError> {
    if schedule.inflows.is_empty() {
        return Err(MetricError::InsufficientData { metric: "irr", needed: 1, got: 0 });
    }
    if !schedule.has_sign_change() {
        return Err(MetricError::InsufficientData {
            metric: "irr",
            needed: 2, // at least one outflow and one opposite-signed flow
            got: 1,
        });
    }

    // Newton–Raphson from a conventional 10% seed.
    let mut rate = 0.10;
    for _ in 0..IRR_NEWTON_MAX_ITERS {
        let value = npv(rate, schedule)?;
        if value.abs() < IRR_NPV_TOLERANCE {
            return Ok(rate);
        }
        let slope = npv_derivative(rate, schedule);
        if slope.abs() < 1e-12 {
            break; // flat derivative — hand over to bisection
        }
        let next = rate - value / slope;
        if !next.is_finite() || next <= IRR_BRACKET_LO || next >= IRR_BRACKET_HI {
            break; // walked out of the bracket — hand over to bisection
        }
        rate = next;
    }

    bisect_irr(schedule)
}

/// Bisection fallback over the standard bracket.
fn bisect_irr(schedule: &CashFlowSchedule) -> Result<f64, MetricError> {
    let mut lo = IRR_BRACKET_LO;
    let mut hi = IRR_BRACKET_HI;
    let mut f_lo = npv(lo, schedule)?;
    let f_hi = npv(hi, schedule)?;

    if f_lo.signum() == f_hi.signum() {
        // No root inside the bracket.
        return Err(MetricError::NoConvergence {
            metric: "irr",
            iterations: IRR_NEWTON_MAX_ITERS,
        });
    }

    for _ in 0..IRR_BISECT_MAX_ITERS {
        let mid = (lo + hi) / 2.0;
        let f_mid = npv(mid, schedule)?;
        if f_mid.abs() < IRR_NPV_TOLERANCE || (hi - lo) / 2.0 < 1e-10 {
            return Ok(mid);
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }

    Err(MetricError::NoConvergence { metric: "irr", iterations: IRR_BISECT_MAX_ITERS })
}

// ---------------------------------------------------------------------------
// Payback period
// ---------------------------------------------------------------------------

/// Number of periods (fractional) until cumulative inflows recover the
/// initial outlay. Insufficient data when they never do.
pub fn payback_period(schedule: &CashFlowSchedule) -> Result<f64, MetricError> {
    if schedule.inflows.is_empty() {
        return Err(MetricError::InsufficientData {
            metric: "payback_period",
            needed: 1,
            got: 0,
        });
    }
    if schedule.initial_outlay <= 0.0 {
        return Ok(0.0); // nothing to recover
    }

    let mut remaining = schedule.initial_outlay;
    for (t, &cf) in schedule.inflows.iter().enumerate() {
        if cf >= remaining && cf > 0.0 {
            return Ok(t as f64 + remaining / cf);
        }
        remaining -= cf;
    }

    Err(MetricError::InsufficientData {
        metric: "payback_period",
        needed: schedule.inflows.len() + 1,
        got: schedule.inflows.len(),
    })
}

// ---------------------------------------------------------------------------
// CapitalAssessment — the aggregate record
// ---------------------------------------------------------------------------

/// NPV / IRR / payback for one schedule, with per-metric failures recorded
/// the same way [`super::ratios::RatioReport`] records them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapitalAssessment {
    pub discount_rate: f64,
    pub npv: Option<f64>,
    pub irr: Option<f64>,
    pub payback_periods: Option<f64>,
    pub failures: Vec<(String, String)>,
}

impl CapitalAssessment {
    pub fn compute(schedule: &CashFlowSchedule, discount_rate: f64) -> Self {
        let mut failures = Vec::new();
        let slot = |r: Result<f64, MetricError>, failures: &mut Vec<(String, String)>| match r {
            Ok(v) => Some(v),
            Err(e) => {
                failures.push((e.metric().to_string(), e.to_string()));
                None
            }
        };

        let npv_slot = slot(npv(discount_rate, schedule), &mut failures);
        let irr_slot = slot(irr(schedule), &mut failures);
        let payback_slot = slot(payback_period(schedule), &mut failures);

        Self {
            discount_rate,
            npv: npv_slot,
            irr: irr_slot,
            payback_periods: payback_slot,
            failures,
        }
    }

    /// `true` when NPV is positive at the assessment's discount rate.
    pub fn is_value_positive(&self) -> bool {
        self.npv.map(|v| v > 0.0).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
