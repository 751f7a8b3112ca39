//! # Module: finance
//!
//! Typed financial-statement inputs and the metric calculators that read them.
//!
//! ## Sub-modules
//! - [`statements`] — input records (balance sheet, income statement, cash flows)
//! - [`ratios`] — liquidity / profitability / leverage / efficiency ratios, OEE
//! - [`capital`] — capital budgeting: NPV, IRR, payback period
//!
//! All calculators return `Result<f64, MetricError>`; a zero denominator is an
//! error value, never a panic and never a silent `0.0`.

pub mod statements;
pub mod ratios;
pub mod capital;

pub use statements::{BalanceSheet, CashFlowSchedule, EquipmentLog, IncomeStatement};

// ---------------------------------------------------------------------------
// MetricError
// ---------------------------------------------------------------------------

/// Why a metric could not be computed.
///
/// Callers can distinguish "invalid input" from "no data" from "the numeric
/// method failed" instead of receiving a uniform zero.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The metric's denominator was zero (e.g. `current_liabilities == 0`).
    #[error("{metric}: division by zero ({denominator} is 0)")]
    DivisionByZero {
        metric: &'static str,
        denominator: &'static str,
    },

    /// An input was NaN, infinite, or outside its legal domain.
    #[error("{metric}: invalid input — {reason}")]
    InvalidInput {
        metric: &'static str,
        reason: String,
    },

    /// The iterative solver did not converge within its iteration cap.
    #[error("{metric}: no convergence after {iterations} iterations")]
    NoConvergence {
        metric: &'static str,
        iterations: u32,
    },

    /// Not enough data points to compute the metric.
    #[error("{metric}: insufficient data (needed {needed}, got {got})")]
    InsufficientData {
        metric: &'static str,
        needed: usize,
        got: usize,
    },
}

impl MetricError {
    /// The metric name this error belongs to.
    pub fn metric(&self) -> &'static str {
        match self {
            MetricError::DivisionByZero { metric, .. } => metric,
            MetricError::InvalidInput { metric, .. } => metric,
            MetricError::NoConvergence { metric, .. } => metric,
            MetricError::InsufficientData { metric, .. } => metric,
        }
    }
}

/// Guard a ratio `numerator / denominator` for the named metric.
///
/// Returns `DivisionByZero` when the denominator is exactly zero and
/// `InvalidInput` when either side is non-finite.
pub(crate) fn guarded_div(
    metric: &'static str,
    numerator: f64,
    denominator: f64,
    denominator_name: &'static str,
) -> Result<f64, MetricError> {
    if !numerator.is_finite() || !denominator.is_finite() {
        return Err(MetricError::InvalidInput {
            metric,
            reason: format!("non-finite operand ({numerator} / {denominator})"),
        });
    }
    if denominator == 0.0 {
        return Err(MetricError::DivisionByZero { metric, denominator: denominator_name });
    }
    Ok(numerator / denominator)
}
