//! Input records for the metric calculators.
//!
//! These are the typed replacements for loosely-keyed dictionaries: every
//! figure a calculator reads is a named field, so a missing number is a
//! compile error rather than a runtime `get(key, default)` guess.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BalanceSheet
// ---------------------------------------------------------------------------

/// Point-in-time balance sheet figures, in USD.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub current_assets: f64,
    pub inventory: f64,
    pub cash_and_equivalents: f64,
    pub total_assets: f64,
    pub current_liabilities: f64,
    pub total_liabilities: f64,
    pub shareholders_equity: f64,
}

// ---------------------------------------------------------------------------
// IncomeStatement
// ---------------------------------------------------------------------------

/// Period income statement figures, in USD.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub revenue: f64,
    pub cost_of_goods_sold: f64,
    pub operating_income: f64,
    pub interest_expense: f64,
    pub net_income: f64,
}

// ---------------------------------------------------------------------------
// CashFlowSchedule
// ---------------------------------------------------------------------------

/// A project cash-flow schedule: one initial outlay followed by one inflow
/// per period. Inflows may be negative (further investment).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CashFlowSchedule {
    /// Money out at t=0, stored as a positive magnitude.
    pub initial_outlay: f64,
    /// Net cash flow for periods 1..=n.
    pub inflows: Vec<f64>,
}

impl CashFlowSchedule {
    pub fn new(initial_outlay: f64, inflows: Vec<f64>) -> Self {
        Self { initial_outlay, inflows }
    }

    /// Number of periods after t=0.
    pub fn periods(&self) -> usize {
        self.inflows.len()
    }

    /// Undiscounted sum of all flows including the outlay.
    pub fn net_total(&self) -> f64 {
        self.inflows.iter().sum::<f64>() - self.initial_outlay
    }

    /// `true` when the signed flow sequence changes sign at least once —
    /// a prerequisite for IRR to exist.
    pub fn has_sign_change(&self) -> bool {
        let mut prev = -self.initial_outlay;
        for &cf in &self.inflows {
            if prev != 0.0 && cf != 0.0 && prev.signum() != cf.signum() {
                return true;
            }
            if cf != 0.0 {
                prev = cf;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// EquipmentLog
// ---------------------------------------------------------------------------

/// Production-run figures for one piece of equipment, used by the OEE
/// calculation. Times are in hours, counts in units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EquipmentLog {
    /// Scheduled production time.
    pub planned_time_hours: f64,
    /// Unplanned stops within the planned time.
    pub downtime_hours: f64,
    /// Theoretical fastest time to produce one unit.
    pub ideal_cycle_time_hours: f64,
    /// Total units started.
    pub total_units: f64,
    /// Units that passed quality checks.
    pub good_units: f64,
}

impl EquipmentLog {
    /// Actual run time (planned minus downtime), floored at zero.
    pub fn run_time_hours(&self) -> f64 {
        (self.planned_time_hours - self.downtime_hours).max(0.0)
    }
}
