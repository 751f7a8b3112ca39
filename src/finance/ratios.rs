//! Textbook ratio calculators over [`BalanceSheet`] / [`IncomeStatement`]
//! pairs, plus OEE over an [`EquipmentLog`].
//!
//! Every function is a pure `Result`-returning computation. The aggregate
//! [`RatioReport`] records per-metric failures instead of aborting the whole
//! battery, so one zero denominator does not blank out an entire report.

use serde::{Deserialize, Serialize};

use super::statements::{BalanceSheet, EquipmentLog, IncomeStatement};
use super::{guarded_div, MetricError};

// ---------------------------------------------------------------------------
// Liquidity
// ---------------------------------------------------------------------------

/// Current assets over current liabilities.
pub fn current_ratio(bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("current_ratio", bs.current_assets, bs.current_liabilities, "current_liabilities")
}

/// (Current assets − inventory) over current liabilities.
pub fn quick_ratio(bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div(
        "quick_ratio",
        bs.current_assets - bs.inventory,
        bs.current_liabilities,
        "current_liabilities",
    )
}

/// Cash and equivalents over current liabilities.
pub fn cash_ratio(bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("cash_ratio", bs.cash_and_equivalents, bs.current_liabilities, "current_liabilities")
}

// ---------------------------------------------------------------------------
// Profitability
// ---------------------------------------------------------------------------

/// (Revenue − COGS) over revenue.
pub fn gross_margin(is: &IncomeStatement) -> Result<f64, MetricError> {
    guarded_div("gross_margin", is.revenue - is.cost_of_goods_sold, is.revenue, "revenue")
}

/// Operating income over revenue.
pub fn operating_margin(is: &IncomeStatement) -> Result<f64, MetricError> {
    guarded_div("operating_margin", is.operating_income, is.revenue, "revenue")
}

/// Net income over revenue.
pub fn net_profit_margin(is: &IncomeStatement) -> Result<f64, MetricError> {
    guarded_div("net_profit_margin", is.net_income, is.revenue, "revenue")
}

/// Net income over total assets.
pub fn return_on_assets(is: &IncomeStatement, bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("return_on_assets", is.net_income, bs.total_assets, "total_assets")
}

/// Net income over shareholders' equity.
pub fn return_on_equity(is: &IncomeStatement, bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("return_on_equity", is.net_income, bs.shareholders_equity, "shareholders_equity")
}

// ---------------------------------------------------------------------------
// Leverage
// ---------------------------------------------------------------------------

/// Total liabilities over shareholders' equity.
pub fn debt_to_equity(bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("debt_to_equity", bs.total_liabilities, bs.shareholders_equity, "shareholders_equity")
}

/// Total liabilities over total assets.
pub fn debt_ratio(bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("debt_ratio", bs.total_liabilities, bs.total_assets, "total_assets")
}

/// Operating income over interest expense.
pub fn interest_coverage(is: &IncomeStatement) -> Result<f64, MetricError> {
    guarded_div("interest_coverage", is.operating_income, is.interest_expense, "interest_expense")
}

// ---------------------------------------------------------------------------
// Efficiency
// ---------------------------------------------------------------------------

/// Revenue over total assets.
pub fn asset_turnover(is: &IncomeStatement, bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("asset_turnover", is.revenue, bs.total_assets, "total_assets")
}

/// COGS over inventory.
pub fn inventory_turnover(is: &IncomeStatement, bs: &BalanceSheet) -> Result<f64, MetricError> {
    guarded_div("inventory_turnover", is.cost_of_goods_sold, bs.inventory, "inventory")
}

// ---------------------------------------------------------------------------
// OEE — availability × performance × quality
// ---------------------------------------------------------------------------

/// Run time over planned time.
pub fn oee_availability(log: &EquipmentLog) -> Result<f64, MetricError> {
    guarded_div("oee_availability", log.run_time_hours(), log.planned_time_hours, "planned_time_hours")
}

/// (Ideal cycle time × total units) over run time.
pub fn oee_performance(log: &EquipmentLog) -> Result<f64, MetricError> {
    guarded_div(
        "oee_performance",
        log.ideal_cycle_time_hours * log.total_units,
        log.run_time_hours(),
        "run_time_hours",
    )
}

/// Good units over total units.
pub fn oee_quality(log: &EquipmentLog) -> Result<f64, MetricError> {
    guarded_div("oee_quality", log.good_units, log.total_units, "total_units")
}

/// Overall equipment effectiveness: the product of the three sub-factors.
pub fn oee(log: &EquipmentLog) -> Result<f64, MetricError> {
    Ok(oee_availability(log)? * oee_performance(log)? * oee_quality(log)?)
}

// ---------------------------------------------------------------------------
// RatioReport — the full battery over one statement pair
// ---------------------------------------------------------------------------

/// One computed slot in a [`RatioReport`]: the value when the calculator
/// succeeded, `None` plus an entry in `failures` when it did not.
pub type RatioSlot = Option<f64>;

/// The full ratio battery for one balance-sheet / income-statement pair.
///
/// Failed metrics are `None` in their slot and recorded in `failures` with
/// the error text, so a caller (or the error detector) can see exactly which
/// metric failed and why without losing the rest of the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatioReport {
    pub current_ratio: RatioSlot,
    pub quick_ratio: RatioSlot,
    pub cash_ratio: RatioSlot,
    pub gross_margin: RatioSlot,
    pub operating_margin: RatioSlot,
    pub net_profit_margin: RatioSlot,
    pub return_on_assets: RatioSlot,
    pub return_on_equity: RatioSlot,
    pub debt_to_equity: RatioSlot,
    pub debt_ratio: RatioSlot,
    pub interest_coverage: RatioSlot,
    pub asset_turnover: RatioSlot,
    pub inventory_turnover: RatioSlot,
    /// `(metric_name, error_text)` for every slot that is `None`.
    pub failures: Vec<(String, String)>,
}

impl RatioReport {
    /// Compute every ratio, collecting failures instead of short-circuiting.
    pub fn compute(bs: &BalanceSheet, is: &IncomeStatement) -> Self {
        let mut report = RatioReport::default();

        let slot = |r: Result<f64, MetricError>, failures: &mut Vec<(String, String)>| match r {
            Ok(v) => Some(v),
            Err(e) => {
                failures.push((e.metric().to_string(), e.to_string()));
                None
            }
        };

        let mut failures = Vec::new();
        report.current_ratio = slot(current_ratio(bs), &mut failures);
        report.quick_ratio = slot(quick_ratio(bs), &mut failures);
        report.cash_ratio = slot(cash_ratio(bs), &mut failures);
        report.gross_margin = slot(gross_margin(is), &mut failures);
        report.operating_margin = slot(operating_margin(is), &mut failures);
        report.net_profit_margin = slot(net_profit_margin(is), &mut failures);
        report.return_on_assets = slot(return_on_assets(is, bs), &mut failures);
        report.return_on_equity = slot(return_on_equity(is, bs), &mut failures);
        report.debt_to_equity = slot(debt_to_equity(bs), &mut failures);
        report.debt_ratio = slot(debt_ratio(bs), &mut failures);
        report.interest_coverage = slot(interest_coverage(is), &mut failures);
        report.asset_turnover = slot(asset_turnover(is, bs), &mut failures);
        report.inventory_turnover = slot(inventory_turnover(is, bs), &mut failures);
        report.failures = failures;
        report
    }

    /// Number of slots that computed successfully.
    pub fn computed_count(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    /// Number of slots that failed.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// All slots in declaration order, for iteration.
    pub fn slots(&self) -> [RatioSlot; 13] {
        [
            self.current_ratio,
            self.quick_ratio,
            self.cash_ratio,
            self.gross_margin,
            self.operating_margin,
            self.net_profit_margin,
            self.return_on_assets,
            self.return_on_equity,
            self.debt_to_equity,
            self.debt_ratio,
            self.interest_coverage,
            self.asset_turnover,
            self.inventory_turnover,
        ]
    }

    /// Named `(metric, value)` pairs for the slots that computed, in
    /// declaration order — the shape the error detector's bounds rules scan.
    pub fn named_values(&self) -> Vec<(&'static str, f64)> {
        const NAMES: [&str; 13] = [
            "current_ratio",
            "quick_ratio",
            "cash_ratio",
            "gross_margin",
            "operating_margin",
            "net_profit_margin",
            "return_on_assets",
            "return_on_equity",
            "debt_to_equity",
            "debt_ratio",
            "interest_coverage",
            "asset_turnover",
            "inventory_turnover",
        ];
        NAMES
            .iter()
            .zip(self.slots())
            .filter_map(|(name, slot)| slot.map(|v| (*name, v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
