//! # Module: compliance
//!
//! ## Responsibility
//! Compliance scorecards: a weighted score over a checklist of typed
//! controls, with per-domain sub-scores and a coverage figure.
//!
//! ## Guarantees
//! - Non-panicking: empty or fully-unassessed checklists are typed errors
//! - Weighted: `Partial` counts half; `NotAssessed` is excluded from the
//!   denominator rather than silently counted as failed

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ComplianceError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComplianceError {
    #[error("checklist is empty")]
    EmptyChecklist,

    #[error("no control has been assessed yet")]
    NothingAssessed,

    #[error("control '{id}' has non-positive weight {weight}")]
    BadWeight { id: String, weight: f64 },
}

// ---------------------------------------------------------------------------
// Control records
// ---------------------------------------------------------------------------

/// Assessment outcome for one control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlStatus {
    Satisfied,
    Partial,
    Failed,
    NotAssessed,
}

impl ControlStatus {
    /// Score contribution in [0, 1]. `None` for unassessed controls, which
    /// do not enter the score at all.
    pub fn score(self) -> Option<f64> {
        match self {
            ControlStatus::Satisfied => Some(1.0),
            ControlStatus::Partial => Some(0.5),
            ControlStatus::Failed => Some(0.0),
            ControlStatus::NotAssessed => None,
        }
    }
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlStatus::Satisfied   => write!(f, "satisfied"),
            ControlStatus::Partial     => write!(f, "partial"),
            ControlStatus::Failed      => write!(f, "failed"),
            ControlStatus::NotAssessed => write!(f, "not_assessed"),
        }
    }
}

/// One checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceControl {
    /// Stable identifier, e.g. "AC-2" or "SOX-404-1".
    pub id: String,
    pub title: String,
    /// Grouping key for sub-scores, e.g. "access-control", "reporting".
    pub domain: String,
    /// Relative importance; must be > 0.
    pub weight: f64,
    pub status: ControlStatus,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Scorecard
// ---------------------------------------------------------------------------

/// The computed scorecard for one checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    /// Weighted score over assessed controls, [0, 1].
    pub overall: f64,
    /// Weighted sub-score per domain (assessed controls only).
    pub by_domain: BTreeMap<String, f64>,
    /// Fraction of controls that have been assessed, [0, 1].
    pub coverage: f64,
    /// IDs of controls with `Failed` status, in checklist order.
    pub failed_controls: Vec<String>,
    pub control_count: usize,
}

impl Scorecard {
    /// Compute the scorecard.
    ///
    /// # Errors
    /// - [`ComplianceError::EmptyChecklist`] for an empty slice
    /// - [`ComplianceError::NothingAssessed`] when every control is `NotAssessed`
    /// - [`ComplianceError::BadWeight`] on a non-positive weight
    pub fn compute(controls: &[ComplianceControl]) -> Result<Self, ComplianceError> {
        if controls.is_empty() {
            return Err(ComplianceError::EmptyChecklist);
        }
        for c in controls {
            if !(c.weight > 0.0) {
                return Err(ComplianceError::BadWeight { id: c.id.clone(), weight: c.weight });
            }
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut assessed = 0usize;
        let mut failed_controls = Vec::new();
        let mut domain_sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();

        for c in controls {
            if c.status == ControlStatus::Failed {
                failed_controls.push(c.id.clone());
            }
            let Some(score) = c.status.score() else { continue };
            assessed += 1;
            weighted_sum += score * c.weight;
            weight_total += c.weight;
            let entry = domain_sums.entry(c.domain.clone()).or_insert((0.0, 0.0));
            entry.0 += score * c.weight;
            entry.1 += c.weight;
        }

        if assessed == 0 {
            return Err(ComplianceError::NothingAssessed);
        }

        let by_domain = domain_sums
            .into_iter()
            .map(|(domain, (sum, total))| (domain, if total > 0.0 { sum / total } else { 0.0 }))
            .collect();

        Ok(Scorecard {
            overall: weighted_sum / weight_total,
            by_domain,
            coverage: assessed as f64 / controls.len() as f64,
            failed_controls,
            control_count: controls.len(),
        })
    }

    /// `true` when no control failed and overall meets `threshold`.
    pub fn passes(&self, threshold: f64) -> bool {
        self.failed_controls.is_empty() && self.overall >= threshold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
