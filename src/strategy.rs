//! # Module: strategy
//!
//! ## Responsibility
//! Strategic assessment capabilities: typed SWOT records with a deterministic
//! text renderer, and AHP (analytic hierarchy process) pairwise-comparison
//! prioritization with a consistency check.
//!
//! ## Guarantees
//! - Bounded: a [`SwotAnalysis`] holds at most `MAX_SWOT_ENTRIES` entries
//! - Non-panicking: matrix indexing is validated; degenerate matrices are
//!   typed errors, not NaN propagation
//! - Deterministic: `render()` output depends only on entry content and order
//!
//! ## NOT Responsible For
//! - Deciding which initiatives exist (caller supplies them)
//! - Feeding results into the improvement loop (engine's concern)

use serde::{Deserialize, Serialize};

/// Hard cap on entries per analysis; oldest are never evicted — additions
/// past the cap are rejected so an analysis stays reviewable.
pub const MAX_SWOT_ENTRIES: usize = 64;

/// Saaty's random-index table for consistency ratios, indexed by n (0-based).
const AHP_RANDOM_INDEX: [f64; 11] =
    [0.0, 0.0, 0.0, 0.58, 0.90, 1.12, 1.24, 1.32, 1.41, 1.45, 1.49];

/// Consistency ratio above which a pairwise matrix is rejected.
const AHP_CR_LIMIT: f64 = 0.10;

// ---------------------------------------------------------------------------
// StrategyError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("analysis is full ({MAX_SWOT_ENTRIES} entries)")]
    AnalysisFull,

    #[error("pairwise matrix needs at least 2 criteria, got {0}")]
    TooFewCriteria(usize),

    #[error("pairwise index ({i}, {j}) out of bounds for {n} criteria")]
    IndexOutOfBounds { i: usize, j: usize, n: usize },

    #[error("pairwise weight must be finite and > 0, got {0}")]
    BadWeight(f64),

    #[error("pairwise judgments inconsistent: CR {ratio:.3} exceeds {limit:.2}")]
    Inconsistent { ratio: f64, limit: f64 },

    #[error("scores for '{initiative}' cover {got} criteria, matrix has {expected}")]
    ScoreShapeMismatch { initiative: String, expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// SWOT records
// ---------------------------------------------------------------------------

/// Which quadrant a SWOT entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwotCategory {
    Strength,
    Weakness,
    Opportunity,
    Threat,
}

impl SwotCategory {
    /// Strengths and weaknesses are internal; the rest are external.
    pub fn is_internal(self) -> bool {
        matches!(self, SwotCategory::Strength | SwotCategory::Weakness)
    }

    pub fn heading(self) -> &'static str {
        match self {
            SwotCategory::Strength    => "Strengths",
            SwotCategory::Weakness    => "Weaknesses",
            SwotCategory::Opportunity => "Opportunities",
            SwotCategory::Threat      => "Threats",
        }
    }

    pub fn all() -> [SwotCategory; 4] {
        [
            SwotCategory::Strength,
            SwotCategory::Weakness,
            SwotCategory::Opportunity,
            SwotCategory::Threat,
        ]
    }
}

impl std::fmt::Display for SwotCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwotCategory::Strength    => write!(f, "strength"),
            SwotCategory::Weakness    => write!(f, "weakness"),
            SwotCategory::Opportunity => write!(f, "opportunity"),
            SwotCategory::Threat      => write!(f, "threat"),
        }
    }
}

/// Business impact bucket for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl Impact {
    /// Numeric weight used when scoring an analysis.
    pub fn weight(self) -> f64 {
        match self {
            Impact::Low => 1.0,
            Impact::Medium => 2.0,
            Impact::High => 3.0,
        }
    }
}

/// One SWOT observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwotEntry {
    pub category: SwotCategory,
    pub summary: String,
    pub impact: Impact,
    /// How confident the author is in this observation, [0, 1].
    pub confidence: f64,
}

/// A bounded collection of SWOT entries with rendering and scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwotAnalysis {
    pub title: String,
    entries: Vec<SwotEntry>,
}

impl SwotAnalysis {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), entries: Vec::new() }
    }

    /// Add an entry. Confidence is clamped to [0, 1].
    pub fn add(&mut self, mut entry: SwotEntry) -> Result<(), StrategyError> {
        if self.entries.len() >= MAX_SWOT_ENTRIES {
            return Err(StrategyError::AnalysisFull);
        }
        entry.confidence = entry.confidence.clamp(0.0, 1.0);
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SwotEntry] {
        &self.entries
    }

    pub fn by_category(&self, category: SwotCategory) -> impl Iterator<Item = &SwotEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// Confidence-weighted favorability in [-1, 1]: strengths and
    /// opportunities count positive, weaknesses and threats negative.
    /// `None` when the analysis is empty.
    pub fn favorability(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let mut signed = 0.0;
        let mut total = 0.0;
        for e in &self.entries {
            let w = e.impact.weight() * e.confidence;
            let sign = match e.category {
                SwotCategory::Strength | SwotCategory::Opportunity => 1.0,
                SwotCategory::Weakness | SwotCategory::Threat => -1.0,
            };
            signed += sign * w;
            total += w;
        }
        if total == 0.0 {
            return Some(0.0);
        }
        Some(signed / total)
    }

    /// Render the four-quadrant text block. Sections appear in fixed order;
    /// empty quadrants render with a "none identified" line.
    pub fn render(&self) -> String {
        let mut out = format!("SWOT — {}\n", self.title);
        for category in SwotCategory::all() {
            out.push_str(&format!("\n## {}\n", category.heading()));
            let mut any = false;
            for e in self.by_category(category) {
                any = true;
                out.push_str(&format!(
                    "- [{:?}/{:.0}%] {}\n",
                    e.impact,
                    e.confidence * 100.0,
                    e.summary
                ));
            }
            if !any {
                out.push_str("- none identified\n");
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// AHP — pairwise comparison matrix
// ---------------------------------------------------------------------------

/// A reciprocal pairwise-comparison matrix over n criteria.
///
/// `set(i, j, w)` records "criterion i is w times as important as j" and
/// maintains the reciprocal at (j, i). The diagonal is fixed at 1.
#[derive(Debug, Clone)]
pub struct PairwiseMatrix {
    n: usize,
    cells: Vec<f64>,
}

impl PairwiseMatrix {
    pub fn new(n: usize) -> Result<Self, StrategyError> {
        if n < 2 {
            return Err(StrategyError::TooFewCriteria(n));
        }
        let mut cells = vec![1.0; n * n];
        for i in 0..n {
            cells[i * n + i] = 1.0;
        }
        Ok(Self { n, cells })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i >= self.n || j >= self.n {
            return None;
        }
        Some(self.cells[i * self.n + j])
    }

    /// Record a judgment and its reciprocal.
    pub fn set(&mut self, i: usize, j: usize, weight: f64) -> Result<(), StrategyError> {
        if i >= self.n || j >= self.n {
            return Err(StrategyError::IndexOutOfBounds { i, j, n: self.n });
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(StrategyError::BadWeight(weight));
        }
        if i == j {
            return Ok(()); // diagonal stays 1
        }
        self.cells[i * self.n + j] = weight;
        self.cells[j * self.n + i] = 1.0 / weight;
        Ok(())
    }

    /// Priority vector via row geometric means, normalized to sum 1.
    pub fn priorities(&self) -> Vec<f64> {
        let mut gm: Vec<f64> = (0..self.n)
            .map(|i| {
                let product: f64 = (0..self.n).map(|j| self.cells[i * self.n + j]).product();
                product.powf(1.0 / self.n as f64)
            })
            .collect();
        let total: f64 = gm.iter().sum();
        if total > 0.0 {
            for g in &mut gm {
                *g /= total;
            }
        }
        gm
    }

    /// Saaty consistency ratio. `None` when n is outside the random-index
    /// table (the table covers n ≤ 10; larger matrices should be decomposed).
    pub fn consistency_ratio(&self) -> Option<f64> {
        if self.n >= AHP_RANDOM_INDEX.len() {
            return None;
        }
        let ri = AHP_RANDOM_INDEX[self.n];
        if ri == 0.0 {
            return Some(0.0); // n ≤ 2 is always consistent
        }

        let w = self.priorities();
        // λ_max ≈ mean over i of (A·w)_i / w_i
        let mut lambda_sum = 0.0;
        for i in 0..self.n {
            let aw: f64 = (0..self.n).map(|j| self.cells[i * self.n + j] * w[j]).sum();
            if w[i] <= 0.0 {
                return Some(f64::INFINITY);
            }
            lambda_sum += aw / w[i];
        }
        let lambda_max = lambda_sum / self.n as f64;
        let ci = (lambda_max - self.n as f64) / (self.n as f64 - 1.0);
        Some(ci / ri)
    }

    /// Priorities, but only if the judgments are consistent enough.
    pub fn checked_priorities(&self) -> Result<Vec<f64>, StrategyError> {
        if let Some(ratio) = self.consistency_ratio() {
            if ratio > AHP_CR_LIMIT {
                return Err(StrategyError::Inconsistent { ratio, limit: AHP_CR_LIMIT });
            }
        }
        Ok(self.priorities())
    }
}

// ---------------------------------------------------------------------------
// Initiative ranking
// ---------------------------------------------------------------------------

/// One initiative's per-criterion scores (same order as the matrix criteria).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiativeScores {
    pub name: String,
    /// Raw scores per criterion; any non-negative scale, normalized internally.
    pub scores: Vec<f64>,
}

/// Rank initiatives by AHP composite: criterion priorities × normalized
/// per-criterion scores. Returns `(name, composite)` sorted descending.
pub fn rank_initiatives(
    criteria: &PairwiseMatrix,
    initiatives: &[InitiativeScores],
) -> Result<Vec<(String, f64)>, StrategyError> {
    let weights = criteria.checked_priorities()?;
    let n = criteria.size();

    for init in initiatives {
        if init.scores.len() != n {
            return Err(StrategyError::ScoreShapeMismatch {
                initiative: init.name.clone(),
                expected: n,
                got: init.scores.len(),
            });
        }
    }

    // Normalize each criterion column across initiatives so scales don't leak.
    let mut column_sums = vec![0.0f64; n];
    for init in initiatives {
        for (c, &s) in init.scores.iter().enumerate() {
            column_sums[c] += s.max(0.0);
        }
    }

    let mut ranked: Vec<(String, f64)> = initiatives
        .iter()
        .map(|init| {
            let composite: f64 = init
                .scores
                .iter()
                .enumerate()
                .map(|(c, &s)| {
                    let norm = if column_sums[c] > 0.0 { s.max(0.0) / column_sums[c] } else { 0.0 };
                    weights[c] * norm
                })
                .sum();
            (init.name.clone(), composite)
        })
        .collect();

    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(ranked)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(category: SwotCategory, impact: Impact, confidence: f64) -> SwotEntry {
        SwotEntry { category, summary: "x".into(), impact, confidence }
    }

    // ===== SwotAnalysis =====

    #[test]
    fn test_swot_add_and_partition() {
        let mut a = SwotAnalysis::new("Q3");
        a.add(entry(SwotCategory::Strength, Impact::High, 0.9)).unwrap();
        a.add(entry(SwotCategory::Threat, Impact::Low, 0.5)).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.by_category(SwotCategory::Strength).count(), 1);
        assert_eq!(a.by_category(SwotCategory::Opportunity).count(), 0);
    }

    #[test]
    fn test_swot_cap_enforced() {
        let mut a = SwotAnalysis::new("cap");
        for _ in 0..MAX_SWOT_ENTRIES {
            a.add(entry(SwotCategory::Strength, Impact::Low, 1.0)).unwrap();
        }
        assert_eq!(
            a.add(entry(SwotCategory::Strength, Impact::Low, 1.0)),
            Err(StrategyError::AnalysisFull)
        );
    }

    #[test]
    fn test_swot_confidence_clamped() {
        let mut a = SwotAnalysis::new("clamp");
        a.add(entry(SwotCategory::Strength, Impact::High, 7.0)).unwrap();
        assert_eq!(a.entries()[0].confidence, 1.0);
    }

    #[test]
    fn test_favorability_empty_is_none() {
        assert_eq!(SwotAnalysis::new("e").favorability(), None);
    }

    #[test]
    fn test_favorability_all_positive_is_one() {
        let mut a = SwotAnalysis::new("p");
        a.add(entry(SwotCategory::Strength, Impact::High, 1.0)).unwrap();
        a.add(entry(SwotCategory::Opportunity, Impact::Low, 1.0)).unwrap();
        assert!((a.favorability().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_favorability_balanced_is_zero() {
        let mut a = SwotAnalysis::new("b");
        a.add(entry(SwotCategory::Strength, Impact::Medium, 0.8)).unwrap();
        a.add(entry(SwotCategory::Threat, Impact::Medium, 0.8)).unwrap();
        assert!(a.favorability().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_render_has_all_four_headings() {
        let mut a = SwotAnalysis::new("r");
        a.add(entry(SwotCategory::Weakness, Impact::High, 0.7)).unwrap();
        let text = a.render();
        for heading in ["Strengths", "Weaknesses", "Opportunities", "Threats"] {
            assert!(text.contains(heading), "missing {heading}");
        }
        assert!(text.contains("none identified"));
    }

    #[test]
    fn test_render_deterministic() {
        let mut a = SwotAnalysis::new("d");
        a.add(entry(SwotCategory::Strength, Impact::High, 0.9)).unwrap();
        assert_eq!(a.render(), a.render());
    }

    // ===== PairwiseMatrix =====

    #[test]
    fn test_matrix_too_small_rejected() {
        assert!(matches!(PairwiseMatrix::new(1), Err(StrategyError::TooFewCriteria(1))));
    }

    #[test]
    fn test_matrix_set_maintains_reciprocal() {
        let mut m = PairwiseMatrix::new(3).unwrap();
        m.set(0, 1, 4.0).unwrap();
        assert_eq!(m.get(0, 1), Some(4.0));
        assert!((m.get(1, 0).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_bad_weight_rejected() {
        let mut m = PairwiseMatrix::new(2).unwrap();
        assert!(matches!(m.set(0, 1, 0.0), Err(StrategyError::BadWeight(_))));
        assert!(matches!(m.set(0, 1, f64::NAN), Err(StrategyError::BadWeight(_))));
    }

    #[test]
    fn test_matrix_out_of_bounds_rejected() {
        let mut m = PairwiseMatrix::new(2).unwrap();
        assert!(matches!(m.set(0, 5, 2.0), Err(StrategyError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_priorities_sum_to_one() {
        let mut m = PairwiseMatrix::new(3).unwrap();
        m.set(0, 1, 3.0).unwrap();
        m.set(0, 2, 5.0).unwrap();
        m.set(1, 2, 2.0).unwrap();
        let p = m.priorities();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // Criterion 0 dominates both others, so it must rank first.
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_identity_matrix_uniform_priorities() {
        let m = PairwiseMatrix::new(4).unwrap();
        let p = m.priorities();
        for w in p {
            assert!((w - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_consistent_matrix_low_cr() {
        // Perfectly consistent: a=2b, b=2c ⇒ a=4c.
        let mut m = PairwiseMatrix::new(3).unwrap();
        m.set(0, 1, 2.0).unwrap();
        m.set(1, 2, 2.0).unwrap();
        m.set(0, 2, 4.0).unwrap();
        let cr = m.consistency_ratio().unwrap();
        assert!(cr < 0.01, "cr={cr}");
        assert!(m.checked_priorities().is_ok());
    }

    #[test]
    fn test_inconsistent_matrix_rejected() {
        // Circular judgments: a>b, b>c, but c>a strongly.
        let mut m = PairwiseMatrix::new(3).unwrap();
        m.set(0, 1, 9.0).unwrap();
        m.set(1, 2, 9.0).unwrap();
        m.set(2, 0, 9.0).unwrap();
        assert!(matches!(m.checked_priorities(), Err(StrategyError::Inconsistent { .. })));
    }

    // ===== rank_initiatives =====

    #[test]
    fn test_rank_orders_by_composite() {
        let mut m = PairwiseMatrix::new(2).unwrap();
        m.set(0, 1, 3.0).unwrap(); // criterion 0 three times as important
        let ranked = rank_initiatives(
            &m,
            &[
                InitiativeScores { name: "wins-on-minor".into(), scores: vec![1.0, 10.0] },
                InitiativeScores { name: "wins-on-major".into(), scores: vec![10.0, 1.0] },
            ],
        )
        .unwrap();
        assert_eq!(ranked[0].0, "wins-on-major");
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn test_rank_shape_mismatch_rejected() {
        let m = PairwiseMatrix::new(3).unwrap();
        let err = rank_initiatives(
            &m,
            &[InitiativeScores { name: "short".into(), scores: vec![1.0] }],
        )
        .unwrap_err();
        assert!(matches!(err, StrategyError::ScoreShapeMismatch { .. }));
    }

    #[test]
    fn test_rank_empty_initiatives_is_empty() {
        let m = PairwiseMatrix::new(2).unwrap();
        assert!(rank_initiatives(&m, &[]).unwrap().is_empty());
    }
}
