//! # Stage: Tuning Snapshots
//!
//! ## Responsibility
//! Versioned history of the engine's tunable state. Every deploy, rollback,
//! or manual override commits a full copy of [`EngineTuning`] as a parameter
//! map, together with what triggered it. Rollback re-commits a prior map and
//! hands the restored tuning back to the caller — the backup is the state,
//! not a log line about the state.
//!
//! ## Guarantees
//! - Bounded: history is capped at `capacity` entries (oldest evicted first)
//! - Non-panicking: lookups return `Option` / `Result`
//! - Thread-safe usage: wrap in `Arc<Mutex<SnapshotRegistry>>`
//!
//! ## NOT Responsible For
//! - Deciding when to roll back (cycle orchestrator)
//! - Validating a tuning before it is committed (regression suite)

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

/// Full parameter map captured at one instant.
pub type ParamMap = HashMap<String, f64>;

// ---------------------------------------------------------------------------
// SnapshotError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot {0} not found")]
    NotFound(u64),

    #[error("parameter map missing key '{0}'")]
    MissingKey(&'static str),
}

// ---------------------------------------------------------------------------
// EngineTuning — the state that snapshots protect
// ---------------------------------------------------------------------------

/// The engine's tunable parameters. This is the real state improvement
/// cycles adjust, snapshot before changing, and restore on rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Validation score a cycle must reach to deploy, [0, 1].
    pub validation_threshold: f64,
    /// Detected errors required before a cycle may trigger.
    pub min_error_threshold: u32,
    /// Tolerance used by the regression suite when comparing ratios.
    pub ratio_tolerance: f64,
    /// Drift-detector window (number of cycle scores).
    pub drift_window: u32,
    /// Admission cap on concurrently active cycles.
    pub max_active_cycles: u32,
    /// Per-cycle wall-clock timeout in milliseconds.
    pub cycle_timeout_ms: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            validation_threshold: 0.7,
            min_error_threshold: 3,
            ratio_tolerance: 1e-3,
            drift_window: 10,
            max_active_cycles: 2,
            cycle_timeout_ms: 30_000,
        }
    }
}

impl EngineTuning {
    const KEYS: [&'static str; 6] = [
        "validation_threshold",
        "min_error_threshold",
        "ratio_tolerance",
        "drift_window",
        "max_active_cycles",
        "cycle_timeout_ms",
    ];

    /// Project into the string-keyed map the registry stores.
    pub fn as_param_map(&self) -> ParamMap {
        HashMap::from([
            ("validation_threshold".to_string(), self.validation_threshold),
            ("min_error_threshold".to_string(), self.min_error_threshold as f64),
            ("ratio_tolerance".to_string(), self.ratio_tolerance),
            ("drift_window".to_string(), self.drift_window as f64),
            ("max_active_cycles".to_string(), self.max_active_cycles as f64),
            ("cycle_timeout_ms".to_string(), self.cycle_timeout_ms as f64),
        ])
    }

    /// Rebuild from a stored map. Every key must be present — a snapshot
    /// with missing keys is corrupt, not defaultable.
    pub fn from_param_map(map: &ParamMap) -> Result<Self, SnapshotError> {
        let get = |key: &'static str| -> Result<f64, SnapshotError> {
            map.get(key).copied().ok_or(SnapshotError::MissingKey(key))
        };
        Ok(Self {
            validation_threshold: get(Self::KEYS[0])?,
            min_error_threshold: get(Self::KEYS[1])? as u32,
            ratio_tolerance: get(Self::KEYS[2])?,
            drift_window: get(Self::KEYS[3])? as u32,
            max_active_cycles: get(Self::KEYS[4])? as u32,
            cycle_timeout_ms: get(Self::KEYS[5])? as u64,
        })
    }

    /// Apply a single named delta, clamping to each parameter's legal range.
    /// Unknown names are ignored and reported as `false`.
    pub fn apply_change(&mut self, param: &str, value: f64) -> bool {
        match param {
            "validation_threshold" => self.validation_threshold = value.clamp(0.0, 1.0),
            "min_error_threshold" => self.min_error_threshold = value.max(1.0) as u32,
            "ratio_tolerance" => self.ratio_tolerance = value.clamp(1e-9, 1.0),
            "drift_window" => self.drift_window = value.clamp(2.0, 1_000.0) as u32,
            "max_active_cycles" => self.max_active_cycles = value.clamp(1.0, 64.0) as u32,
            "cycle_timeout_ms" => self.cycle_timeout_ms = value.max(100.0) as u64,
            _ => return false,
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ChangeSource
// ---------------------------------------------------------------------------

/// What triggered a snapshot commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSource {
    /// Engine startup baseline.
    Initial,
    /// Backup taken when a cycle is admitted, before any change.
    CycleBackup { cycle_id: Uuid },
    /// A validated improvement cycle deployed its changes.
    CycleDeploy { cycle_id: Uuid },
    /// A failed cycle restored the pre-cycle state.
    Rollback { to_snapshot: u64 },
    /// A human override.
    Manual { operator: String },
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeSource::Initial => write!(f, "initial"),
            ChangeSource::CycleBackup { cycle_id } => write!(f, "cycle-backup:{cycle_id}"),
            ChangeSource::CycleDeploy { cycle_id } => write!(f, "cycle-deploy:{cycle_id}"),
            ChangeSource::Rollback { to_snapshot } => write!(f, "rollback:{to_snapshot}"),
            ChangeSource::Manual { operator } => write!(f, "manual:{operator}"),
        }
    }
}

// ---------------------------------------------------------------------------
// TuningSnapshot + diff
// ---------------------------------------------------------------------------

/// An immutable point-in-time copy of the tuning state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningSnapshot {
    /// Monotonically increasing identifier (1-based).
    pub id: u64,
    pub timestamp_ms: u64,
    pub source: ChangeSource,
    pub params: ParamMap,
    pub note: Option<String>,
}

/// One changed parameter between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDiff {
    pub name: String,
    pub before: f64,
    pub after: f64,
}

impl ParamDiff {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

impl TuningSnapshot {
    /// Parameters that differ between `self` (before) and `other` (after),
    /// sorted by name. Keys missing on one side diff against 0.
    pub fn diff_to(&self, other: &TuningSnapshot) -> Vec<ParamDiff> {
        let mut changes = Vec::new();
        for (name, &after) in &other.params {
            let before = self.params.get(name).copied().unwrap_or(0.0);
            if (after - before).abs() > f64::EPSILON {
                changes.push(ParamDiff { name: name.clone(), before, after });
            }
        }
        for (name, &before) in &self.params {
            if !other.params.contains_key(name) {
                changes.push(ParamDiff { name: name.clone(), before, after: 0.0 });
            }
        }
        changes.sort_by(|a, b| a.name.cmp(&b.name));
        changes
    }
}

// ---------------------------------------------------------------------------
// SnapshotRegistry
// ---------------------------------------------------------------------------

/// Bounded, append-only history of tuning snapshots.
pub struct SnapshotRegistry {
    history: VecDeque<TuningSnapshot>,
    capacity: usize,
    next_id: u64,
}

impl SnapshotRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    fn evict_if_full(&mut self) {
        while self.history.len() >= self.capacity {
            self.history.pop_front();
        }
    }

    /// Record a snapshot of `tuning`. Returns the snapshot ID.
    pub fn commit(
        &mut self,
        tuning: &EngineTuning,
        source: ChangeSource,
        note: Option<String>,
    ) -> u64 {
        self.evict_if_full();
        let id = self.next_id;
        self.next_id += 1;
        self.history.push_back(TuningSnapshot {
            id,
            timestamp_ms: now_ms(),
            source,
            params: tuning.as_param_map(),
            note,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Linear scan — history is small (≤ capacity).
    pub fn get(&self, id: u64) -> Option<&TuningSnapshot> {
        self.history.iter().find(|s| s.id == id)
    }

    pub fn latest(&self) -> Option<&TuningSnapshot> {
        self.history.back()
    }

    pub fn all(&self) -> impl Iterator<Item = &TuningSnapshot> {
        self.history.iter()
    }

    /// Diff between two snapshots by ID. `None` when either is missing.
    pub fn diff(&self, from_id: u64, to_id: u64) -> Option<Vec<ParamDiff>> {
        Some(self.get(from_id)?.diff_to(self.get(to_id)?))
    }

    /// Restore the state captured in `target_id`: re-commit its parameter
    /// map under `source` and return the rebuilt [`EngineTuning`] so the
    /// caller can actually install it.
    pub fn rollback_to(
        &mut self,
        target_id: u64,
        source: ChangeSource,
    ) -> Result<EngineTuning, SnapshotError> {
        let params = self
            .get(target_id)
            .map(|s| s.params.clone())
            .ok_or(SnapshotError::NotFound(target_id))?;

        let restored = EngineTuning::from_param_map(&params)?;
        let note = Some(format!("restored snapshot {target_id}"));
        self.commit(&restored, source, note);
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
