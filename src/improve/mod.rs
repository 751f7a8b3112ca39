//! # Module: improve
//!
//! The self-improvement framework — watches the artifacts the analytics layer
//! produces and closes the feedback cycle:
//!
//! ```text
//! ErrorDetector ──► LearningEngine ──► RegressionSuite ──► validate
//!      ▲                                                      │
//!      │            SnapshotRegistry ◄────────────────────────┘
//!      │                   │              (deploy / rollback)
//! FeedbackCollector ◄──────┘
//! ```
//!
//! ## Sub-modules
//! - [`detector`] — pattern / bounds / drift scanning over report artifacts
//! - [`feedback`] — typed feedback records with bounded history
//! - [`learning`] — strategy selection and typed tuning-change proposals
//! - [`regression`] — the validation check suite run before any deploy
//! - [`snapshot`] — real tuning-state snapshots, diff, and rollback
//! - [`cycle`] — the six-phase improvement-cycle state machine

pub mod detector;
pub mod feedback;
pub mod learning;
pub mod regression;
pub mod snapshot;
pub mod cycle;

/// Wall-clock milliseconds since the Unix epoch. Zero when the system clock
/// is before the epoch (never panics).
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
