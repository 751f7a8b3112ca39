//! Business-operations analytics with a self-improvement loop.
//!
//! The [`engine::BusinessOpsEngine`] coordinator runs typed financial,
//! strategic, and compliance assessments and watches its own output for
//! errors. Past a configurable error threshold it runs six-phase
//! improvement cycles that tune the engine's own parameters under
//! regression-gated deploy/rollback.

pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod finance;
pub mod improve;
pub mod strategy;

pub use config::EngineConfig;
pub use engine::{BusinessOpsEngine, OperationsReport, ReportInput, StrategicReview};
pub use error::BizOpsError;

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to `info`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
