//! Crate-level error roll-up. Each subsystem keeps its own error enum;
//! this type exists so callers holding results from several subsystems can
//! carry one error type with `?`.

use crate::compliance::ComplianceError;
use crate::config::ConfigError;
use crate::finance::MetricError;
use crate::improve::cycle::CycleError;
use crate::improve::snapshot::SnapshotError;
use crate::strategy::StrategyError;

#[derive(Debug, thiserror::Error)]
pub enum BizOpsError {
    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_error_converts() {
        fn inner() -> Result<f64, BizOpsError> {
            Err(MetricError::DivisionByZero { metric: "m", denominator: "d" })?
        }
        let err = inner().unwrap_err();
        assert!(matches!(err, BizOpsError::Metric(_)));
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_cycle_error_converts() {
        let err: BizOpsError = CycleError::AtCapacity { active: 2, cap: 2 }.into();
        assert!(err.to_string().contains("admission cap"));
    }
}
