use crate::analysis::EstimatorSettings;
use thiserror::Error;

/// Result alias used by the estimator entry points.
pub type LyapunovResult<T> = Result<T, LyapunovError>;

/// Errors emitted by the Lyapunov exponent estimator.
#[derive(Debug, Error)]
pub enum LyapunovError {
    /// Caller-contract violation: missing or malformed initial conditions or settings.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The iteration budget ran out before successive estimates agreed within tolerance.
    #[error(
        "Lyapunov exponents did not converge at {initial_condition:?} with tolerance={}, max_iterations={}, min_iteration_fraction={}",
        .settings.tolerance,
        .settings.max_iterations,
        .settings.min_iteration_fraction
    )]
    NonConvergence {
        initial_condition: Vec<f64>,
        settings: EstimatorSettings,
    },
    /// A tangent column vanished or became non-finite, typically because the
    /// trajectory escaped to infinity.
    #[error(
        "Tangent frame degenerated at iteration {iteration} starting from {initial_condition:?}: column norms must be finite and positive"
    )]
    DegenerateFrame {
        iteration: usize,
        initial_condition: Vec<f64>,
    },
    /// Failure reported by the map evaluator, passed through unchanged.
    #[error(transparent)]
    Evaluator(#[from] anyhow::Error),
}
