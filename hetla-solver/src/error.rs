use hetla_core::CoreError;
use thiserror::Error;

/// Recoverable solver-side failures. Lifecycle misuse (building twice,
/// solving before building) is a contract violation instead.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
