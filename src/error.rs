use ndarray::ShapeError;
use ndarray_rand::rand_distr::NormalError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClossError>;

#[derive(Debug, Error)]
pub enum ClossError {
    /// `step()` was called before both the optimizable and the stop criteria were set.
    #[error("optimizer is not configured, call set_optimizable and set_stop_criteria first")]
    Unconfigured,

    /// Internal inconsistency in the nonlinear least-squares solver.
    #[error("solver failure: {0}")]
    Solver(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid data: {0}")]
    Data(String),

    #[error("shape mismatch: {0}")]
    Shape(#[from] ShapeError),

    #[error("invalid weight distribution: {0}")]
    Distribution(#[from] NormalError),

    #[error("binary (de)serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
