use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::Partition;
use crate::optimizers::Termination;

/// Progress after one completed optimizer iteration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IterationSnapshot {
    pub run_id: Uuid,
    pub iteration: usize,
    pub training_error: f64,
    pub testing_error: Option<f64>,
    pub training_rate: Option<f64>,
    pub testing_rate: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum StopReason {
    Converged(Termination),
    Cancelled,
    Failed(String),
    /// The training partition was empty, nothing ran.
    NoData,
}

/// `resolution x resolution` samples of the first network output over the
/// square spanned by the input range, each point `(x, prediction, y)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionGrid {
    pub resolution: usize,
    pub points: Vec<[f64; 3]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub training: Partition,
    pub testing: Partition,
    pub input_range: (f64, f64),
    pub output_range: (f64, f64),
    pub label_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    IterationFinished(IterationSnapshot),
    Stopped { run_id: Uuid, reason: StopReason },
    PredictionUpdated(PredictionGrid),
    DatasetChanged(DatasetSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionMode {
    /// Compute now on the calling thread when no run is active.
    Sync,
    /// Recompute after every iteration of the current and later runs.
    Async,
}
