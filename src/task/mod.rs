mod config;
mod controller;
mod events;
mod learn;

pub use config::{LayerDesc, LayerRole, LearnParam};
pub use controller::Controller;
pub use events::{
    DatasetSummary, IterationSnapshot, PredictionGrid, PredictionMode, StopReason, TrainingEvent,
};
pub use learn::{classification_rate, predict_grid, LearnTask};
