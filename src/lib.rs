mod activation;
pub mod dataset;
mod error;
pub mod f;
pub mod layers;
mod loss;
pub mod nn;
pub mod optimizers;
pub mod task;
mod util;

pub use activation::{Activation, Activations};
pub use error::{ClossError, Result};
pub use loss::{Closs, Loss, Losses, MSE};
pub use nn::Network;
pub use task::{Controller, LearnParam, TrainingEvent};
pub use util::clock_seed;
