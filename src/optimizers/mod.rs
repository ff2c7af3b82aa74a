mod lma;
mod optimizer;
mod solver;

pub use lma::InterruptibleLma;
pub use optimizer::{Optimizable, Optimizer, StoppingCriteria};
pub use solver::{
    cholesky_solve, Iteration, LevenbergMarquardt, Report, Termination, AUTOMATIC_STEP_TOLERANCE,
    GRADIENT_TOLERANCE,
};
