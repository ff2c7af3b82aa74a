use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Thresholds that end an optimization run. A value of zero disables the
/// corresponding test.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StoppingCriteria {
    pub maximal_iterations: usize,
    pub minimal_search_space_step: f64,
    pub minimal_value_differences: f64,
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        StoppingCriteria {
            maximal_iterations: 10000,
            minimal_search_space_step: 0.,
            minimal_value_differences: 0.,
        }
    }
}

impl StoppingCriteria {
    pub fn new() -> StoppingCriteria {
        StoppingCriteria::default()
    }

    pub fn set_maximal_iterations(&mut self, iterations: usize) -> &mut Self {
        self.maximal_iterations = iterations;
        self
    }

    pub fn set_minimal_search_space_step(&mut self, step: f64) -> &mut Self {
        self.minimal_search_space_step = step;
        self
    }

    pub fn set_minimal_value_differences(&mut self, difference: f64) -> &mut Self {
        self.minimal_value_differences = difference;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.maximal_iterations == 0
            && self.minimal_search_space_step <= 0.
            && self.minimal_value_differences <= 0.
    }
}

/// Anything with a flat parameter vector and a per-example error.
///
/// Errors are always taken over whatever sample set is currently active, so
/// an implementor backed by a [`crate::dataset::SampleStore`] follows its mode.
pub trait Optimizable {
    fn dimension(&self) -> usize;
    fn examples(&self) -> usize;
    fn current_parameters(&self) -> Array1<f64>;
    fn set_parameters(&mut self, parameters: ArrayView1<f64>) -> Result<()>;

    /// One non-negative error value per example.
    fn errors(&mut self) -> Result<Array1<f64>>;

    /// Per-example errors and their gradients, `(examples, dimension)`.
    fn errors_and_jacobian(&mut self) -> Result<(Array1<f64>, Array2<f64>)>;

    /// Mean error over the active examples, 0 when there are none.
    fn error(&mut self) -> Result<f64> {
        let errors = self.errors()?;
        Ok(errors.mean().unwrap_or(0.))
    }
}

pub trait Optimizer {
    fn set_stop_criteria(&mut self, stop: StoppingCriteria) -> &mut Self;

    /// Runs one iteration. `Ok(false)` once the run is over.
    fn step(&mut self) -> Result<bool>;

    /// Finalizes and returns the best parameters seen.
    fn result(&mut self) -> Result<Array1<f64>>;

    fn name(&self) -> String;

    fn optimize(&mut self) -> Result<Array1<f64>> {
        while self.step()? {}
        self.result()
    }
}
