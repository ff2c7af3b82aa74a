use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::Dense;
use crate::error::Result;
use crate::Activations;

/// A unit of a feedforward stack.
///
/// Layers never own their parameters. The network keeps one contiguous
/// parameter buffer and one derivative buffer of the same length, and each
/// layer addresses its own `parameter_range()` inside them.
pub trait Layer: Send {
    /// Claims the slots starting at `offset` and returns the output width.
    fn initialize(&mut self, offset: usize) -> usize;
    fn initialize_parameters(&self, parameters: ArrayViewMut1<f64>, rng: &mut StdRng)
        -> Result<()>;
    fn forward(&mut self, parameters: ArrayView1<f64>, x: &Array2<f64>) -> Result<Array2<f64>>;
    /// Writes this layer's gradient into `derivatives` and, when asked,
    /// returns the error signal for the previous layer.
    fn backward(
        &mut self,
        parameters: ArrayView1<f64>,
        derivatives: ArrayViewMut1<f64>,
        prev_output: &Array2<f64>,
        delta_in: &Array2<f64>,
        backprop_to_previous: bool,
    ) -> Result<Option<Array2<f64>>>;
    /// Per-sample gradients from the last backward pass, one row per sample.
    /// Fails when `prev_output` is not the batch that pass ran on.
    fn jacobian(&self, prev_output: &Array2<f64>, jacobian: ArrayViewMut2<f64>) -> Result<()>;
    fn parameters(&self, parameters: ArrayView1<f64>) -> Array1<f64>;
    fn parameter_range(&self) -> Range<usize>;
    fn outputs(&self) -> usize;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Layers {
    Dense {
        units: usize,
        activation: Activations,
        bias: bool,
        std_dev: f64,
    },
}

impl Layers {
    pub fn wake(layer: Layers, inputs: usize) -> Box<dyn Layer> {
        match layer {
            Layers::Dense {
                units,
                activation,
                bias,
                std_dev,
            } => Box::new(Dense::new(inputs, units, bias, activation, std_dev)),
        }
    }
}
