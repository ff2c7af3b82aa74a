use std::ops::Range;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

use super::types::Layer;
use crate::activation::Activations;
use crate::error::{ClossError, Result};

/// Fully connected layer, `y = g(x . W^T + b)`.
///
/// Slot layout inside the network buffer: the `units x inputs` weight matrix
/// row-major, then `units` biases when `bias` is set.
#[derive(Debug, Clone)]
pub struct Dense {
    pub inputs: usize,
    pub units: usize,
    pub bias: bool,
    pub activation: Activations,
    pub std_dev: f64,
    offset: usize,
    net: Array2<f64>,
    delta: Array2<f64>,
}

impl Dense {
    pub fn new(
        inputs: usize,
        units: usize,
        bias: bool,
        activation: Activations,
        std_dev: f64,
    ) -> Dense {
        Dense {
            inputs,
            units,
            bias,
            activation,
            std_dev,
            offset: 0,
            net: Array2::zeros((1, units)),
            delta: Array2::zeros((1, units)),
        }
    }

    fn weight_count(&self) -> usize {
        self.units * self.inputs
    }

    fn parameter_count(&self) -> usize {
        self.units * (self.inputs + self.bias as usize)
    }

    fn weights<'a>(&self, parameters: ArrayView1<'a, f64>) -> Result<ArrayView2<'a, f64>> {
        let start = self.offset;
        Ok(parameters
            .slice_move(s![start..start + self.weight_count()])
            .into_shape((self.units, self.inputs))?)
    }

    fn biases<'a>(&self, parameters: ArrayView1<'a, f64>) -> ArrayView1<'a, f64> {
        let start = self.offset + self.weight_count();
        parameters.slice_move(s![start..start + self.units])
    }
}

impl Layer for Dense {
    fn initialize(&mut self, offset: usize) -> usize {
        self.offset = offset;
        self.units
    }

    fn initialize_parameters(
        &self,
        parameters: ArrayViewMut1<f64>,
        rng: &mut StdRng,
    ) -> Result<()> {
        let distribution = Normal::new(0., self.std_dev)?;
        let mut slots = parameters.slice_move(s![self.parameter_range()]);
        slots.assign(&Array1::random_using(slots.len(), distribution, rng));
        Ok(())
    }

    fn forward(&mut self, parameters: ArrayView1<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
        let w = self.weights(parameters)?;
        let mut net = x.dot(&w.t());
        if self.bias {
            net += &self.biases(parameters);
        }

        let a_z = self.activation.wake().a(&net);
        self.net = net;
        Ok(a_z)
    }

    fn backward(
        &mut self,
        parameters: ArrayView1<f64>,
        derivatives: ArrayViewMut1<f64>,
        prev_output: &Array2<f64>,
        delta_in: &Array2<f64>,
        backprop_to_previous: bool,
    ) -> Result<Option<Array2<f64>>> {
        let delta = self.activation.wake().backprop(&self.net, delta_in);

        let weight_count = self.weight_count();
        let mut slots = derivatives.slice_move(s![self.parameter_range()]);

        let grad_w = delta.t().dot(prev_output);
        slots
            .slice_mut(s![..weight_count])
            .into_shape((self.units, self.inputs))?
            .assign(&grad_w);

        if self.bias {
            slots
                .slice_mut(s![weight_count..])
                .assign(&delta.sum_axis(Axis(0)));
        }

        let grad_input = if backprop_to_previous {
            Some(delta.dot(&self.weights(parameters)?))
        } else {
            None
        };

        self.delta = delta;
        Ok(grad_input)
    }

    fn jacobian(&self, prev_output: &Array2<f64>, mut jacobian: ArrayViewMut2<f64>) -> Result<()> {
        let samples = prev_output.nrows();
        if self.delta.nrows() != samples || jacobian.nrows() != samples {
            return Err(ClossError::Data(format!(
                "last backward pass saw {} samples, jacobian asked for {}",
                self.delta.nrows(),
                samples
            )));
        }

        for (n, mut row) in jacobian.outer_iter_mut().enumerate() {
            let delta = self.delta.row(n);
            let prev = prev_output.row(n);

            let mut k = self.offset;
            for j in 0..self.units {
                for i in 0..self.inputs {
                    row[k] = delta[j] * prev[i];
                    k += 1;
                }
            }
            if self.bias {
                for j in 0..self.units {
                    row[k] = delta[j];
                    k += 1;
                }
            }
        }
        Ok(())
    }

    fn parameters(&self, parameters: ArrayView1<f64>) -> Array1<f64> {
        parameters.slice(s![self.parameter_range()]).to_owned()
    }

    fn parameter_range(&self) -> Range<usize> {
        self.offset..self.offset + self.parameter_count()
    }

    fn outputs(&self) -> usize {
        self.units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn layer_with(params: &Array1<f64>, activation: Activations) -> Dense {
        let mut dense = Dense::new(3, 2, true, activation, 0.05);
        assert_eq!(dense.initialize(0), 2);
        assert_eq!(dense.parameter_range(), 0..params.len());
        dense
    }

    #[test]
    fn forward_is_affine_then_activation() {
        // W = [[1, 2, 3], [4, 5, 6]], b = [0.5, -1]
        let params = array![1., 2., 3., 4., 5., 6., 0.5, -1.];
        let mut dense = layer_with(&params, Activations::Linear);

        let x = array![[1., 0., 0.], [0., 1., 1.]];
        let y = dense.forward(params.view(), &x).unwrap();

        assert_eq!(y, array![[1.5, 3.], [5.5, 10.]]);
    }

    #[test]
    fn forward_tolerates_changing_batch_sizes() {
        let params = array![1., 2., 3., 4., 5., 6., 0.5, -1.];
        let mut dense = layer_with(&params, Activations::Tanh);

        for batch in [1, 7, 3, 0] {
            let x = Array2::ones((batch, 3));
            let y = dense.forward(params.view(), &x).unwrap();
            assert_eq!(y.dim(), (batch, 2));
        }
    }

    #[test]
    fn backward_produces_summed_gradients_and_error_signal() {
        let params = array![1., 2., 3., 4., 5., 6., 0.5, -1.];
        let mut dense = layer_with(&params, Activations::Linear);
        let mut derivatives = Array1::zeros(params.len());

        let x = array![[1., 2., 3.], [-1., 0., 1.]];
        dense.forward(params.view(), &x).unwrap();

        let delta_in = array![[1., 0.], [0., 2.]];
        let delta_out = dense
            .backward(params.view(), derivatives.view_mut(), &x, &delta_in, true)
            .unwrap()
            .unwrap();

        // dW = delta^T . x, db = column sums of delta, deltaOut = delta . W
        assert_eq!(
            derivatives,
            array![1., 2., 3., -2., 0., 2., 1., 2.]
        );
        assert_eq!(delta_out, array![[1., 2., 3.], [8., 10., 12.]]);
    }

    #[test]
    fn first_layer_skips_error_signal() {
        let params = array![1., 2., 3., 4., 5., 6., 0.5, -1.];
        let mut dense = layer_with(&params, Activations::Logistic);
        let mut derivatives = Array1::zeros(params.len());
        let x = Array2::ones((4, 3));

        dense.forward(params.view(), &x).unwrap();
        let out = dense
            .backward(params.view(), derivatives.view_mut(), &x, &Array2::ones((4, 2)), false)
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn jacobian_rows_sum_to_batch_gradient() {
        let params = array![0.1, -0.2, 0.3, 0.4, 0.5, -0.6, 0.05, 0.01];
        let mut dense = layer_with(&params, Activations::Tanh);
        let mut derivatives = Array1::zeros(params.len());

        let x = array![[1., 2., 3.], [-1., 0., 1.], [0.5, 0.5, -0.5]];
        dense.forward(params.view(), &x).unwrap();
        let delta_in = array![[1., -1.], [0.3, 2.], [-0.5, 0.25]];
        dense
            .backward(params.view(), derivatives.view_mut(), &x, &delta_in, false)
            .unwrap();

        let mut jacobian = Array2::zeros((3, params.len()));
        dense.jacobian(&x, jacobian.view_mut()).unwrap();

        let summed = jacobian.sum_axis(Axis(0));
        for (a, b) in summed.iter().zip(derivatives.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn jacobian_needs_the_batch_of_the_last_backward_pass() {
        let params = array![0.1, -0.2, 0.3, 0.4, 0.5, -0.6, 0.05, 0.01];
        let mut dense = layer_with(&params, Activations::Tanh);

        let x = Array2::ones((5, 3));
        dense.forward(params.view(), &x).unwrap();

        let mut jacobian = Array2::zeros((5, params.len()));
        assert!(matches!(
            dense.jacobian(&x, jacobian.view_mut()),
            Err(ClossError::Data(_))
        ));
    }

    #[test]
    fn initialization_only_touches_own_slots() {
        let mut dense = Dense::new(2, 2, false, Activations::Tanh, 1.);
        dense.initialize(3);

        let mut buffer = Array1::zeros(10);
        let mut rng = StdRng::seed_from_u64(7);
        dense
            .initialize_parameters(buffer.view_mut(), &mut rng)
            .unwrap();

        assert_eq!(dense.parameter_range(), 3..7);
        assert!(buffer.slice(s![..3]).iter().all(|v| *v == 0.));
        assert!(buffer.slice(s![7..]).iter().all(|v| *v == 0.));
        assert!(buffer.slice(s![3..7]).iter().any(|v| *v != 0.));
    }
}
