use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::dataset::SampleStore;
use crate::error::{ClossError, Result};
use crate::layers::{Layer, Layers};
use crate::loss::Losses;
use crate::optimizers::Optimizable;

/// Feedforward stack over one flat parameter buffer.
///
/// Layers are described with [`Layers`] and woven into trait objects once the
/// input width is known. `outputs[0]` caches the last input batch and
/// `outputs[l + 1]` the output of layer `l`, both sized to whatever batch was
/// pushed through last.
pub struct Network {
    inputs: usize,
    schema: Vec<Layers>,
    layers: Vec<Box<dyn Layer>>,
    parameters: Array1<f64>,
    derivatives: Array1<f64>,
    outputs: Vec<Array2<f64>>,
    pub loss: Losses,
    training_set: Option<Arc<SampleStore>>,
}

#[derive(Serialize, Deserialize)]
struct NetworkSnapshot {
    inputs: usize,
    layers: Vec<Layers>,
    loss: Losses,
    parameters: Array1<f64>,
}

impl Network {
    pub fn new(inputs: usize) -> Network {
        Network {
            inputs,
            schema: vec![],
            layers: vec![],
            parameters: Array1::zeros(0),
            derivatives: Array1::zeros(0),
            outputs: vec![],
            loss: Losses::default(),
            training_set: None,
        }
    }

    pub fn add_layer(&mut self, layer: Layers) -> &mut Self {
        self.schema.push(layer);
        self
    }

    pub fn set_loss(&mut self, loss: Losses) -> &mut Self {
        self.loss = loss;
        self
    }

    pub fn set_training_set(&mut self, store: Arc<SampleStore>) -> &mut Self {
        self.training_set = Some(store);
        self
    }

    pub fn training_set(&self) -> Option<&Arc<SampleStore>> {
        self.training_set.as_ref()
    }

    /// Builds the layers, claims their parameter slots and leaves every
    /// parameter at zero.
    pub fn weave(&mut self) -> &mut Self {
        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(self.schema.len());
        let mut width = self.inputs;
        let mut offset = 0;

        for description in self.schema.iter() {
            let mut layer = Layers::wake(*description, width);
            width = layer.initialize(offset);
            offset = layer.parameter_range().end;
            layers.push(layer);
        }

        self.layers = layers;
        self.parameters = Array1::zeros(offset);
        self.derivatives = Array1::zeros(offset);
        self.outputs = vec![Array2::zeros((0, self.inputs))];
        self
    }

    /// Weaves the layers and draws every parameter from its layer's
    /// distribution.
    pub fn initialize(&mut self, rng: &mut StdRng) -> Result<&mut Self> {
        self.weave();
        for layer in self.layers.iter() {
            layer.initialize_parameters(self.parameters.view_mut(), rng)?;
        }
        Ok(self)
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.outputs())
            .unwrap_or(self.inputs)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn describe(&self) -> &[Layers] {
        &self.schema
    }

    /// The parameters of one layer, in its slot layout.
    pub fn layer_parameters(&self, layer: usize) -> Option<Array1<f64>> {
        self.layers
            .get(layer)
            .map(|l| l.parameters(self.parameters.view()))
    }

    pub fn forward(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.inputs {
            return Err(ClossError::Data(format!(
                "network takes {} inputs, batch has {}",
                self.inputs,
                x.ncols()
            )));
        }

        let mut outputs = Vec::with_capacity(self.layers.len() + 1);
        outputs.push(x.to_owned());

        for layer in self.layers.iter_mut() {
            let y = layer.forward(self.parameters.view(), &outputs[outputs.len() - 1])?;
            outputs.push(y);
        }

        let y = outputs[outputs.len() - 1].clone();
        self.outputs = outputs;
        Ok(y)
    }

    /// Pushes `delta` (error derivative per sample and output) back through
    /// the stack, filling the derivative buffer with the batch gradient.
    pub fn backward(&mut self, delta: Array2<f64>) -> Result<()> {
        let mut delta = delta;

        for l in (0..self.layers.len()).rev() {
            let layer = &mut self.layers[l];
            let next = layer.backward(
                self.parameters.view(),
                self.derivatives.view_mut(),
                &self.outputs[l],
                &delta,
                l > 0,
            )?;

            if let Some(next) = next {
                delta = next;
            }
        }

        Ok(())
    }

    /// Per-sample gradient rows of the last backward pass. Fails when a
    /// different batch went forward since.
    pub fn jacobian(&self) -> Result<Array2<f64>> {
        let samples = self.outputs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut jacobian = Array2::zeros((samples, self.parameters.len()));

        for (l, layer) in self.layers.iter().enumerate() {
            layer.jacobian(&self.outputs[l], jacobian.view_mut())?;
        }

        Ok(jacobian)
    }

    pub fn predict(&mut self, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        let y = self.forward(x.insert_axis(Axis(0)))?;
        Ok(y.row(0).to_owned())
    }

    pub fn predict_batch(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.forward(x)
    }

    /// Mean error over the active partition and its gradient.
    pub fn error_gradient(&mut self) -> Result<(f64, Array1<f64>)> {
        let (errors, _) = self.evaluate(true)?;
        let samples = errors.len();
        if samples == 0 {
            return Ok((0., Array1::zeros(self.parameters.len())));
        }

        let mean = errors.sum() / samples as f64;
        Ok((mean, &self.derivatives / samples as f64))
    }

    fn evaluate(&mut self, with_gradient: bool) -> Result<(Array1<f64>, Option<Array2<f64>>)> {
        let store = match self.training_set.clone() {
            Some(store) => store,
            None => return Ok((Array1::zeros(0), None)),
        };

        let (x, targets) = store.batch();
        let prediction = self.forward(x)?;
        if prediction.dim() != targets.dim() {
            return Err(ClossError::Data(format!(
                "network produces {} outputs, targets have {}",
                prediction.ncols(),
                targets.ncols()
            )));
        }

        let loss = self.loss.wake();
        let errors = loss.a(prediction.view(), targets);
        if !with_gradient {
            return Ok((errors, None));
        }

        let delta = loss.d(prediction.view(), targets);
        self.backward(delta)?;
        Ok((errors, Some(self.jacobian()?)))
    }

    pub fn dump(&self) -> Result<Vec<u8>> {
        let snapshot = NetworkSnapshot {
            inputs: self.inputs,
            layers: self.schema.clone(),
            loss: self.loss,
            parameters: self.parameters.clone(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    pub fn load(serialized: &[u8]) -> Result<Network> {
        let snapshot: NetworkSnapshot = bincode::deserialize(serialized)?;

        let mut network = Network::new(snapshot.inputs);
        for layer in snapshot.layers {
            network.add_layer(layer);
        }
        network.set_loss(snapshot.loss).weave();
        network.set_parameters(snapshot.parameters.view())?;

        Ok(network)
    }
}

impl Optimizable for Network {
    fn dimension(&self) -> usize {
        self.parameters.len()
    }

    fn examples(&self) -> usize {
        self.training_set
            .as_ref()
            .map(|store| store.samples())
            .unwrap_or(0)
    }

    fn current_parameters(&self) -> Array1<f64> {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: ArrayView1<f64>) -> Result<()> {
        if parameters.len() != self.parameters.len() {
            return Err(ClossError::Data(format!(
                "network has {} parameters, got {}",
                self.parameters.len(),
                parameters.len()
            )));
        }

        self.parameters.assign(&parameters);
        Ok(())
    }

    fn errors(&mut self) -> Result<Array1<f64>> {
        Ok(self.evaluate(false)?.0)
    }

    fn errors_and_jacobian(&mut self) -> Result<(Array1<f64>, Array2<f64>)> {
        let (errors, jacobian) = self.evaluate(true)?;
        let jacobian = jacobian.unwrap_or_else(|| Array2::zeros((0, self.parameters.len())));
        Ok((errors, jacobian))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activations;
    use crate::dataset::Partition;
    use ndarray::array;
    use rand::SeedableRng;

    fn dense(units: usize, activation: Activations) -> Layers {
        Layers::Dense {
            units,
            activation,
            bias: true,
            std_dev: 0.5,
        }
    }

    fn store() -> Arc<SampleStore> {
        let training = Partition::new(
            array![[0.1, 0.9], [0.8, 0.2], [0.5, 0.5], [0.0, 0.3]],
            array![[1.], [-1.], [1.], [-1.]],
        )
        .unwrap();
        let testing = Partition::new(array![[0.3, 0.3]], array![[5.]]).unwrap();
        Arc::new(SampleStore::new(training, testing).unwrap())
    }

    fn network(loss: Losses) -> Network {
        let mut rng = StdRng::seed_from_u64(42);
        let mut network = Network::new(2);
        network
            .add_layer(dense(4, Activations::Tanh))
            .add_layer(dense(1, Activations::Tanh))
            .set_loss(loss)
            .set_training_set(store());
        network.initialize(&mut rng).unwrap();
        network
    }

    #[test]
    fn parameters_are_laid_out_layer_by_layer() {
        let network = network(Losses::default());
        assert_eq!(network.dimension(), 2 * 4 + 4 + 4 + 1);
        assert_eq!(network.layer_count(), 2);
        assert_eq!(network.outputs(), 1);
        assert_eq!(network.layer_parameters(0).unwrap().len(), 12);
        assert_eq!(network.layer_parameters(1).unwrap().len(), 5);
        assert!(network.layer_parameters(2).is_none());
    }

    #[test]
    fn same_seed_same_network() {
        let a = network(Losses::default());
        let b = network(Losses::default());
        assert_eq!(a.current_parameters(), b.current_parameters());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        for loss in [
            Losses::default(),
            Losses::Closs {
                kernel_size: 1.,
                p_value: 1.5,
            },
            Losses::MeanSquaredError,
        ] {
            assert_gradient_matches_finite_differences(&mut network(loss));
        }
    }

    fn assert_gradient_matches_finite_differences(network: &mut Network) {
        let (_, gradient) = network.error_gradient().unwrap();
        let start = network.current_parameters();

        let h = 1e-6;
        for k in 0..start.len() {
            let mut plus = start.clone();
            plus[k] += h;
            network.set_parameters(plus.view()).unwrap();
            let up = network.error().unwrap();

            let mut minus = start.clone();
            minus[k] -= h;
            network.set_parameters(minus.view()).unwrap();
            let down = network.error().unwrap();

            let numeric = (up - down) / (2. * h);
            assert!(
                (numeric - gradient[k]).abs() < 1e-6,
                "{:?} slot {}: {} vs {}",
                network.loss,
                k,
                numeric,
                gradient[k]
            );
        }
        network.set_parameters(start.view()).unwrap();
    }

    #[test]
    fn softmax_output_gradient_matches_finite_differences() {
        let training = Partition::new(
            array![[0.1, 0.9], [0.8, 0.2], [0.5, 0.5], [0.0, 0.3]],
            array![[1., 0., 0.], [0., 1., 0.], [0., 0., 1.], [1., 0., 0.]],
        )
        .unwrap();
        let store = Arc::new(SampleStore::new(training.clone(), training).unwrap());

        for loss in [Losses::default(), Losses::MeanSquaredError] {
            let mut network = Network::new(2);
            network
                .add_layer(dense(3, Activations::Tanh))
                .add_layer(dense(3, Activations::Softmax))
                .set_loss(loss)
                .set_training_set(store.clone());
            network.initialize(&mut StdRng::seed_from_u64(9)).unwrap();

            assert_gradient_matches_finite_differences(&mut network);
        }
    }

    #[test]
    fn jacobian_after_a_different_batch_is_an_error() {
        let mut network = network(Losses::default());
        network.forward(Array2::zeros((5, 2)).view()).unwrap();
        assert!(matches!(network.jacobian(), Err(ClossError::Data(_))));

        // A full evaluation lines the caches up again.
        let (_, jacobian) = network.errors_and_jacobian().unwrap();
        assert_eq!(jacobian.nrows(), 4);
        assert_eq!(network.jacobian().unwrap(), jacobian);
    }

    #[test]
    fn jacobian_rows_are_per_sample_gradients() {
        let mut network = network(Losses::default());
        let (errors, jacobian) = network.errors_and_jacobian().unwrap();
        let (mean, gradient) = network.error_gradient().unwrap();

        assert_eq!(jacobian.dim(), (4, network.dimension()));
        assert!((errors.mean().unwrap() - mean).abs() < 1e-12);

        let summed = jacobian.sum_axis(Axis(0)) / 4.;
        for (a, b) in summed.iter().zip(gradient.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn errors_follow_the_store_mode() {
        let mut network = network(Losses::MeanSquaredError);
        let store = network.training_set().unwrap().clone();

        assert_eq!(network.examples(), 4);
        assert_eq!(network.errors().unwrap().len(), 4);
        {
            let _ctx = store.enter_testing_mode(true);
            assert_eq!(network.examples(), 1);
            // |prediction| < 1 under tanh, target is 5
            assert!(network.error().unwrap() > 16.);
        }
        assert_eq!(network.examples(), 4);
    }

    #[test]
    fn detached_network_has_no_examples() {
        let mut network = Network::new(3);
        network.add_layer(dense(2, Activations::Linear)).weave();

        assert_eq!(network.examples(), 0);
        assert_eq!(network.error().unwrap(), 0.);
        let (errors, jacobian) = network.errors_and_jacobian().unwrap();
        assert_eq!(errors.len(), 0);
        assert_eq!(jacobian.dim(), (0, 8));
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut network = network(Losses::default());
        assert!(network.set_parameters(Array1::zeros(3).view()).is_err());
        assert!(network.forward(Array2::zeros((2, 3)).view()).is_err());
    }

    #[test]
    fn dump_and_load_preserve_predictions() {
        let mut network = network(Losses::Closs {
            kernel_size: 0.7,
            p_value: 2.,
        });
        let x = array![0.25, 0.75];
        let before = network.predict(x.view()).unwrap();

        let bytes = network.dump().unwrap();
        let mut restored = Network::load(&bytes).unwrap();

        assert_eq!(restored.describe(), network.describe());
        assert_eq!(restored.loss, network.loss);
        assert_eq!(restored.current_parameters(), network.current_parameters());
        assert_eq!(restored.predict(x.view()).unwrap(), before);
        assert!(restored.training_set().is_none());
    }

    #[test]
    fn predict_batch_matches_single_predictions() {
        let mut network = network(Losses::default());
        let x = array![[0., 0.], [1., 0.5], [0.2, 0.2]];
        let batch = network.predict_batch(x.view()).unwrap();

        for (i, row) in x.outer_iter().enumerate() {
            let single = network.predict(row).unwrap();
            assert!((single[0] - batch[[i, 0]]).abs() < 1e-12);
        }
    }
}
