use std::sync::Arc;

use log::{info, warn};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::config::LearnParam;
use super::events::{DatasetSummary, PredictionGrid};
use crate::dataset::{Mode, SampleStore};
use crate::error::Result;
use crate::f;
use crate::nn::Network;
use crate::optimizers::{Optimizable, StoppingCriteria};

/// One configured run: the parameters, the samples and the network built
/// from them. Replaced wholesale on every reconfiguration.
pub struct LearnTask {
    param: LearnParam,
    data: Arc<SampleStore>,
    network: Network,
}

impl LearnTask {
    /// Never fails. A configuration or data problem is logged and leaves the
    /// task with an empty dataset.
    pub fn new(param: LearnParam) -> LearnTask {
        let mut param = param;
        param.ensure_has_output_layer();

        let (data, network) = match LearnTask::build(&param) {
            Ok(built) => built,
            Err(e) => {
                warn!("[Configuration rejected: {}. Using an empty dataset]", e);
                let data = Arc::new(SampleStore::empty(0, 0));
                let network = LearnTask::network_for(&param, &data);
                (data, network)
            }
        };

        info!(
            "[Configured {} training / {} testing samples, {} parameters]",
            data.partition(Mode::Training).samples(),
            data.partition(Mode::Testing).samples(),
            network.current_parameters().len()
        );

        let task = LearnTask {
            param,
            data,
            network,
        };
        if !task.has_training_data() {
            warn!("[No training samples, runs will stop right away]");
        }
        task
    }

    fn build(param: &LearnParam) -> Result<(Arc<SampleStore>, Network)> {
        param.validate()?;
        let data = Arc::new(param.data_source.load()?);

        let mut network = LearnTask::network_for(param, &data);
        network.initialize(&mut StdRng::seed_from_u64(param.rand_seed))?;

        Ok((data, network))
    }

    fn network_for(param: &LearnParam, data: &Arc<SampleStore>) -> Network {
        let mut network = Network::new(data.inputs());
        for layer in param.layers.iter() {
            if let Some(layer) = layer.to_layer(data.outputs(), param.weight_std_dev) {
                network.add_layer(layer);
            }
        }

        network
            .set_loss(param.error_function)
            .set_training_set(data.clone())
            .weave();
        network
    }

    /// Redraws the initial weights from the configured seed.
    pub fn reinitialize(&mut self) -> Result<()> {
        self.network
            .initialize(&mut StdRng::seed_from_u64(self.param.rand_seed))?;
        Ok(())
    }

    pub fn has_training_data(&self) -> bool {
        self.data.partition(Mode::Training).samples() > 0
    }

    pub fn param(&self) -> &LearnParam {
        &self.param
    }

    pub fn data(&self) -> &Arc<SampleStore> {
        &self.data
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn stop_criteria(&self) -> StoppingCriteria {
        self.param.stopping_criteria
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            training: self.data.partition(Mode::Training).clone(),
            testing: self.data.partition(Mode::Testing).clone(),
            input_range: self.data.input_range(),
            output_range: self.data.output_range(),
            label_count: self.data.output_label_count(),
        }
    }

    pub fn prediction(&mut self) -> Result<Option<PredictionGrid>> {
        predict_grid(
            &mut self.network,
            self.data.input_range(),
            self.param.prediction_resolution,
        )
    }
}

/// Samples the first output of a two-input network on a regular grid.
/// `None` for networks of any other shape.
pub fn predict_grid(
    network: &mut Network,
    range: (f64, f64),
    resolution: usize,
) -> Result<Option<PredictionGrid>> {
    if network.inputs() != 2 || network.outputs() == 0 || resolution == 0 {
        return Ok(None);
    }

    let step = (range.1 - range.0) / resolution as f64;
    let coordinate = |i: usize| range.0 + step * i as f64;

    let grid = Array2::from_shape_fn((resolution * resolution, 2), |(row, column)| {
        match column {
            0 => coordinate(row / resolution),
            _ => coordinate(row % resolution),
        }
    });
    let prediction = network.predict_batch(grid.view())?;

    let points = grid
        .rows()
        .into_iter()
        .zip(prediction.rows())
        .map(|(xy, out)| [xy[0], out[0], xy[1]])
        .collect();

    Ok(Some(PredictionGrid { resolution, points }))
}

/// Classification rate of the network on one partition, computed without
/// touching the store's mode.
pub fn classification_rate(
    network: &mut Network,
    data: &SampleStore,
    mode: Mode,
) -> Result<Option<f64>> {
    let partition = data.partition(mode);
    if partition.samples() == 0 {
        return Ok(None);
    }

    let prediction = network.predict_batch(partition.inputs.view())?;
    Ok(f::classification_rate(
        prediction.view(),
        partition.targets.view(),
        data.label_threshold(),
    ))
}
