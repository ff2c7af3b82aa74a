use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::activation::Activations;
use crate::dataset::DataSource;
use crate::error::{ClossError, Result};
use crate::layers::Layers;
use crate::loss::Losses;
use crate::optimizers::StoppingCriteria;
use crate::util;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// Width comes from the dataset's input columns.
    Input,
    Hidden,
    /// Width comes from the dataset's target columns.
    Output,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LayerDesc {
    pub role: LayerRole,
    pub units: usize,
    pub activation: Activations,
    #[serde(default = "bias_default")]
    pub bias: bool,
}

fn bias_default() -> bool {
    true
}

impl LayerDesc {
    pub fn input() -> LayerDesc {
        LayerDesc {
            role: LayerRole::Input,
            units: 0,
            activation: Activations::Linear,
            bias: false,
        }
    }

    pub fn hidden(units: usize, activation: Activations) -> LayerDesc {
        LayerDesc {
            role: LayerRole::Hidden,
            units,
            activation,
            bias: true,
        }
    }

    pub fn output(activation: Activations) -> LayerDesc {
        LayerDesc {
            role: LayerRole::Output,
            units: 0,
            activation,
            bias: true,
        }
    }

    /// The dense layer this describes, given the dataset's widths.
    /// `None` for the input layer.
    pub fn to_layer(&self, outputs: usize, std_dev: f64) -> Option<Layers> {
        let units = match self.role {
            LayerRole::Input => return None,
            LayerRole::Hidden => self.units,
            LayerRole::Output => outputs,
        };

        Some(Layers::Dense {
            units,
            activation: self.activation,
            bias: self.bias,
            std_dev,
        })
    }
}

/// Everything needed to build one training run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LearnParam {
    pub error_function: Losses,
    /// Carried along with the configuration; Levenberg-Marquardt chooses its
    /// own step length.
    pub learning_rate: f64,
    pub layers: Vec<LayerDesc>,
    pub data_source: DataSource,
    pub stopping_criteria: StoppingCriteria,
    pub rand_seed: u64,
    pub disable_predict: bool,
    pub weight_std_dev: f64,
    pub prediction_resolution: usize,
}

impl Default for LearnParam {
    fn default() -> Self {
        LearnParam {
            error_function: Losses::default(),
            learning_rate: 1.,
            layers: vec![
                LayerDesc::input(),
                LayerDesc::hidden(20, Activations::Tanh),
                LayerDesc::hidden(20, Activations::Tanh),
                LayerDesc::output(Activations::Tanh),
            ],
            data_source: DataSource::default(),
            stopping_criteria: StoppingCriteria::default(),
            rand_seed: util::clock_seed(),
            disable_predict: false,
            weight_std_dev: 0.05,
            prediction_resolution: 30,
        }
    }
}

impl LearnParam {
    pub fn new() -> LearnParam {
        LearnParam::default()
    }

    pub fn set_error_function(&mut self, error_function: Losses) -> &mut Self {
        self.error_function = error_function;
        self
    }

    pub fn set_closs(&mut self, kernel_size: f64, p_value: f64) -> &mut Self {
        self.error_function = Losses::Closs {
            kernel_size,
            p_value,
        };
        self
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> &mut Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn set_layers(&mut self, layers: Vec<LayerDesc>) -> &mut Self {
        self.layers = layers;
        self
    }

    pub fn set_data_source(&mut self, data_source: DataSource) -> &mut Self {
        self.data_source = data_source;
        self
    }

    pub fn set_stopping_criteria(&mut self, stopping_criteria: StoppingCriteria) -> &mut Self {
        self.stopping_criteria = stopping_criteria;
        self
    }

    pub fn set_rand_seed(&mut self, rand_seed: u64) -> &mut Self {
        self.rand_seed = rand_seed;
        self
    }

    pub fn set_disable_predict(&mut self, disable_predict: bool) -> &mut Self {
        self.disable_predict = disable_predict;
        self
    }

    pub fn set_weight_std_dev(&mut self, weight_std_dev: f64) -> &mut Self {
        self.weight_std_dev = weight_std_dev;
        self
    }

    pub fn set_prediction_resolution(&mut self, resolution: usize) -> &mut Self {
        self.prediction_resolution = resolution;
        self
    }

    pub fn kernel_size(&self) -> Option<f64> {
        match self.error_function {
            Losses::Closs { kernel_size, .. } => Some(kernel_size),
            Losses::MeanSquaredError => None,
        }
    }

    pub fn p_value(&self) -> Option<f64> {
        match self.error_function {
            Losses::Closs { p_value, .. } => Some(p_value),
            Losses::MeanSquaredError => None,
        }
    }

    /// The last layer always sizes itself to the dataset's targets.
    pub fn ensure_has_output_layer(&mut self) -> &mut Self {
        let has_output = matches!(
            self.layers.last(),
            Some(LayerDesc {
                role: LayerRole::Output,
                ..
            })
        );

        if !has_output {
            self.layers.push(LayerDesc::output(Activations::Tanh));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.error_function.validate().map_err(ClossError::Config)?;

        if !(self.weight_std_dev.is_finite() && self.weight_std_dev > 0.) {
            return Err(ClossError::Config(format!(
                "weight standard deviation must be positive, got {}",
                self.weight_std_dev
            )));
        }

        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            match layer.role {
                LayerRole::Input if i != 0 => {
                    return Err(ClossError::Config(format!(
                        "input layer at position {}, it must come first",
                        i
                    )))
                }
                LayerRole::Output if i != last => {
                    return Err(ClossError::Config(format!(
                        "output layer at position {}, it must come last",
                        i
                    )))
                }
                LayerRole::Hidden if layer.units == 0 => {
                    return Err(ClossError::Config(format!(
                        "hidden layer at position {} has no units",
                        i
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<LearnParam> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<LearnParam> {
        LearnParam::from_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn log_summary(&self) {
        match self.error_function {
            Losses::Closs {
                kernel_size,
                p_value,
            } => info!(
                "Error function: C-loss (kernel size {}, p value {})",
                kernel_size, p_value
            ),
            Losses::MeanSquaredError => info!("Error function: mean squared error"),
        }
        info!("Learning rate: {}", self.learning_rate);
        info!("Random seed: {}", self.rand_seed);
        info!("Layers:");
        for layer in self.layers.iter() {
            info!(
                "    {:?} units {} activation {:?} bias {}",
                layer.role, layer.units, layer.activation, layer.bias
            );
        }
        info!(
            "Stopping criteria: {} iterations, step {}, value difference {}",
            self.stopping_criteria.maximal_iterations,
            self.stopping_criteria.minimal_search_space_step,
            self.stopping_criteria.minimal_value_differences
        );
    }
}
