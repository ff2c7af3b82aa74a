use std::fmt::Debug;
use std::rc::Rc;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// `a` maps pre-activations to outputs, `d` gives the element-wise derivative
/// with respect to the pre-activation.
pub trait Activation {
    fn a(&self, z: &Array2<f64>) -> Array2<f64>;
    fn d(&self, z: &Array2<f64>) -> Array2<f64>;

    /// Maps the error signal at the outputs to the pre-activations.
    fn backprop(&self, z: &Array2<f64>, delta: &Array2<f64>) -> Array2<f64> {
        self.d(z) * delta
    }
}

impl Debug for dyn Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActivationFn")
    }
}

pub struct Logistic;

impl Logistic {
    pub fn new() -> Rc<Logistic> {
        Rc::new(Logistic)
    }
}

impl Activation for Logistic {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| 1. / (1. + (-v).exp()))
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| {
            let s = 1. / (1. + (-v).exp());
            s * (1. - s)
        })
    }
}

pub struct Tanh;

impl Tanh {
    pub fn new() -> Rc<Tanh> {
        Rc::new(Tanh)
    }
}

impl Activation for Tanh {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(f64::tanh)
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| 1. - v.tanh().powi(2))
    }
}

/// LeCun's scaled tanh, `1.7159 * tanh(2x / 3)`.
pub struct TanhScaled;

const TANH_SCALE: f64 = 1.7159;
const TANH_SLOPE: f64 = 2. / 3.;

impl TanhScaled {
    pub fn new() -> Rc<TanhScaled> {
        Rc::new(TanhScaled)
    }
}

impl Activation for TanhScaled {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| TANH_SCALE * (TANH_SLOPE * v).tanh())
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| TANH_SCALE * TANH_SLOPE * (1. - (TANH_SLOPE * v).tanh().powi(2)))
    }
}

pub struct Rectifier;

impl Rectifier {
    pub fn new() -> Rc<Rectifier> {
        Rc::new(Rectifier)
    }
}

impl Activation for Rectifier {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| if v < 0. { 0. } else { v })
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|v| if v < 0. { 0. } else { 1. })
    }
}

pub struct Linear;

impl Linear {
    pub fn new() -> Rc<Linear> {
        Rc::new(Linear)
    }
}

impl Activation for Linear {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        z.clone()
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        Array2::ones(z.raw_dim())
    }
}

/// Row-wise softmax. `d` is only the diagonal of the softmax Jacobian,
/// `s * (1 - s)`; `backprop` applies the full Jacobian of each row.
pub struct Softmax;

impl Softmax {
    pub fn new() -> Rc<Softmax> {
        Rc::new(Softmax)
    }
}

impl Activation for Softmax {
    fn a(&self, z: &Array2<f64>) -> Array2<f64> {
        let max_vals = z.map_axis(Axis(1), |row| row.fold(f64::MIN, |a, v| a.max(*v)));
        let exps = (z - &max_vals.insert_axis(Axis(1))).mapv(f64::exp);
        let sum_exps = exps.sum_axis(Axis(1)).insert_axis(Axis(1));
        exps / &sum_exps
    }

    fn d(&self, z: &Array2<f64>) -> Array2<f64> {
        self.a(z).mapv_into(|s| s * (1. - s))
    }

    fn backprop(&self, z: &Array2<f64>, delta: &Array2<f64>) -> Array2<f64> {
        let s = self.a(z);
        let projected = (&s * delta).sum_axis(Axis(1)).insert_axis(Axis(1));
        &s * &(delta - &projected)
    }
}

/// `Linear` and `Softmax` are distinct variants even though some layer
/// catalogs give them the same numeric code.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activations {
    Logistic,
    Tanh,
    TanhScaled,
    Rectifier,
    Linear,
    Softmax,
}

impl Activations {
    pub fn wake(&self) -> Rc<dyn Activation> {
        match self {
            Activations::Logistic => Logistic::new(),
            Activations::Tanh => Tanh::new(),
            Activations::TanhScaled => TanhScaled::new(),
            Activations::Rectifier => Rectifier::new(),
            Activations::Linear => Linear::new(),
            Activations::Softmax => Softmax::new(),
        }
    }
}
