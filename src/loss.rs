use std::fmt::Debug;
use std::rc::Rc;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Batched loss over `(samples, outputs)` matrices.
///
/// `a` returns one error value per sample (the mean over that sample's
/// outputs). `d` returns the derivative of each sample's error with respect to
/// each output, which is what gets seeded into backpropagation.
pub trait Loss {
    fn a(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array1<f64>;
    fn d(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array2<f64>;
}

impl Debug for dyn Loss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LossFn")
    }
}

pub struct MSE;

impl MSE {
    pub fn new() -> Rc<MSE> {
        Rc::new(MSE)
    }
}

impl Loss for MSE {
    fn a(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array1<f64> {
        assert_eq!(
            pred.shape(),
            target.shape(),
            "Predictions and targets must have the same shape."
        );

        let features = pred.ncols().max(1);

        let diff = &pred - &target;
        let exp = diff.mapv_into(|x| x.powi(2));
        let sum = exp.sum_axis(Axis(1));
        sum.mapv_into(|x| x / features as f64)
    }

    fn d(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array2<f64> {
        let features = pred.ncols().max(1);

        let diff = &pred - &target;
        diff.mapv_into(|x| (x * 2.) / features as f64)
    }
}

/// Correntropy induced loss.
///
/// Per element `loss(r) = beta * (1 - exp(lambda * |r|^p))` with
/// `lambda = -1 / (2 sigma^2)` and `beta = 1 / (1 - exp(lambda))`, so every
/// element contributes at most `beta` no matter how far off it is.
#[derive(Debug, Clone, Copy)]
pub struct Closs {
    kernel_size: f64,
    p_value: f64,
    lambda: f64,
    beta: f64,
}

impl Closs {
    pub fn new(kernel_size: f64, p_value: f64) -> Rc<Closs> {
        Rc::new(Closs::with_params(kernel_size, p_value))
    }

    pub fn with_params(kernel_size: f64, p_value: f64) -> Closs {
        let lambda = -1. / (2. * kernel_size * kernel_size);
        let beta = 1. / (1. - lambda.exp());

        Closs {
            kernel_size,
            p_value,
            lambda,
            beta,
        }
    }

    pub fn kernel_size(&self) -> f64 {
        self.kernel_size
    }

    pub fn p_value(&self) -> f64 {
        self.p_value
    }

    /// Upper bound of the per-element loss.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn rbf(&self, r: f64) -> f64 {
        (self.lambda * r.abs().powf(self.p_value)).exp()
    }

    pub fn element(&self, r: f64) -> f64 {
        self.beta * (1. - self.rbf(r))
    }

    /// `sign(0)` is taken as 0 so a perfect fit never injects NaN.
    pub fn element_derivative(&self, r: f64) -> f64 {
        if r == 0. {
            return 0.;
        }

        self.beta
            * (-self.lambda)
            * self.p_value
            * self.rbf(r)
            * r.abs().powf(self.p_value - 1.)
            * r.signum()
    }
}

impl Loss for Closs {
    fn a(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array1<f64> {
        assert_eq!(
            pred.shape(),
            target.shape(),
            "Predictions and targets must have the same shape."
        );

        let features = pred.ncols().max(1);

        let diff = &pred - &target;
        let elements = diff.mapv_into(|r| self.element(r));
        elements
            .sum_axis(Axis(1))
            .mapv_into(|x| x / features as f64)
    }

    fn d(&self, pred: ArrayView2<f64>, target: ArrayView2<f64>) -> Array2<f64> {
        let features = pred.ncols().max(1);

        let diff = &pred - &target;
        diff.mapv_into(|r| self.element_derivative(r) / features as f64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Losses {
    MeanSquaredError,
    Closs { kernel_size: f64, p_value: f64 },
}

impl Default for Losses {
    fn default() -> Self {
        Losses::Closs {
            kernel_size: 0.5,
            p_value: 2.,
        }
    }
}

impl Losses {
    pub fn wake(&self) -> Rc<dyn Loss> {
        match self {
            Losses::MeanSquaredError => MSE::new(),
            Losses::Closs {
                kernel_size,
                p_value,
            } => Closs::new(*kernel_size, *p_value),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Losses::MeanSquaredError => Ok(()),
            Losses::Closs {
                kernel_size,
                p_value,
            } => {
                if !(kernel_size.is_finite() && *kernel_size > 0.) {
                    return Err(format!("kernel size must be positive, got {}", kernel_size));
                }
                if !(p_value.is_finite() && *p_value >= 1.) {
                    return Err(format!("p value must be at least 1, got {}", p_value));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn closs_is_bounded_and_zero_at_origin() {
        for &(sigma, p) in &[(0.5, 2.), (0.1, 1.), (2., 1.5), (1., 3.)] {
            let closs = Closs::with_params(sigma, p);

            assert_eq!(closs.element(0.), 0.);
            assert_eq!(closs.element_derivative(0.), 0.);

            for &r in &[-1e6, -10., -1., -0.3, 1e-9, 0.2, 1., 7., 1e6] {
                let l = closs.element(r);
                let dl = closs.element_derivative(r);
                assert!(l >= 0., "loss({}) = {} below zero", r, l);
                assert!(l <= closs.beta(), "loss({}) = {} not bounded by beta", r, l);
                assert!(dl.is_finite(), "dloss({}) = {} not finite", r, dl);
            }
        }
    }

    #[test]
    fn closs_is_monotone_in_residual_magnitude() {
        let closs = Closs::with_params(0.5, 2.);
        let mut last = 0.;

        for i in 0..200 {
            let r = i as f64 * 0.05;
            let l = closs.element(r);
            assert!(l >= last);
            assert_eq!(l, closs.element(-r));
            last = l;
        }
    }

    #[test]
    fn closs_symmetric_residuals() {
        let closs = Closs::with_params(0.5, 2.);
        let pred = array![[1., -1., 0.]];
        let target = array![[0., 0., 0.]];

        let d = closs.d(pred.view(), target.view());
        assert_eq!(closs.element(1.), closs.element(-1.));
        assert_eq!(closs.element(0.), 0.);
        assert_eq!(d[[0, 0]], -d[[0, 1]]);
        assert_eq!(d[[0, 2]], 0.);

        let a = closs.a(pred.view(), target.view());
        let expected = 2. * closs.element(1.) / 3.;
        assert!((a[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn closs_derivative_matches_finite_differences() {
        let h = 1e-6;
        for &p in &[1.5, 2., 3.] {
            let closs = Closs::with_params(0.7, p);
            for &r in &[-2., -0.4, 0.1, 0.9, 3.] {
                let numeric = (closs.element(r + h) - closs.element(r - h)) / (2. * h);
                assert!((numeric - closs.element_derivative(r)).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn outlier_saturates_where_mse_explodes() {
        let pred = array![[0.], [100.]];
        let target = array![[0.], [0.]];

        let mse = Losses::MeanSquaredError.wake().a(pred.view(), target.view());
        let closs = Losses::default().wake().a(pred.view(), target.view());

        assert_eq!(mse[1], 10000.);
        assert!(closs[1] <= Closs::with_params(0.5, 2.).beta());
    }

    #[test]
    fn validate_rejects_bad_kernel() {
        assert!(Losses::Closs { kernel_size: 0., p_value: 2. }.validate().is_err());
        assert!(Losses::Closs { kernel_size: 0.5, p_value: 0.5 }.validate().is_err());
        assert!(Losses::default().validate().is_ok());
    }
}
