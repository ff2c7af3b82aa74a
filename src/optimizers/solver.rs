use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::optimizer::{Optimizable, StoppingCriteria};
use crate::error::{ClossError, Result};

/// Infinity norm of the gradient below which a point counts as stationary.
pub const GRADIENT_TOLERANCE: f64 = 1e-10;
/// Step threshold used when every stopping criterion is switched off.
pub const AUTOMATIC_STEP_TOLERANCE: f64 = 1e-6;

const INITIAL_DAMPING: f64 = 1e-3;
const MAXIMAL_DAMPING: f64 = 1e30;
// Errors at or below this are treated as exact fits and drop out of the Jacobian.
const ZERO_ERROR: f64 = 1e-300;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    RelativeImprovement,
    RelativeStep,
    Gradient,
    MaxIterations,
    TooStringent,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Termination::RelativeImprovement => "relative function improvement is below threshold",
            Termination::RelativeStep => "relative step is below threshold",
            Termination::Gradient => "gradient is below threshold",
            Termination::MaxIterations => "maximal number of iterations was taken",
            Termination::TooStringent => {
                "stopping conditions are too stringent, further improvement is impossible"
            }
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Completed,
    Terminated(Termination),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Report {
    pub iterations: usize,
    pub function_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub error: f64,
    pub termination: Option<Termination>,
}

/// Levenberg-Marquardt on the square roots of the per-example errors.
///
/// With `r_i = sqrt(e_i)` the least-squares objective `sum r_i^2` is the sum
/// of the example errors, so an accepted step never raises the mean error.
/// The solver is driven from outside: every call to [`iterate`] runs exactly
/// one accepted step (possibly after several rejected trial steps) or reports
/// why it stopped.
///
/// [`iterate`]: LevenbergMarquardt::iterate
pub struct LevenbergMarquardt {
    x: Array1<f64>,
    errors: Array1<f64>,
    jacobian: Array2<f64>,
    gradient: Array1<f64>,
    cost: f64,
    damping: f64,
    damping_growth: f64,
    maximal_iterations: usize,
    step_tolerance: f64,
    value_tolerance: f64,
    iterations: usize,
    function_evaluations: usize,
    jacobian_evaluations: usize,
    pending: Option<Termination>,
    termination: Option<Termination>,
}

impl LevenbergMarquardt {
    /// Linearizes `optimizable` at its current parameters.
    pub fn new<O: Optimizable + ?Sized>(
        optimizable: &mut O,
        stop: &StoppingCriteria,
    ) -> Result<LevenbergMarquardt> {
        let x = optimizable.current_parameters();
        let (errors, gradients) = optimizable.errors_and_jacobian()?;

        let step_tolerance = if stop.is_unbounded() {
            AUTOMATIC_STEP_TOLERANCE
        } else {
            stop.minimal_search_space_step.max(0.)
        };

        let mut solver = LevenbergMarquardt {
            jacobian: Array2::zeros((0, x.len())),
            gradient: Array1::zeros(x.len()),
            x,
            errors: Array1::zeros(0),
            cost: 0.,
            damping: INITIAL_DAMPING,
            damping_growth: 2.,
            maximal_iterations: stop.maximal_iterations,
            step_tolerance,
            value_tolerance: stop.minimal_value_differences.max(0.),
            iterations: 0,
            function_evaluations: 1,
            jacobian_evaluations: 1,
            pending: None,
            termination: None,
        };
        solver.linearize(errors, gradients)?;

        let largest_diagonal = solver
            .jacobian
            .map_axis(Axis(0), |column| column.dot(&column))
            .fold(0., |a: f64, v| a.max(*v));
        if largest_diagonal > 0. {
            solver.damping = INITIAL_DAMPING * largest_diagonal;
        }

        if inf_norm(solver.gradient.view()) <= GRADIENT_TOLERANCE {
            solver.pending = Some(Termination::Gradient);
        }

        Ok(solver)
    }

    /// Runs until one step is accepted or the run ends.
    ///
    /// On `Completed` the optimizable holds the accepted parameters. Once a
    /// termination has been reported every further call reports it again
    /// without touching the optimizable.
    pub fn iterate<O: Optimizable + ?Sized>(&mut self, optimizable: &mut O) -> Result<Iteration> {
        if let Some(reason) = self.termination {
            return Ok(Iteration::Terminated(reason));
        }
        if let Some(reason) = self.pending.take() {
            return Ok(self.terminate(reason));
        }
        if self.maximal_iterations > 0 && self.iterations >= self.maximal_iterations {
            return Ok(self.terminate(Termination::MaxIterations));
        }

        let normal = self.jacobian.t().dot(&self.jacobian);
        let descent = self.gradient.mapv(|g| -g);

        loop {
            let mut damped = normal.clone();
            damped.diag_mut().map_inplace(|d| *d += self.damping);

            let step = match cholesky_solve(&damped, &descent) {
                Some(step) => step,
                None => {
                    if self.increase_damping() {
                        return Ok(self.terminate(Termination::TooStringent));
                    }
                    continue;
                }
            };

            let step_norm = step.dot(&step).sqrt();
            if self.step_tolerance > 0. && step_norm <= self.relative_step_bound() {
                return Ok(self.terminate(Termination::RelativeStep));
            }

            let candidate = &self.x + &step;
            optimizable.set_parameters(candidate.view())?;
            let errors = optimizable.errors()?;
            self.function_evaluations += 1;

            if errors.iter().any(|e| !e.is_finite()) {
                optimizable.set_parameters(self.x.view())?;
                return Err(ClossError::Solver(format!(
                    "non-finite error at iteration {}",
                    self.iterations + 1
                )));
            }

            let cost = 0.5 * errors.sum();
            let predicted = 0.5 * step.dot(&(self.damping * &step + &descent));
            let gain = if predicted > 0. {
                (self.cost - cost) / predicted
            } else {
                -1.
            };

            if gain > 0. {
                let (errors, gradients) = optimizable.errors_and_jacobian()?;
                self.jacobian_evaluations += 1;

                let previous = self.cost;
                self.x = candidate;
                self.linearize(errors, gradients)?;

                self.damping *= (1. - (2. * gain - 1.).powi(3)).max(1. / 3.);
                self.damping_growth = 2.;
                self.iterations += 1;
                self.pending = self.converged(previous, step_norm);

                return Ok(Iteration::Completed);
            }

            optimizable.set_parameters(self.x.view())?;
            if self.increase_damping() {
                return Ok(self.terminate(Termination::TooStringent));
            }
        }
    }

    pub fn parameters(&self) -> ArrayView1<f64> {
        self.x.view()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn mean_error(&self) -> f64 {
        self.errors.mean().unwrap_or(0.)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn report(&self) -> Report {
        Report {
            iterations: self.iterations,
            function_evaluations: self.function_evaluations,
            jacobian_evaluations: self.jacobian_evaluations,
            error: self.mean_error(),
            termination: self.termination,
        }
    }

    fn linearize(&mut self, errors: Array1<f64>, mut gradients: Array2<f64>) -> Result<()> {
        if errors.len() != gradients.nrows() || gradients.ncols() != self.x.len() {
            return Err(ClossError::Solver(format!(
                "jacobian is {:?} for {} errors and {} parameters",
                gradients.dim(),
                errors.len(),
                self.x.len()
            )));
        }
        if errors.iter().chain(gradients.iter()).any(|v| !v.is_finite()) {
            return Err(ClossError::Solver(format!(
                "non-finite error or gradient after {} iterations",
                self.iterations
            )));
        }

        let residuals = errors.mapv(|e| e.max(0.).sqrt());
        for (mut row, (e, r)) in gradients
            .outer_iter_mut()
            .zip(errors.iter().zip(residuals.iter()))
        {
            if *e <= ZERO_ERROR {
                row.fill(0.);
            } else {
                row.mapv_inplace(|g| g / (2. * r));
            }
        }

        self.gradient = gradients.t().dot(&residuals);
        self.cost = 0.5 * errors.sum();
        self.jacobian = gradients;
        self.errors = errors;
        Ok(())
    }

    fn converged(&self, previous: f64, step_norm: f64) -> Option<Termination> {
        let improvement = previous - self.cost;

        if self.value_tolerance > 0.
            && improvement <= self.value_tolerance * previous.max(self.cost).max(1.)
        {
            return Some(Termination::RelativeImprovement);
        }
        if self.step_tolerance > 0. && step_norm <= self.relative_step_bound() {
            return Some(Termination::RelativeStep);
        }
        if inf_norm(self.gradient.view()) <= GRADIENT_TOLERANCE {
            return Some(Termination::Gradient);
        }
        if self.maximal_iterations > 0 && self.iterations >= self.maximal_iterations {
            return Some(Termination::MaxIterations);
        }
        None
    }

    fn relative_step_bound(&self) -> f64 {
        self.step_tolerance * (self.x.dot(&self.x).sqrt() + self.step_tolerance)
    }

    /// True once the damping has grown past any useful value.
    fn increase_damping(&mut self) -> bool {
        self.damping *= self.damping_growth;
        self.damping_growth *= 2.;
        !self.damping.is_finite() || self.damping > MAXIMAL_DAMPING
    }

    fn terminate(&mut self, reason: Termination) -> Iteration {
        self.termination = Some(reason);
        Iteration::Terminated(reason)
    }
}

fn inf_norm(x: ArrayView1<f64>) -> f64 {
    x.fold(0., |a: f64, v| a.max(v.abs()))
}

/// Solves `a . x = b` for symmetric positive definite `a`, `None` when the
/// factorization breaks down.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let mut l = Array2::<f64>::zeros((n, n));

    for j in 0..n {
        let mut diagonal = a[[j, j]];
        for k in 0..j {
            diagonal -= l[[j, k]] * l[[j, k]];
        }
        if !(diagonal > 0.) || !diagonal.is_finite() {
            return None;
        }
        let diagonal = diagonal.sqrt();
        l[[j, j]] = diagonal;

        for i in j + 1..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / diagonal;
        }
    }

    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * y[k];
        }
        y[i] = s / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in i + 1..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }

    Some(x)
}
