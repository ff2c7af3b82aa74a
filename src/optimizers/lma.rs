use log::debug;
use ndarray::Array1;

use super::optimizer::{Optimizable, Optimizer, StoppingCriteria};
use super::solver::{Iteration, LevenbergMarquardt, Termination};
use crate::error::{ClossError, Result};

/// Levenberg-Marquardt that hands control back after every iteration.
///
/// ```text
/// Uninitialized --set_optimizable + set_stop_criteria--> Ready
/// Ready --step()--> Stepping --step() == false--> Finished
/// ```
///
/// The solver is created lazily on the first `step()` and torn down as soon
/// as it reports a termination, or when `result()` is called mid-run.
pub struct InterruptibleLma<'a, O: Optimizable + ?Sized> {
    optimizable: Option<&'a mut O>,
    stop: Option<StoppingCriteria>,
    solver: Option<LevenbergMarquardt>,
    iteration: usize,
    error: f64,
    optimum: Option<Array1<f64>>,
    termination: Option<Termination>,
    finished: bool,
}

impl<'a, O: Optimizable + ?Sized> InterruptibleLma<'a, O> {
    pub fn new() -> InterruptibleLma<'a, O> {
        InterruptibleLma {
            optimizable: None,
            stop: None,
            solver: None,
            iteration: 0,
            error: 0.,
            optimum: None,
            termination: None,
            finished: false,
        }
    }

    /// Starts over with a new target.
    pub fn set_optimizable(&mut self, optimizable: &'a mut O) -> &mut Self {
        self.optimizable = Some(optimizable);
        self.solver = None;
        self.iteration = 0;
        self.error = 0.;
        self.optimum = None;
        self.termination = None;
        self.finished = false;
        self
    }

    pub fn optimizable(&mut self) -> Option<&mut O> {
        self.optimizable.as_deref_mut()
    }

    pub fn is_ready(&self) -> bool {
        self.optimizable.is_some() && self.stop.is_some()
    }

    /// Index of the last completed iteration, counting from 1.
    pub fn current_iteration(&self) -> usize {
        self.iteration
    }

    /// Mean error at the last completed iteration.
    pub fn current_error(&self) -> f64 {
        self.error
    }

    /// Why the last run ended. `None` while running or after an interrupted run.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    fn reset(&mut self) -> Result<()> {
        let solver = match self.solver.take() {
            Some(solver) => solver,
            None => return Ok(()),
        };

        let report = solver.report();
        let optimum = solver.parameters().to_owned();
        if let Some(optimizable) = self.optimizable.as_deref_mut() {
            optimizable.set_parameters(optimum.view())?;
        }

        debug!("Terminated:");
        debug!("{} iterations", report.iterations);
        debug!("{} function evaluations", report.function_evaluations);
        debug!("{} Jacobi evaluations", report.jacobian_evaluations);
        debug!("Error = {}", report.error);
        match report.termination {
            Some(reason) => debug!("Reason: {}", reason),
            None => debug!("Reason: interrupted"),
        }

        self.termination = report.termination;
        self.optimum = Some(optimum);
        self.finished = true;
        Ok(())
    }
}

impl<'a, O: Optimizable + ?Sized> Optimizer for InterruptibleLma<'a, O> {
    fn set_stop_criteria(&mut self, stop: StoppingCriteria) -> &mut Self {
        self.stop = Some(stop);
        self
    }

    fn step(&mut self) -> Result<bool> {
        let stop = self.stop.ok_or(ClossError::Unconfigured)?;
        if self.finished {
            return Ok(false);
        }

        let outcome = {
            let optimizable = self
                .optimizable
                .as_deref_mut()
                .ok_or(ClossError::Unconfigured)?;

            let mut solver = match self.solver.take() {
                Some(solver) => solver,
                None => LevenbergMarquardt::new(&mut *optimizable, &stop)?,
            };

            let outcome = solver.iterate(&mut *optimizable);
            if let Ok(Iteration::Completed) = outcome {
                self.iteration = solver.iterations();
                self.error = solver.mean_error();
            }
            self.solver = Some(solver);
            outcome
        };

        match outcome {
            Ok(Iteration::Completed) => {
                debug!(
                    "Iteration #{}, training error = {:.4}",
                    self.iteration, self.error
                );
                Ok(true)
            }
            Ok(Iteration::Terminated(_)) => {
                self.reset()?;
                Ok(false)
            }
            Err(e) => {
                self.reset()?;
                Err(e)
            }
        }
    }

    fn result(&mut self) -> Result<Array1<f64>> {
        self.reset()?;

        let optimizable = self
            .optimizable
            .as_deref_mut()
            .ok_or(ClossError::Unconfigured)?;

        let optimum = match &self.optimum {
            Some(optimum) => optimum.clone(),
            None => optimizable.current_parameters(),
        };
        optimizable.set_parameters(optimum.view())?;
        Ok(optimum)
    }

    fn name(&self) -> String {
        String::from("Levenberg-Marquardt Algorithm")
    }
}
