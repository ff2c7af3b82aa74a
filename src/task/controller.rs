use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use uuid::Uuid;

use super::config::LearnParam;
use super::events::{IterationSnapshot, PredictionMode, StopReason, TrainingEvent};
use super::learn::{classification_rate, predict_grid, LearnTask};
use crate::dataset::{Mode, Partition, SampleStore};
use crate::error::{ClossError, Result};
use crate::nn::Network;
use crate::optimizers::{InterruptibleLma, Optimizable, Optimizer};

/// State shared between the controller and its worker thread.
#[derive(Clone)]
struct Shared {
    cancel: Arc<RwLock<bool>>,
    running: Arc<AtomicBool>,
    prediction_in_request: Arc<AtomicBool>,
    prediction_pending: Arc<AtomicBool>,
    events: Sender<TrainingEvent>,
}

impl Shared {
    fn emit(&self, event: TrainingEvent) {
        // Nobody listening is not an error for the trainer.
        let _ = self.events.send(event);
    }

    fn cancelled(&self) -> bool {
        *self.cancel.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_cancel(&self, value: bool) {
        *self.cancel.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn wants_prediction(&self) -> bool {
        let pending = self.prediction_pending.swap(false, Ordering::SeqCst);
        pending || self.prediction_in_request.load(Ordering::SeqCst)
    }
}

/// Runs training on one background thread at a time and reports through a
/// channel of [`TrainingEvent`]s.
///
/// The configured [`LearnTask`] moves into the worker for the length of a run
/// and is handed back when the worker is joined. `terminate` blocks on that
/// join, so it must never be called from the worker itself.
pub struct Controller {
    param: Option<LearnParam>,
    task: Option<LearnTask>,
    data: Option<Arc<SampleStore>>,
    worker: Option<JoinHandle<LearnTask>>,
    run_id: Option<Uuid>,
    shared: Shared,
}

impl Controller {
    pub fn new() -> (Controller, Receiver<TrainingEvent>) {
        let (events, receiver) = unbounded();

        let controller = Controller {
            param: None,
            task: None,
            data: None,
            worker: None,
            run_id: None,
            shared: Shared {
                cancel: Arc::new(RwLock::new(false)),
                running: Arc::new(AtomicBool::new(false)),
                prediction_in_request: Arc::new(AtomicBool::new(false)),
                prediction_pending: Arc::new(AtomicBool::new(false)),
                events,
            },
        };

        (controller, receiver)
    }

    /// Replaces the current task, stopping any run in progress first.
    pub fn configure(&mut self, param: LearnParam) {
        self.terminate();

        info!("[Configuring network]");
        param.log_summary();

        let task = LearnTask::new(param.clone());
        self.data = Some(task.data().clone());
        self.shared
            .emit(TrainingEvent::DatasetChanged(task.summary()));

        self.task = Some(task);
        self.param = Some(param.clone());

        if !param.disable_predict {
            self.request_prediction(PredictionMode::Sync);
        }
    }

    pub fn is_configured(&self) -> bool {
        self.param.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Identity of the current or most recent run.
    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn param(&self) -> Option<&LearnParam> {
        self.param.as_ref()
    }

    pub fn dataset(&self) -> Option<Arc<SampleStore>> {
        self.data.clone()
    }

    /// Starts a run. Does nothing and returns false when unconfigured or
    /// already running.
    pub fn run_async(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.reap();

        let mut task = match self.task.take() {
            Some(task) => task,
            None => return false,
        };

        let run_id = Uuid::new_v4();
        let shared = self.shared.clone();
        shared.set_cancel(false);
        shared.running.store(true, Ordering::SeqCst);

        let worker_name = format!("closs-trainer-{}", run_id);
        let spawned = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || {
                let reason = match train(&mut task, &shared, run_id) {
                    Ok(reason) => reason,
                    Err(e) => {
                        error!("[Training run '{}' failed with error {}]", run_id, e);
                        StopReason::Failed(e.to_string())
                    }
                };
                info!("[Training run '{}' stopped: {:?}]", run_id, reason);

                shared.set_cancel(false);
                shared.running.store(false, Ordering::SeqCst);
                shared.emit(TrainingEvent::Stopped { run_id, reason });
                task
            });

        match spawned {
            Ok(handle) => {
                info!("[Spawned worker '{}']", worker_name);
                self.worker = Some(handle);
                self.run_id = Some(run_id);
                true
            }
            Err(e) => {
                error!("[Worker '{}' failed to spawn with error {}]", worker_name, e);
                self.shared.running.store(false, Ordering::SeqCst);
                self.rebuild();
                false
            }
        }
    }

    /// Asks the worker to stop after its current iteration and waits for it.
    pub fn terminate(&mut self) {
        if self.worker.is_none() {
            return;
        }

        if self.is_running() {
            info!("[Cancelling training run]");
            self.shared.set_cancel(true);
        }
        self.join();
    }

    /// `Sync` computes the grid right away when no run holds the network and
    /// otherwise asks the worker for one grid after its next iteration.
    /// `Async` makes the worker emit a grid after every iteration from now on.
    pub fn request_prediction(&mut self, mode: PredictionMode) {
        if !self.is_configured() {
            return;
        }

        match mode {
            PredictionMode::Async => {
                self.shared
                    .prediction_in_request
                    .store(true, Ordering::SeqCst);
            }
            PredictionMode::Sync if self.is_running() => {
                self.shared.prediction_pending.store(true, Ordering::SeqCst);
            }
            PredictionMode::Sync => {
                self.reap();
                if let Some(task) = self.task.as_mut() {
                    match task.prediction() {
                        Ok(Some(grid)) => self.shared.emit(TrainingEvent::PredictionUpdated(grid)),
                        Ok(None) => {}
                        Err(e) => warn!("[Prediction failed: {}]", e),
                    }
                }
            }
        }
    }

    /// Stops the per-iteration predictions requested with `Async`.
    pub fn cancel_prediction_requests(&mut self) {
        self.shared
            .prediction_in_request
            .store(false, Ordering::SeqCst);
        self.shared.prediction_pending.store(false, Ordering::SeqCst);
    }

    pub fn training_set(&self) -> Option<Partition> {
        self.data
            .as_ref()
            .map(|data| data.partition(Mode::Training).clone())
    }

    pub fn testing_set(&self) -> Option<Partition> {
        self.data
            .as_ref()
            .map(|data| data.partition(Mode::Testing).clone())
    }

    /// The configured task, unless a run currently owns it.
    pub fn task(&mut self) -> Option<&mut LearnTask> {
        if self.is_running() {
            return None;
        }
        self.reap();
        self.task.as_mut()
    }

    /// Joins a worker that has already finished.
    fn reap(&mut self) {
        if !self.is_running() {
            self.join();
        }
    }

    fn join(&mut self) {
        let handle = match self.worker.take() {
            Some(handle) => handle,
            None => return,
        };

        match handle.join() {
            Ok(task) => self.task = Some(task),
            Err(_) => {
                error!("[Training worker panicked, rebuilding the task]");
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_cancel(false);
                self.rebuild();
            }
        }
    }

    fn rebuild(&mut self) {
        if let Some(param) = self.param.clone() {
            let task = LearnTask::new(param);
            self.data = Some(task.data().clone());
            self.task = Some(task);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn train(task: &mut LearnTask, shared: &Shared, run_id: Uuid) -> Result<StopReason> {
    let data = task.data().clone();
    if !task.has_training_data() {
        warn!("[No training samples, nothing to optimize]");
        return Ok(StopReason::NoData);
    }

    task.reinitialize()?;
    info!("[Network initialized]");

    let stop = task.stop_criteria();
    let resolution = task.param().prediction_resolution;

    let mut lma = InterruptibleLma::new();
    lma.set_optimizable(task.network_mut())
        .set_stop_criteria(stop);

    let outcome = drive(&mut lma, &data, shared, run_id, resolution);
    let finalized = lma.result();
    let termination = lma.termination();
    drop(lma);

    let cancelled = outcome?;
    finalized?;

    if let Some(rate) = classification_rate(task.network_mut(), &data, Mode::Testing)? {
        info!(
            "[Misclassification rate on the testing set: {:.2}%]",
            100. * (1. - rate)
        );
    }

    Ok(match (cancelled, termination) {
        (false, Some(termination)) => StopReason::Converged(termination),
        _ => StopReason::Cancelled,
    })
}

/// Steps until the optimizer finishes or a cancel is seen. Returns whether
/// the run was cancelled.
fn drive(
    lma: &mut InterruptibleLma<'_, Network>,
    data: &SampleStore,
    shared: &Shared,
    run_id: Uuid,
    resolution: usize,
) -> Result<bool> {
    loop {
        let stepped = {
            let _ctx = data.enter_training_mode(true);
            lma.step()?
        };
        if !stepped {
            return Ok(false);
        }

        let iteration = lma.current_iteration();
        let training_error = lma.current_error();
        info!(
            "[Iteration {}, training error = {:.4}]",
            iteration, training_error
        );

        let network = lma.optimizable().ok_or(ClossError::Unconfigured)?;

        let testing_error = {
            let _ctx = data.enter_testing_mode(true);
            if data.samples() > 0 {
                Some(network.error()?)
            } else {
                None
            }
        };

        shared.emit(TrainingEvent::IterationFinished(IterationSnapshot {
            run_id,
            iteration,
            training_error,
            testing_error,
            training_rate: classification_rate(network, data, Mode::Training)?,
            testing_rate: classification_rate(network, data, Mode::Testing)?,
        }));

        if shared.wants_prediction() {
            if let Some(grid) = predict_grid(network, data.input_range(), resolution)? {
                shared.emit(TrainingEvent::PredictionUpdated(grid));
            }
        }

        if shared.cancelled() {
            info!("[Training cancelled after iteration {}]", iteration);
            return Ok(true);
        }
    }
}
