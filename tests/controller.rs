use std::time::Duration;

use closs::dataset::{DataSource, Partition};
use closs::optimizers::StoppingCriteria;
use closs::task::{LayerDesc, PredictionMode, StopReason};
use closs::{Activations, Controller, LearnParam, TrainingEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ndarray::Array2;

const PATIENCE: Duration = Duration::from_secs(60);

fn clusters() -> Partition {
    let n = 8;
    let inputs = Array2::from_shape_fn((2 * n, 2), |(row, column)| {
        let centre = if row < n { 0.25 } else { 0.75 };
        centre + 0.04 * ((row * 3 + column) as f64).cos()
    });
    let targets = Array2::from_shape_fn((2 * n, 1), |(row, _)| if row < n { -1. } else { 1. });
    Partition::new(inputs, targets).unwrap()
}

fn small_param(source: DataSource, iterations: usize) -> LearnParam {
    let mut stop = StoppingCriteria::new();
    stop.set_maximal_iterations(iterations);

    let mut param = LearnParam::new();
    param
        .set_closs(0.5, 2.)
        .set_data_source(source)
        .set_rand_seed(17)
        .set_weight_std_dev(0.5)
        .set_prediction_resolution(5)
        .set_stopping_criteria(stop)
        .set_layers(vec![
            LayerDesc::input(),
            LayerDesc::hidden(4, Activations::Tanh),
            LayerDesc::output(Activations::Tanh),
        ]);
    param
}

/// Everything up to and including the next `Stopped`.
fn until_stopped(events: &Receiver<TrainingEvent>) -> Vec<TrainingEvent> {
    let mut seen = vec![];
    loop {
        let event = events
            .recv_timeout(PATIENCE)
            .expect("worker never reported that it stopped");
        let stopped = matches!(event, TrainingEvent::Stopped { .. });
        seen.push(event);
        if stopped {
            return seen;
        }
    }
}

fn drain(events: &Receiver<TrainingEvent>) -> Vec<TrainingEvent> {
    events.try_iter().collect()
}

#[test]
fn configure_publishes_dataset_and_prediction() {
    let (mut controller, events) = Controller::new();
    controller.configure(small_param(DataSource::Xor, 10));

    let seen = drain(&events);
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        TrainingEvent::DatasetChanged(summary) => {
            assert_eq!(summary.training.samples(), 4);
            assert_eq!(summary.testing.samples(), 4);
            assert_eq!(summary.label_count, 2);
        }
        other => panic!("unexpected {:?}", other),
    }
    match &seen[1] {
        TrainingEvent::PredictionUpdated(grid) => assert_eq!(grid.points.len(), 25),
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(controller.training_set().unwrap().samples(), 4);
    assert!(!controller.is_running());
}

#[test]
fn training_error_is_non_increasing() {
    let (mut controller, events) = Controller::new();
    let mut param = small_param(
        DataSource::Table {
            training: clusters(),
            testing: clusters(),
        },
        30,
    );
    param.set_disable_predict(true);
    controller.configure(param);
    drain(&events);

    assert!(controller.run_async());
    let seen = until_stopped(&events);
    let run_id = controller.run_id().unwrap();

    let snapshots: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            TrainingEvent::IterationFinished(snapshot) => Some(snapshot.clone()),
            _ => None,
        })
        .collect();

    assert!(!snapshots.is_empty());
    assert!(snapshots.len() <= 30);
    for (i, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.run_id, run_id);
        assert_eq!(snapshot.iteration, i + 1);
        assert!(snapshot.testing_error.is_some());
        assert!(snapshot.testing_rate.is_some());
    }
    for pair in snapshots.windows(2) {
        assert!(pair[1].training_error <= pair[0].training_error);
    }

    match seen.last() {
        Some(TrainingEvent::Stopped { run_id: id, reason }) => {
            assert_eq!(*id, run_id);
            assert!(matches!(reason, StopReason::Converged(_)), "{:?}", reason);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn empty_source_stops_without_progress() {
    let (mut controller, events) = Controller::new();
    controller.configure(small_param(DataSource::None, 10));

    let configured = drain(&events);
    match &configured[0] {
        TrainingEvent::DatasetChanged(summary) => {
            assert_eq!(summary.training.samples(), 0);
            assert_eq!(summary.testing.samples(), 0);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(controller.run_async());
    let seen = until_stopped(&events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        seen[0],
        TrainingEvent::Stopped {
            reason: StopReason::NoData,
            ..
        }
    ));
}

#[test]
fn rejected_configuration_still_allows_reconfiguring() {
    let (mut controller, events) = Controller::new();
    let mut bad = small_param(DataSource::Xor, 10);
    bad.set_closs(-2., 2.);
    controller.configure(bad);

    assert!(controller.is_configured());
    assert_eq!(controller.training_set().unwrap().samples(), 0);

    controller.configure(small_param(DataSource::Xor, 10));
    assert_eq!(controller.training_set().unwrap().samples(), 4);
    drain(&events);
}

#[test]
fn run_async_needs_configuration_and_runs_once() {
    let (mut controller, events) = Controller::new();
    assert!(!controller.run_async());

    controller.configure(small_param(
        DataSource::TwoSpirals {
            density: 1,
            max_diameter: 1.,
        },
        0,
    ));
    assert!(controller.run_async());
    assert!(!controller.run_async());

    controller.terminate();
    assert!(!controller.is_running());
    drain(&events);
}

#[test]
fn no_progress_after_terminate() {
    let (mut controller, events) = Controller::new();
    // The full-size spiral net is far from converged after a few iterations.
    let mut param = small_param(DataSource::default(), 0);
    param
        .set_layers(LearnParam::default().layers)
        .set_weight_std_dev(0.05)
        .set_disable_predict(true);
    controller.configure(param);
    drain(&events);

    assert!(controller.run_async());
    let first = events.recv_timeout(PATIENCE).unwrap();
    assert!(matches!(first, TrainingEvent::IterationFinished(_)));

    controller.terminate();
    assert!(!controller.is_running());

    let rest = drain(&events);
    let stops = rest
        .iter()
        .position(|event| matches!(event, TrainingEvent::Stopped { .. }))
        .expect("terminate returned before the worker stopped");
    assert_eq!(stops, rest.len() - 1);
    assert!(matches!(
        rest[stops],
        TrainingEvent::Stopped {
            reason: StopReason::Cancelled,
            ..
        }
    ));

    assert!(matches!(
        events.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Timeout)
    ));

    // A second run gets a fresh identity.
    let old = controller.run_id().unwrap();
    assert!(controller.run_async());
    assert_ne!(controller.run_id().unwrap(), old);
    controller.terminate();
}

#[test]
fn async_predictions_follow_iterations() {
    let (mut controller, events) = Controller::new();
    let mut param = small_param(DataSource::Xor, 3);
    param.set_disable_predict(true);
    controller.configure(param);
    drain(&events);

    controller.request_prediction(PredictionMode::Async);
    assert!(controller.run_async());
    let seen = until_stopped(&events);

    let iterations = seen
        .iter()
        .filter(|event| matches!(event, TrainingEvent::IterationFinished(_)))
        .count();
    let grids = seen
        .iter()
        .filter(|event| matches!(event, TrainingEvent::PredictionUpdated(_)))
        .count();
    assert!(iterations > 0);
    assert_eq!(grids, iterations);

    controller.cancel_prediction_requests();
    controller.request_prediction(PredictionMode::Sync);
    let after = drain(&events);
    assert_eq!(after.len(), 1);
    assert!(matches!(after[0], TrainingEvent::PredictionUpdated(_)));
}

#[test]
fn task_is_back_after_the_run() {
    let (mut controller, events) = Controller::new();
    controller.configure(small_param(DataSource::Xor, 2));
    drain(&events);

    assert!(controller.run_async());
    until_stopped(&events);

    let task = controller.task().unwrap();
    assert_eq!(task.network().inputs(), 2);
    assert_eq!(task.param().rand_seed, 17);
}
