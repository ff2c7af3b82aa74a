use closs::optimizers::StoppingCriteria;
use closs::task::{PredictionMode, StopReason};
use closs::{Controller, LearnParam, TrainingEvent};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut stop = StoppingCriteria::new();
    stop.set_maximal_iterations(200);

    let mut param = LearnParam::new();
    param.set_closs(0.5, 2.).set_stopping_criteria(stop);

    let (mut controller, events) = Controller::new();
    controller.configure(param);
    controller.request_prediction(PredictionMode::Async);
    controller.run_async();

    for event in events.iter() {
        match event {
            TrainingEvent::IterationFinished(snapshot) => println!(
                "({}) training {:.4} testing {:?} accuracy {:?}",
                snapshot.iteration,
                snapshot.training_error,
                snapshot.testing_error,
                snapshot.testing_rate
            ),
            TrainingEvent::PredictionUpdated(grid) => {
                let positive = grid.points.iter().filter(|p| p[1] > 0.).count();
                println!("    grid: {}/{} positive", positive, grid.points.len());
            }
            TrainingEvent::DatasetChanged(summary) => println!(
                "dataset: {} training, {} testing samples",
                summary.training.samples(),
                summary.testing.samples()
            ),
            TrainingEvent::Stopped { reason, .. } => {
                match reason {
                    StopReason::Converged(termination) => println!("converged: {}", termination),
                    other => println!("stopped: {:?}", other),
                }
                break;
            }
        }
    }
}
