use std::sync::Arc;

use closs::dataset::{DataSource, Partition};
use closs::f;
use closs::layers::Layers;
use closs::nn::Network;
use closs::optimizers::{InterruptibleLma, Optimizer, StoppingCriteria};
use closs::{Activations, Losses};
use ndarray::array;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    // One-hot XOR: [1, 0] for true, [0, 1] for false.
    let xor = Partition::new(
        array![[0., 1.], [1., 1.], [1., 0.], [0., 0.]],
        array![[1., 0.], [0., 1.], [1., 0.], [0., 1.]],
    )
    .unwrap();
    let data = Arc::new(
        DataSource::Table {
            training: xor.clone(),
            testing: xor.clone(),
        }
        .load()
        .unwrap(),
    );

    let mut nn = Network::new(2);
    nn.add_layer(Layers::Dense {
        units: 3,
        activation: Activations::Tanh,
        bias: true,
        std_dev: 0.5,
    })
    .add_layer(Layers::Dense {
        units: 2,
        activation: Activations::Logistic,
        bias: true,
        std_dev: 0.5,
    })
    .set_loss(Losses::Closs {
        kernel_size: 0.5,
        p_value: 2.,
    })
    .set_training_set(data.clone());
    nn.initialize(&mut StdRng::seed_from_u64(1)).unwrap();

    let mut stop = StoppingCriteria::new();
    stop.set_maximal_iterations(100)
        .set_minimal_value_differences(1e-10);

    let mut optimizer = InterruptibleLma::new();
    optimizer.set_optimizable(&mut nn).set_stop_criteria(stop);
    while optimizer.step().unwrap() {
        println!(
            "({}) Error = {:.6}",
            optimizer.current_iteration(),
            optimizer.current_error()
        );
    }
    optimizer.result().unwrap();
    drop(optimizer);

    let mut correct = 0;
    for (x, y) in xor.inputs.outer_iter().zip(xor.targets.outer_iter()) {
        let y_pred = nn.predict(x).unwrap();
        let choice_pred = f::argmax(&y_pred.to_vec());
        let actual = f::argmax(&y.to_vec());

        println!("{} -> {}", x, y_pred);
        if choice_pred == actual {
            correct += 1;
        }
    }

    println!("Accuracy: {}%", correct as f64 / 4. * 100.);
}
