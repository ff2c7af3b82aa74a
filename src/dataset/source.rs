use std::f64::consts::PI;

use ndarray::{array, Array2};
use serde::{Deserialize, Serialize};

use super::store::{Partition, SampleStore};
use crate::error::Result;
use crate::f;

/// Where a configuration's samples come from.
///
/// `Table` is the hand-off point for externally loaded data (CSV readers and
/// the like); it may carry an empty testing partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DataSource {
    TwoSpirals { density: usize, max_diameter: f64 },
    Xor,
    Table { training: Partition, testing: Partition },
    None,
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::TwoSpirals {
            density: 2,
            max_diameter: 1.,
        }
    }
}

impl DataSource {
    pub fn load(&self) -> Result<SampleStore> {
        match self {
            DataSource::TwoSpirals {
                density,
                max_diameter,
            } => {
                let (training, testing) = two_spirals(*density, *max_diameter);
                SampleStore::new(training, testing)
            }
            DataSource::Xor => {
                let xor = Partition::new(
                    array![[0., 1.], [0., 0.], [1., 1.], [1., 0.]],
                    array![[1.], [0.], [0.], [1.]],
                )?;
                SampleStore::new(xor.clone(), xor)
            }
            DataSource::Table { training, testing } => {
                let training = Partition::new(training.inputs.clone(), training.targets.clone())?;
                let testing = Partition::new(testing.inputs.clone(), testing.targets.clone())?;
                SampleStore::new(training, testing)
            }
            DataSource::None => Ok(SampleStore::empty(0, 0)),
        }
    }
}

/// Two interlocked spirals labelled `1` and `-1` (CMU benchmark layout).
///
/// Even steps go to training and odd steps to testing, each contributing a
/// point and its mirror image. Inputs of both partitions are scaled with one
/// shared range onto `[0, 1]`, not per partition, so both sets share one
/// coordinate frame.
pub fn two_spirals(density: usize, max_diameter: f64) -> (Partition, Partition) {
    let density = density.max(1);
    let points = 96 * density;
    let d = density as f64;

    let mut train: Vec<[f64; 3]> = Vec::with_capacity(points + 1);
    let mut test: Vec<[f64; 3]> = Vec::with_capacity(points + 1);

    for i in 0..=points {
        let angle = i as f64 * PI / (16. * d);
        let radius = max_diameter * (104. * d - i as f64) / (104. * d);
        let x = radius * angle.cos();
        let y = radius * angle.sin();

        if i == points {
            train.push([x, y, 1.]);
            test.push([-x, -y, -1.]);
        } else if i % 2 == 0 {
            train.push([x, y, 1.]);
            train.push([-x, -y, -1.]);
        } else {
            test.push([x, y, 1.]);
            test.push([-x, -y, -1.]);
        }
    }

    let (mut train_in, train_out) = split_rows(&train);
    let (mut test_in, test_out) = split_rows(&test);

    if let Some(range) = f::joint_range(&[train_in.view(), test_in.view()]) {
        f::rescale(&mut train_in, range, 0., 1.);
        f::rescale(&mut test_in, range, 0., 1.);
    }

    (
        Partition {
            inputs: train_in,
            targets: train_out,
        },
        Partition {
            inputs: test_in,
            targets: test_out,
        },
    )
}

fn split_rows(rows: &[[f64; 3]]) -> (Array2<f64>, Array2<f64>) {
    let inputs = Array2::from_shape_fn((rows.len(), 2), |(r, c)| rows[r][c]);
    let targets = Array2::from_shape_fn((rows.len(), 1), |(r, _)| rows[r][2]);
    (inputs, targets)
}
