use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ClossError, Result};
use crate::f;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Testing,
}

impl Mode {
    fn from_flag(in_training_mode: bool) -> Mode {
        if in_training_mode {
            Mode::Training
        } else {
            Mode::Testing
        }
    }
}

/// Paired input and target tables, one row per sample.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Partition {
    pub inputs: Array2<f64>,
    pub targets: Array2<f64>,
}

impl Partition {
    pub fn new(inputs: Array2<f64>, targets: Array2<f64>) -> Result<Partition> {
        if inputs.nrows() != targets.nrows() {
            return Err(ClossError::Data(format!(
                "{} input rows but {} target rows",
                inputs.nrows(),
                targets.nrows()
            )));
        }

        Ok(Partition { inputs, targets })
    }

    pub fn empty(inputs: usize, outputs: usize) -> Partition {
        Partition {
            inputs: Array2::zeros((0, inputs)),
            targets: Array2::zeros((0, outputs)),
        }
    }

    pub fn samples(&self) -> usize {
        self.inputs.nrows()
    }
}

/// Training and testing tables behind one mode flag.
///
/// The generic accessors (`samples`, `instance`, `target`, `batch`) read
/// whichever partition the flag selects. The flag only moves through a
/// [`ContextManager`], which puts it back when dropped.
#[derive(Debug)]
pub struct SampleStore {
    training: Partition,
    testing: Partition,
    in_training_mode: AtomicBool,
    mode_lock: Mutex<()>,
    input_range: (f64, f64),
    output_range: (f64, f64),
    output_label_count: usize,
}

impl SampleStore {
    pub fn new(training: Partition, testing: Partition) -> Result<SampleStore> {
        if training.inputs.ncols() != testing.inputs.ncols()
            || training.targets.ncols() != testing.targets.ncols()
        {
            return Err(ClossError::Data(format!(
                "training is {}x{} columns but testing is {}x{}",
                training.inputs.ncols(),
                training.targets.ncols(),
                testing.inputs.ncols(),
                testing.targets.ncols()
            )));
        }

        let input_range = f::joint_range(&[training.inputs.view(), testing.inputs.view()])
            .unwrap_or((0., 1.));
        let output_range = f::joint_range(&[training.targets.view(), testing.targets.view()])
            .unwrap_or((0., 1.));

        let output_label_count = match training.targets.ncols() {
            0 => 0,
            1 => {
                let mut labels = f::distinct_labels(training.targets.view());
                labels.extend(f::distinct_labels(testing.targets.view()));
                labels.sort_by(|a, b| a.total_cmp(b));
                labels.dedup();
                labels.len()
            }
            n => n,
        };

        Ok(SampleStore {
            training,
            testing,
            in_training_mode: AtomicBool::new(true),
            mode_lock: Mutex::new(()),
            input_range,
            output_range,
            output_label_count,
        })
    }

    pub fn empty(inputs: usize, outputs: usize) -> SampleStore {
        SampleStore {
            training: Partition::empty(inputs, outputs),
            testing: Partition::empty(inputs, outputs),
            in_training_mode: AtomicBool::new(true),
            mode_lock: Mutex::new(()),
            input_range: (0., 1.),
            output_range: (0., 1.),
            output_label_count: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_flag(self.in_training_mode.load(Ordering::SeqCst))
    }

    pub fn in_training_mode(&self) -> bool {
        self.mode() == Mode::Training
    }

    /// Scoped switch to the training partition. With `multi_thread_safe` the
    /// store's mode lock is held until the returned guard drops.
    pub fn enter_training_mode(&self, multi_thread_safe: bool) -> ContextManager<'_> {
        ContextManager::enter(self, Mode::Training, multi_thread_safe)
    }

    pub fn enter_testing_mode(&self, multi_thread_safe: bool) -> ContextManager<'_> {
        ContextManager::enter(self, Mode::Testing, multi_thread_safe)
    }

    pub fn enter(&self, mode: Mode, multi_thread_safe: bool) -> ContextManager<'_> {
        ContextManager::enter(self, mode, multi_thread_safe)
    }

    /// A partition regardless of the current mode.
    pub fn partition(&self, mode: Mode) -> &Partition {
        match mode {
            Mode::Training => &self.training,
            Mode::Testing => &self.testing,
        }
    }

    fn active(&self) -> &Partition {
        self.partition(self.mode())
    }

    pub fn samples(&self) -> usize {
        self.active().samples()
    }

    pub fn inputs(&self) -> usize {
        self.training.inputs.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.training.targets.ncols()
    }

    pub fn instance(&self, i: usize) -> ArrayView1<f64> {
        self.active().inputs.row(i)
    }

    pub fn target(&self, i: usize) -> ArrayView1<f64> {
        self.active().targets.row(i)
    }

    /// Every sample of the active partition as `(inputs, targets)`.
    pub fn batch(&self) -> (ArrayView2<f64>, ArrayView2<f64>) {
        let partition = self.active();
        (partition.inputs.view(), partition.targets.view())
    }

    pub fn input_range(&self) -> (f64, f64) {
        self.input_range
    }

    pub fn output_range(&self) -> (f64, f64) {
        self.output_range
    }

    pub fn output_label_count(&self) -> usize {
        self.output_label_count
    }

    /// Decision threshold for single-output classification.
    pub fn label_threshold(&self) -> f64 {
        (self.output_range.0 + self.output_range.1) / 2.
    }
}

/// Guard returned by `enter_*_mode`.
///
/// Sets the mode on creation and restores exactly the mode it replaced on
/// drop, so nested guards unwind correctly as long as inner ones drop first.
/// Two nested guards on the same thread must not both lock.
#[must_use = "the previous mode is restored as soon as the guard is dropped"]
pub struct ContextManager<'a> {
    store: &'a SampleStore,
    old_mode: bool,
    _lock: Option<MutexGuard<'a, ()>>,
}

impl<'a> ContextManager<'a> {
    fn enter(store: &'a SampleStore, mode: Mode, multi_thread_safe: bool) -> ContextManager<'a> {
        let lock = multi_thread_safe.then(|| {
            store
                .mode_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        });

        let old_mode = store
            .in_training_mode
            .swap(mode == Mode::Training, Ordering::SeqCst);

        ContextManager {
            store,
            old_mode,
            _lock: lock,
        }
    }

    pub fn previous_mode(&self) -> Mode {
        Mode::from_flag(self.old_mode)
    }
}

impl Drop for ContextManager<'_> {
    fn drop(&mut self) {
        // Runs before `_lock` is released.
        self.store
            .in_training_mode
            .store(self.old_mode, Ordering::SeqCst);
    }
}
