use ndarray::{Array2, ArrayView2, Axis};

pub fn argmax(d: &[f64]) -> usize {
    if d.is_empty() {
        return 0;
    }

    let mut max_ix = 0;
    let mut max = &d[0];

    for (i, v) in d.iter().enumerate() {
        if v > max {
            max = v;
            max_ix = i;
        }
    }

    max_ix
}

/// Smallest and largest element, `None` for an empty array.
pub fn value_range(x: ArrayView2<f64>) -> Option<(f64, f64)> {
    if x.is_empty() {
        return None;
    }

    Some(x.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v))))
}

/// Joint range of several tables, ignoring empty ones.
pub fn joint_range(tables: &[ArrayView2<f64>]) -> Option<(f64, f64)> {
    tables
        .iter()
        .filter_map(|t| value_range(*t))
        .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
}

/// Affine map of every element from `from` onto `[lo, hi]`.
pub fn rescale(x: &mut Array2<f64>, from: (f64, f64), lo: f64, hi: f64) {
    let span = from.1 - from.0;
    if span == 0. {
        x.fill(lo);
        return;
    }

    x.mapv_inplace(|v| lo + (v - from.0) / span * (hi - lo));
}

/// Distinct values of a single-column table, ascending.
pub fn distinct_labels(targets: ArrayView2<f64>) -> Vec<f64> {
    let mut labels = targets.index_axis(Axis(1), 0).to_vec();
    labels.sort_by(|a, b| a.total_cmp(b));
    labels.dedup();
    labels
}
