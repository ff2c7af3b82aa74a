use ndarray::{ArrayView1, ArrayView2};
use ndarray_stats::QuantileExt;

/// Whether a prediction lands on the desired class.
///
/// Single outputs are split at `threshold`, wider outputs compare the index
/// of their largest component.
pub fn matches(out: ArrayView1<f64>, desired: ArrayView1<f64>, threshold: f64) -> bool {
    if out.len() == 1 {
        return (out[0] >= threshold) == (desired[0] >= threshold);
    }

    match (out.argmax(), desired.argmax()) {
        (Ok(o), Ok(d)) => o == d,
        _ => false,
    }
}

/// Fraction of rows classified correctly, `None` when there are no rows.
pub fn classification_rate(
    pred: ArrayView2<f64>,
    target: ArrayView2<f64>,
    threshold: f64,
) -> Option<f64> {
    if pred.nrows() == 0 {
        return None;
    }

    let correct = pred
        .rows()
        .into_iter()
        .zip(target.rows())
        .filter(|(p, t)| matches(*p, *t, threshold))
        .count();

    Some(correct as f64 / pred.nrows() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn single_output_uses_threshold() {
        let pred = array![[0.9], [-0.2], [0.1], [-0.8]];
        let target = array![[1.], [-1.], [-1.], [1.]];

        assert_eq!(classification_rate(pred.view(), target.view(), 0.), Some(0.5));
    }

    #[test]
    fn wide_output_uses_argmax() {
        let pred = array![[0.1, 0.8, 0.1], [0.6, 0.3, 0.1]];
        let target = array![[0., 1., 0.], [0., 0., 1.]];

        assert_eq!(classification_rate(pred.view(), target.view(), 0.5), Some(0.5));
    }

    #[test]
    fn empty_partition_has_no_rate() {
        let empty = ndarray::Array2::<f64>::zeros((0, 1));
        assert_eq!(classification_rate(empty.view(), empty.view(), 0.), None);
    }
}
