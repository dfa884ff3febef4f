//! Statistical utility functions shared across modules
//!
//! Quantiles, medians and NaN-aware summaries used by the gene selectors.

use std::cmp::Ordering;

use statrs::statistics::Statistics;

/// Total order on f64 placing NaN last
pub fn cmp_nan_last(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
    }
}

/// Finite (non-NaN) values of a slice
pub fn non_nan(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Quantile with linear interpolation between order statistics
///
/// Matches numpy's default and pandas' `Series.quantile`: position
/// `(n - 1) * q` in the sorted non-NaN values. Returns NaN when empty.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = non_nan(values);
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(cmp_nan_last);
    quantile_sorted(&sorted, q)
}

/// [`quantile`] on already sorted, NaN-free data
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let pos = (n - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median of the non-NaN values
pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Mean of the non-NaN values (NaN when none)
pub fn nan_mean(values: &[f64]) -> f64 {
    let kept = non_nan(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.mean()
}

/// Sample standard deviation (ddof = 1) of the non-NaN values
///
/// NaN when fewer than two values remain, as in pandas.
pub fn nan_std(values: &[f64]) -> f64 {
    let kept = non_nan(values);
    if kept.len() < 2 {
        return f64::NAN;
    }
    kept.std_dev()
}

/// Indices ordering `values` from largest to smallest, NaN last, stable on ties
pub fn argsort_descending(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| match (values[a].is_nan(), values[b].is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal),
    });
    idx
}

/// The `n`-th largest non-NaN value (1-based); `None` if fewer values exist
pub fn nth_largest(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let order = argsort_descending(values);
    order
        .get(n - 1)
        .map(|&i| values[i])
        .filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_linear_interpolation() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(quantile(&x, 0.5), 3.0);
        assert_relative_eq!(quantile(&x, 0.1), 1.4);
        assert_relative_eq!(quantile(&x, 0.9), 4.6);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_quantile_ignores_nan() {
        let x = vec![f64::NAN, 4.0, 2.0, f64::NAN];
        assert_relative_eq!(median(&x), 3.0);
    }

    #[test]
    fn test_nan_std_matches_sample_std() {
        let x = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0, f64::NAN];
        assert_relative_eq!(nan_mean(&x), 5.0);
        assert_relative_eq!(nan_std(&x), (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
        assert!(nan_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_argsort_descending_stable_and_nan_last() {
        let x = vec![1.0, f64::NAN, 3.0, 3.0, 2.0];
        assert_eq!(argsort_descending(&x), vec![2, 3, 4, 0, 1]);
        assert_eq!(nth_largest(&x, 3), Some(2.0));
        assert_eq!(nth_largest(&x, 5), None);
    }
}
