//! Sub-sampling of cell populations

mod neighbors;
mod trn;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScError};
use crate::progress::ProgressSink;
use crate::rng::MersenneTwister;

pub use neighbors::{nearest_indices, nearest_indices_with, with_thread_pool, NeighborIndex};
pub use trn::{trn, trn_indices, TrnParams, TrnSample, Trnet, DEFAULT_SEED};

/// How [`sample`] picks its elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Uniformly, without replacement
    Random,
    /// Proportionally to the velocity norm, without replacement
    Velocity,
    /// Points nearest to the nodes of a topology representing network
    Trn,
    /// Points nearest to k-means centroids
    Kmeans,
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingMethod::Random => "random",
            SamplingMethod::Velocity => "velocity",
            SamplingMethod::Trn => "trn",
            SamplingMethod::Kmeans => "kmeans",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SamplingMethod {
    type Err = ScError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SamplingMethod::Random),
            "velocity" => Ok(SamplingMethod::Velocity),
            "trn" => Ok(SamplingMethod::Trn),
            "kmeans" => Ok(SamplingMethod::Kmeans),
            other => Err(not_implemented(other)),
        }
    }
}

fn not_implemented(method: impl fmt::Display) -> ScError {
    ScError::InvalidConfig {
        reason: format!(
            "The sampling method {} is not implemented or relevant data are not provided.",
            method
        ),
    }
}

/// Settings of [`sample_with_config`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub method: SamplingMethod,
    pub seed: u32,
    pub trn: TrnParams,
    /// Lloyd iterations of the k-means sampler
    pub kmeans_iter: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            method: SamplingMethod::Random,
            seed: DEFAULT_SEED,
            trn: TrnParams::default(),
            kmeans_iter: 10,
        }
    }
}

impl SamplingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn check_rows(what: &str, rows: usize, expected: usize) -> Result<()> {
    if rows != expected {
        return Err(ScError::DimensionMismatch {
            expected: format!("{} rows of {}", expected, what),
            got: format!("{} rows of {}", rows, what),
        });
    }
    Ok(())
}

/// Pick `n` elements of `arr` with the given method and default settings
///
/// `x` holds coordinates and `v` velocities, one row per element of `arr`.
pub fn sample<T: Clone>(
    arr: &[T],
    n: usize,
    method: SamplingMethod,
    x: Option<ArrayView2<f64>>,
    v: Option<ArrayView2<f64>>,
    seed: u32,
    sink: &dyn ProgressSink,
) -> Result<Vec<T>> {
    let config = SamplingConfig {
        method,
        seed,
        ..Default::default()
    };
    sample_with_config(arr, n, x, v, &config, sink)
}

/// [`sample`] with explicit TRN and k-means settings
pub fn sample_with_config<T: Clone>(
    arr: &[T],
    n: usize,
    x: Option<ArrayView2<f64>>,
    v: Option<ArrayView2<f64>>,
    config: &SamplingConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<T>> {
    let idx = match (config.method, x, v) {
        (SamplingMethod::Random, _, _) => {
            if n > arr.len() {
                return Err(ScError::InvalidInput {
                    reason: format!("cannot take {} samples without replacement from {}", n, arr.len()),
                });
            }
            MersenneTwister::new(config.seed).choice_without_replacement(arr.len(), n)
        }
        (SamplingMethod::Velocity, _, Some(v)) => {
            check_rows("velocities", v.nrows(), arr.len())?;
            sample_by_velocity(v, n, config.seed)?
        }
        (SamplingMethod::Trn, Some(x), _) => {
            check_rows("coordinates", x.nrows(), arr.len())?;
            trn_indices(x, n, config.seed, &config.trn, sink)?
        }
        (SamplingMethod::Kmeans, Some(x), _) => {
            check_rows("coordinates", x.nrows(), arr.len())?;
            sample_by_kmeans(x, n, config.seed, config.kmeans_iter)?
        }
        (method, _, _) => return Err(not_implemented(method)),
    };
    sink.debug(&format!("sampled {} of {} elements by {}", idx.len(), arr.len(), config.method));
    Ok(idx.into_iter().map(|i| arr[i].clone()).collect())
}

/// `n` distinct rows drawn with probability proportional to the velocity norm
pub fn sample_by_velocity(v: ArrayView2<f64>, n: usize, seed: u32) -> Result<Vec<usize>> {
    let norms: Vec<f64> = v.outer_iter().map(|row| row.dot(&row).sqrt()).collect();
    let nonzero = norms.iter().filter(|&&w| w.is_finite() && w > 0.0).count();
    if n > nonzero {
        return Err(ScError::InvalidInput {
            reason: format!("fewer non-zero velocities ({}) than samples ({})", nonzero, n),
        });
    }
    Ok(MersenneTwister::new(seed).weighted_choice_without_replacement(&norms, n))
}

/// Row nearest to each of `n` k-means centroids
///
/// Lloyd's algorithm started from `n` distinct random rows; a centroid
/// losing all its points keeps its previous position.
pub fn sample_by_kmeans(x: ArrayView2<f64>, n: usize, seed: u32, max_iter: usize) -> Result<Vec<usize>> {
    if n == 0 || n > x.nrows() {
        return Err(ScError::InvalidInput {
            reason: format!("cannot form {} clusters from {} points", n, x.nrows()),
        });
    }
    let mut rng = MersenneTwister::new(seed);
    let start = rng.choice_without_replacement(x.nrows(), n);
    let mut centroids = x.select(Axis(0), &start);

    for _ in 0..max_iter {
        let labels = nearest_indices(centroids.view(), x, seed, None)?;
        let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
        let mut counts = vec![0usize; n];
        for (row, &label) in x.outer_iter().zip(labels.iter()) {
            sums.row_mut(label).scaled_add(1.0, &row);
            counts[label] += 1;
        }
        let mut shift = 0.0;
        for k in 0..n {
            if counts[k] == 0 {
                continue;
            }
            let updated = sums.row(k).mapv(|s| s / counts[k] as f64);
            shift += (&updated - &centroids.row(k)).mapv(|d| d * d).sum();
            centroids.row_mut(k).assign(&updated);
        }
        if shift == 0.0 {
            break;
        }
    }

    nearest_indices(x, centroids.view(), seed, None)
}

/// Latin hypercube sample of `n_samples` points in `n_dim` dimensions
///
/// Each dimension is cut into `n_samples` equal intervals holding exactly one
/// point. `bounds` rescales dimension `i` from [0, 1) to `[lo, hi)`.
pub fn lhs_classic(n_samples: usize, n_dim: usize, bounds: Option<&[(f64, f64)]>, seed: u32) -> Result<Array2<f64>> {
    if let Some(b) = bounds {
        if b.len() != n_dim {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} bounds", n_dim),
                got: format!("{} bounds", b.len()),
            });
        }
    }

    let mut rng = MersenneTwister::new(seed);
    let width = 1.0 / n_samples.max(1) as f64;
    let mut points = Array2::from_shape_fn((n_samples, n_dim), |(i, _)| i as f64 * width);
    for i in 0..n_samples {
        for j in 0..n_dim {
            points[[i, j]] += rng.random() * width;
        }
    }

    for j in 0..n_dim {
        let order = rng.permutation(n_samples);
        let column = points.column(j).select(Axis(0), &order);
        points.column_mut(j).assign(&column);
        if let Some(b) = bounds {
            let (lo, hi) = b[j];
            points.column_mut(j).mapv_inplace(|u| u * (hi - lo) + lo);
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;
    use ndarray::array;
    use std::collections::HashSet;

    fn cloud(n: usize) -> Array2<f64> {
        let mut rng = MersenneTwister::new(5);
        Array2::from_shape_fn((n, 2), |_| rng.uniform(0.0, 10.0))
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("trn".parse::<SamplingMethod>().unwrap(), SamplingMethod::Trn);
        assert!(matches!("umap".parse::<SamplingMethod>(), Err(ScError::InvalidConfig { .. })));
    }

    #[test]
    fn test_trn_sampling_is_deterministic() {
        let x = cloud(400);
        let arr: Vec<usize> = (0..400).collect();
        let first = sample(&arr, 50, SamplingMethod::Trn, Some(x.view()), None, 19491001, &NullSink).unwrap();
        let second = sample(&arr, 50, SamplingMethod::Trn, Some(x.view()), None, 19491001, &NullSink).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 50);
        assert!(first.iter().all(|&i| i < 400));
    }

    #[test]
    fn test_trn_and_kmeans_with_zero_inflated_cells() {
        let mut x = cloud(400);
        for i in 0..300 {
            x.row_mut(i).fill(0.0);
        }
        let arr: Vec<usize> = (0..400).collect();
        for method in [SamplingMethod::Trn, SamplingMethod::Kmeans] {
            let picked = sample(&arr, 20, method, Some(x.view()), None, 19491001, &NullSink).unwrap();
            assert_eq!(picked.len(), 20, "{}", method);
            assert!(picked.iter().all(|&i| i < 400));
        }
    }

    #[test]
    fn test_random_sampling_without_replacement() {
        let arr: Vec<u32> = (0..30).collect();
        let picked = sample(&arr, 30, SamplingMethod::Random, None, None, 1, &NullSink).unwrap();
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 30);
        assert!(sample(&arr, 31, SamplingMethod::Random, None, None, 1, &NullSink).is_err());
    }

    #[test]
    fn test_missing_coordinates_rejected() {
        let arr = vec![1, 2, 3];
        for method in [SamplingMethod::Trn, SamplingMethod::Kmeans, SamplingMethod::Velocity] {
            match sample(&arr, 2, method, None, None, 1, &NullSink) {
                Err(ScError::InvalidConfig { reason }) => assert!(reason.contains(&method.to_string())),
                other => panic!("expected InvalidConfig for {}, got {:?}", method, other),
            }
        }
    }

    #[test]
    fn test_velocity_skips_still_cells() {
        let v = array![[0.0, 0.0], [3.0, 4.0], [0.0, 0.0], [1.0, 0.0], [0.0, 2.0]];
        let idx = sample_by_velocity(v.view(), 3, 2).unwrap();
        let mut sorted = idx.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 3, 4]);
        assert!(sample_by_velocity(v.view(), 4, 2).is_err());
    }

    #[test]
    fn test_kmeans_picks_one_point_per_separated_cluster() {
        let mut rng = MersenneTwister::new(8);
        let centres = [(0.0, 0.0), (50.0, 0.0), (0.0, 50.0)];
        let x = Array2::from_shape_fn((90, 2), |(i, d)| {
            let c = centres[i % 3];
            (if d == 0 { c.0 } else { c.1 }) + rng.standard_normal()
        });
        let idx = sample_by_kmeans(x.view(), 3, 3, 20).unwrap();
        assert_eq!(idx.len(), 3);
        assert!(idx.iter().all(|&i| i < 90));
    }

    #[test]
    fn test_lhs_one_point_per_interval() {
        let h = lhs_classic(10, 3, None, 19491001).unwrap();
        for column in h.columns() {
            let mut cells: Vec<usize> = column.iter().map(|u| (u * 10.0).floor() as usize).collect();
            cells.sort_unstable();
            assert_eq!(cells, (0..10).collect::<Vec<_>>());
        }

        let scaled = lhs_classic(4, 1, Some(&[(-2.0, 2.0)]), 1).unwrap();
        assert!(scaled.iter().all(|&u| (-2.0..2.0).contains(&u)));
        assert!(lhs_classic(4, 2, Some(&[(0.0, 1.0)]), 1).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = SamplingConfig::from_json(r#"{"method": "kmeans", "trn": {"tmax": 5}}"#).unwrap();
        assert_eq!(config.method, SamplingMethod::Kmeans);
        assert_eq!(config.trn.tmax, 5.0);
        assert_eq!(config.seed, DEFAULT_SEED);
    }
}
