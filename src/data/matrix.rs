//! Expression matrix representation for single-cell data
//!
//! Rows are cells, columns are genes. Both dense (`ndarray`) and sparse
//! (`sprs`, CSR or CSC) storage are supported through the [`MatrixStats`]
//! capability trait; statistics along an axis follow numpy conventions, so
//! `mean(Axis(0))` yields one value per gene.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};

use crate::error::{Result, ScError};

/// Small constant added before the Gini computation so that no column sums to zero
pub const GINI_EPSILON: f64 = 1e-7;

/// Per-axis statistics over a numeric matrix.
///
/// Implemented once per backing representation. Provided methods are built on
/// the required ones and never densify a sparse matrix.
pub trait MatrixStats {
    /// (rows, cols)
    fn shape(&self) -> (usize, usize);

    /// Sum along an axis (`Axis(0)` reduces rows, one value per column)
    fn sum(&self, axis: Axis) -> Array1<f64>;

    /// Number of entries strictly greater than `threshold` along an axis
    fn count_above(&self, threshold: f64, axis: Axis) -> Array1<usize>;

    /// Matrix with every entry squared
    fn elementwise_square(&self) -> Self
    where
        Self: Sized;

    /// Smallest entry, implicit zeros included
    fn min_value(&self) -> f64;

    /// Per-column Gini coefficient
    ///
    /// Values are shifted by the global minimum, offset by [`GINI_EPSILON`] and
    /// sorted per column; `gini = sum((2i - n - 1) * x_i) / (n * sum(x))`.
    fn gini(&self) -> Array1<f64>;

    fn len_of(&self, axis: Axis) -> usize {
        let (rows, cols) = self.shape();
        if axis.index() == 0 {
            rows
        } else {
            cols
        }
    }

    fn mean(&self, axis: Axis) -> Array1<f64> {
        let n = self.len_of(axis) as f64;
        if n == 0.0 {
            return self.sum(axis).mapv(|_| f64::NAN);
        }
        self.sum(axis) / n
    }

    /// Population variance as `E[X^2] - E[X]^2`, clamped at zero
    fn variance(&self, axis: Axis) -> Array1<f64>
    where
        Self: Sized,
    {
        let mean = self.mean(axis);
        let mean_sq = self.elementwise_square().mean(axis);
        let mut var = &mean_sq - &mean.mapv(|m| m * m);
        var.mapv_inplace(|v| if v.is_nan() { v } else { v.max(0.0) });
        var
    }

    /// Variance with `ddof` delta degrees of freedom
    fn variance_ddof(&self, axis: Axis, ddof: usize) -> Array1<f64>
    where
        Self: Sized,
    {
        let n = self.len_of(axis);
        let scale = if n > ddof {
            n as f64 / (n - ddof) as f64
        } else {
            f64::NAN
        };
        self.variance(axis) * scale
    }

    fn fraction_above(&self, threshold: f64, axis: Axis) -> Array1<f64> {
        let n = self.len_of(axis) as f64;
        self.count_above(threshold, axis).mapv(|c| c as f64 / n)
    }
}

/// Gini coefficient of one column whose values are already shifted to be non-negative
fn gini_of_sorted(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    let total: f64 = values.iter().sum();
    let weighted: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v)
        .sum();
    weighted / (n as f64 * total)
}

impl MatrixStats for Array2<f64> {
    fn shape(&self) -> (usize, usize) {
        self.dim()
    }

    fn sum(&self, axis: Axis) -> Array1<f64> {
        self.sum_axis(axis)
    }

    fn count_above(&self, threshold: f64, axis: Axis) -> Array1<usize> {
        self.map_axis(axis, |lane| lane.iter().filter(|&&x| x > threshold).count())
    }

    fn elementwise_square(&self) -> Self {
        self.mapv(|x| x * x)
    }

    fn min_value(&self) -> f64 {
        self.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn gini(&self) -> Array1<f64> {
        let shift = self.min_value();
        let ginis: Vec<f64> = (0..self.ncols())
            .into_par_iter()
            .map(|j| {
                let mut col: Vec<f64> = self
                    .column(j)
                    .iter()
                    .map(|&x| x - shift + GINI_EPSILON)
                    .collect();
                gini_of_sorted(&mut col)
            })
            .collect();
        Array1::from_vec(ginis)
    }
}

impl MatrixStats for CsMat<f64> {
    fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    fn sum(&self, axis: Axis) -> Array1<f64> {
        let mut out = Array1::zeros(self.len_of(Axis(1 - axis.index().min(1))));
        for (&v, (r, c)) in self.iter() {
            let k = if axis.index() == 0 { c } else { r };
            out[k] += v;
        }
        out
    }

    fn count_above(&self, threshold: f64, axis: Axis) -> Array1<usize> {
        let other = Axis(1 - axis.index().min(1));
        let mut out = Array1::zeros(self.len_of(other));
        let mut stored = Array1::<usize>::zeros(self.len_of(other));
        for (&v, (r, c)) in self.iter() {
            let k = if axis.index() == 0 { c } else { r };
            stored[k] += 1;
            if v > threshold {
                out[k] += 1;
            }
        }
        if threshold < 0.0 {
            // implicit zeros exceed a negative threshold
            let n = self.len_of(axis);
            for (o, s) in out.iter_mut().zip(stored.iter()) {
                *o += n - s;
            }
        }
        out
    }

    fn elementwise_square(&self) -> Self {
        self.map(|&x| x * x)
    }

    fn min_value(&self) -> f64 {
        let stored_min = self.data().iter().copied().fold(f64::INFINITY, f64::min);
        if self.nnz() < self.rows() * self.cols() {
            stored_min.min(0.0)
        } else {
            stored_min
        }
    }

    fn gini(&self) -> Array1<f64> {
        let shift = self.min_value();
        let n_rows = self.rows();
        let csc = self.to_csc();
        let ginis: Vec<f64> = (0..csc.cols())
            .into_par_iter()
            .map(|j| {
                let mut col = vec![-shift + GINI_EPSILON; n_rows];
                if let Some(view) = csc.outer_view(j) {
                    for (i, &v) in view.iter() {
                        col[i] = v - shift + GINI_EPSILON;
                    }
                }
                gini_of_sorted(&mut col)
            })
            .collect();
        Array1::from_vec(ginis)
    }
}

/// A cells x genes expression matrix in dense or sparse storage
#[derive(Debug, Clone)]
pub enum ExpressionMatrix {
    Dense(Array2<f64>),
    Sparse(CsMat<f64>),
}

impl From<Array2<f64>> for ExpressionMatrix {
    fn from(m: Array2<f64>) -> Self {
        ExpressionMatrix::Dense(m)
    }
}

impl From<CsMat<f64>> for ExpressionMatrix {
    fn from(m: CsMat<f64>) -> Self {
        ExpressionMatrix::Sparse(m)
    }
}

/// Rebuild a sparse matrix through a triplet list, keeping its storage order
fn rebuild_sparse<F>(m: &CsMat<f64>, shape: (usize, usize), mut f: F) -> CsMat<f64>
where
    F: FnMut(f64, usize, usize) -> Option<(usize, usize, f64)>,
{
    let mut tri = TriMat::new(shape);
    for (&v, (r, c)) in m.iter() {
        if let Some((nr, nc, nv)) = f(v, r, c) {
            tri.add_triplet(nr, nc, nv);
        }
    }
    if m.is_csr() {
        tri.to_csr()
    } else {
        tri.to_csc()
    }
}

impl ExpressionMatrix {
    pub fn n_cells(&self) -> usize {
        self.shape().0
    }

    pub fn n_genes(&self) -> usize {
        self.shape().1
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, ExpressionMatrix::Sparse(_))
    }

    /// Dense copy of the matrix
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            ExpressionMatrix::Dense(m) => m.clone(),
            ExpressionMatrix::Sparse(m) => m.to_dense(),
        }
    }

    /// Dense copy of one gene column
    pub fn column(&self, j: usize) -> Array1<f64> {
        match self {
            ExpressionMatrix::Dense(m) => m.column(j).to_owned(),
            ExpressionMatrix::Sparse(m) => {
                let mut col = Array1::zeros(m.rows());
                for (&v, (r, c)) in m.iter() {
                    if c == j {
                        col[r] = v;
                    }
                }
                col
            }
        }
    }

    /// Apply `f` to every stored entry. Implicit zeros of a sparse matrix are
    /// left untouched, so `f(0)` must be `0` for sparse input.
    pub fn map_stored<F>(&mut self, f: F)
    where
        F: Fn(f64) -> f64,
    {
        match self {
            ExpressionMatrix::Dense(m) => m.mapv_inplace(f),
            ExpressionMatrix::Sparse(m) => m.map_inplace(|&x| f(x)),
        }
    }

    /// Every entry rounded to the nearest integer
    pub fn rounded(&self) -> Self {
        let mut out = self.clone();
        out.map_stored(f64::round);
        out
    }

    /// Divide every row (cell) by its factor
    pub fn scale_rows_by_inverse(&self, factors: &[f64]) -> Result<Self> {
        if factors.len() != self.n_cells() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} row factors", self.n_cells()),
                got: format!("{} row factors", factors.len()),
            });
        }
        if let Some(bad) = factors.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(ScError::InvalidMatrix {
                reason: format!("row factors must be positive and finite, found {}", bad),
            });
        }
        Ok(match self {
            ExpressionMatrix::Dense(m) => {
                let mut out = m.clone();
                for (mut row, &f) in out.axis_iter_mut(Axis(0)).zip(factors.iter()) {
                    row.mapv_inplace(|x| x / f);
                }
                ExpressionMatrix::Dense(out)
            }
            ExpressionMatrix::Sparse(m) => ExpressionMatrix::Sparse(rebuild_sparse(
                m,
                (m.rows(), m.cols()),
                |v, r, c| Some((r, c, v / factors[r])),
            )),
        })
    }

    /// Keep the gene columns listed in `indices`, in that order
    pub fn select_genes(&self, indices: &[usize]) -> Self {
        match self {
            ExpressionMatrix::Dense(m) => ExpressionMatrix::Dense(m.select(Axis(1), indices)),
            ExpressionMatrix::Sparse(m) => {
                let mut remap = vec![None; m.cols()];
                for (new, &old) in indices.iter().enumerate() {
                    remap[old] = Some(new);
                }
                ExpressionMatrix::Sparse(rebuild_sparse(
                    m,
                    (m.rows(), indices.len()),
                    |v, r, c| remap[c].map(|nc| (r, nc, v)),
                ))
            }
        }
    }

    /// Keep the cell rows listed in `indices`, in that order
    pub fn select_cells(&self, indices: &[usize]) -> Self {
        match self {
            ExpressionMatrix::Dense(m) => ExpressionMatrix::Dense(m.select(Axis(0), indices)),
            ExpressionMatrix::Sparse(m) => {
                let mut remap = vec![None; m.rows()];
                for (new, &old) in indices.iter().enumerate() {
                    remap[old] = Some(new);
                }
                ExpressionMatrix::Sparse(rebuild_sparse(
                    m,
                    (indices.len(), m.cols()),
                    |v, r, c| remap[r].map(|nr| (nr, c, v)),
                ))
            }
        }
    }

    /// Replace NaN and infinite entries with `value`
    pub fn replace_non_finite(&mut self, value: f64) -> usize {
        let mut replaced = 0;
        let mut visit = |x: &mut f64| {
            if !x.is_finite() {
                *x = value;
                replaced += 1;
            }
        };
        match self {
            ExpressionMatrix::Dense(m) => m.iter_mut().for_each(&mut visit),
            ExpressionMatrix::Sparse(m) => m.data_mut().iter_mut().for_each(&mut visit),
        }
        replaced
    }

    /// Whether every entry is an integer
    pub fn is_integer(&self) -> bool {
        match self {
            ExpressionMatrix::Dense(m) => m.iter().all(|&x| x == x.round()),
            ExpressionMatrix::Sparse(m) => m.data().iter().all(|&x| x == x.round()),
        }
    }
}

impl MatrixStats for ExpressionMatrix {
    fn shape(&self) -> (usize, usize) {
        match self {
            ExpressionMatrix::Dense(m) => MatrixStats::shape(m),
            ExpressionMatrix::Sparse(m) => MatrixStats::shape(m),
        }
    }

    fn sum(&self, axis: Axis) -> Array1<f64> {
        match self {
            ExpressionMatrix::Dense(m) => MatrixStats::sum(m, axis),
            ExpressionMatrix::Sparse(m) => MatrixStats::sum(m, axis),
        }
    }

    fn count_above(&self, threshold: f64, axis: Axis) -> Array1<usize> {
        match self {
            ExpressionMatrix::Dense(m) => m.count_above(threshold, axis),
            ExpressionMatrix::Sparse(m) => m.count_above(threshold, axis),
        }
    }

    fn elementwise_square(&self) -> Self {
        match self {
            ExpressionMatrix::Dense(m) => ExpressionMatrix::Dense(m.elementwise_square()),
            ExpressionMatrix::Sparse(m) => ExpressionMatrix::Sparse(m.elementwise_square()),
        }
    }

    fn min_value(&self) -> f64 {
        match self {
            ExpressionMatrix::Dense(m) => m.min_value(),
            ExpressionMatrix::Sparse(m) => m.min_value(),
        }
    }

    fn gini(&self) -> Array1<f64> {
        match self {
            ExpressionMatrix::Dense(m) => m.gini(),
            ExpressionMatrix::Sparse(m) => m.gini(),
        }
    }
}
