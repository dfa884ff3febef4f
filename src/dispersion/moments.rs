//! Method-of-moments negative binomial dispersion per gene

use ndarray::Axis;

use super::{DispersionParams, DispersionRow, DispersionTable};
use crate::data::{ExpressionMatrix, MatrixStats};
use crate::error::{Result, ScError};

/// Build the mean/dispersion table that the parametric fit consumes
///
/// Counts are rounded, genes detected (`> lower_detection_limit`) in more
/// than `min_cells_detected` cells are kept, and each cell is divided by its
/// size factor when one is given. For NB, `Var(Y) = mu + mu^2 / k`, so the
/// dispersion `1/k` is estimated as `(var - xim * mu) / mu^2` with
/// `xim = mean(1 / size_factor)`.
///
/// Genes with zero mean get NaN for both mean and dispersion; negative
/// dispersions are floored at zero.
pub fn disp_calc_helper_nb(
    matrix: &ExpressionMatrix,
    size_factors: Option<&[f64]>,
    gene_ids: &[String],
    params: &DispersionParams,
) -> Result<DispersionTable> {
    if gene_ids.len() != matrix.n_genes() {
        return Err(ScError::DimensionMismatch {
            expected: format!("{} gene IDs", matrix.n_genes()),
            got: format!("{} gene IDs", gene_ids.len()),
        });
    }

    if !matrix.is_integer() {
        log::debug!("expression values are not integer counts, rounding before the moment estimates");
    }
    let rounded = matrix.rounded();
    let detected = rounded.count_above(params.lower_detection_limit, Axis(0));
    let keep: Vec<usize> = detected
        .iter()
        .enumerate()
        .filter(|(_, &n)| n > params.min_cells_detected)
        .map(|(j, _)| j)
        .collect();

    log::debug!(
        "{} of {} genes detected in more than {} cells",
        keep.len(),
        matrix.n_genes(),
        params.min_cells_detected
    );

    let mut x = rounded.select_genes(&keep);
    let xim = match size_factors {
        Some(sf) => {
            x = x.scale_rows_by_inverse(sf)?;
            sf.iter().map(|s| 1.0 / s).sum::<f64>() / sf.len().max(1) as f64
        }
        None => 1.0,
    };

    let mean = x.mean(Axis(0));
    let var = x.variance_ddof(Axis(0), 1);

    let rows = keep
        .iter()
        .enumerate()
        .map(|(k, &gene_index)| {
            let mu = mean[k];
            let (mu, disp) = if mu == 0.0 || !mu.is_finite() {
                (f64::NAN, f64::NAN)
            } else {
                let d = (var[k] - xim * mu) / (mu * mu);
                (mu, if d < 0.0 { 0.0 } else { d })
            };
            DispersionRow {
                gene_index,
                gene_id: gene_ids[gene_index].clone(),
                mu,
                disp,
            }
        })
        .collect();

    Ok(DispersionTable { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|j| format!("g{}", j)).collect()
    }

    #[test]
    fn test_method_of_moments_dispersion() {
        // gene 0: mean 4, sample var 16/3 -> (16/3 - 4) / 16 = 1/12
        let m = ExpressionMatrix::Dense(array![[2.0, 3.0], [2.0, 3.0], [6.0, 3.0], [6.0, 3.0]]);
        let table = disp_calc_helper_nb(&m, None, &ids(2), &DispersionParams::default()).unwrap();

        assert_eq!(table.len(), 2);
        let g0 = &table.rows[0];
        assert_eq!(g0.gene_id, "g0");
        assert_relative_eq!(g0.mu, 4.0);
        assert_relative_eq!(g0.disp, 1.0 / 12.0, epsilon = 1e-12);

        // constant gene: variance below the mean floors at zero
        assert_relative_eq!(table.rows[1].disp, 0.0);
    }

    #[test]
    fn test_undetected_genes_are_dropped() {
        let m = ExpressionMatrix::Dense(array![[0.0, 5.0, 1.0], [0.0, 7.0, 1.0], [0.0, 9.0, 2.0]]);
        let table = disp_calc_helper_nb(&m, None, &ids(3), &DispersionParams::default()).unwrap();
        // only gene 1 exceeds the detection limit in more than one cell
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].gene_index, 1);
    }

    #[test]
    fn test_size_factors_scale_cells() {
        let m = ExpressionMatrix::Dense(array![[2.0, 4.0], [4.0, 8.0], [6.0, 12.0]]);
        let sf = [1.0, 2.0, 2.0];
        let table = disp_calc_helper_nb(&m, Some(&sf), &ids(2), &DispersionParams::default()).unwrap();
        assert_relative_eq!(table.rows[0].mu, (2.0 + 2.0 + 3.0) / 3.0, epsilon = 1e-12);
    }
}
