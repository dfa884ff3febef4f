//! Per-gene share of total expression

use ndarray::Axis;

use crate::data::{ExpressionMatrix, MatrixStats};

/// Fraction of the total expression carried by each gene
///
/// Returns the fractions and the indices of genes whose fraction exceeds
/// `threshold`. An all-zero matrix yields zero fractions and no exclusions.
pub fn compute_gene_exp_fraction(matrix: &ExpressionMatrix, threshold: f64) -> (Vec<f64>, Vec<usize>) {
    let per_gene = MatrixStats::sum(matrix, Axis(0));
    let total: f64 = per_gene.iter().sum();

    let fractions: Vec<f64> = if total > 0.0 {
        per_gene.iter().map(|s| s / total).collect()
    } else {
        vec![0.0; per_gene.len()]
    };

    let invalid = fractions
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > threshold)
        .map(|(i, _)| i)
        .collect();

    (fractions, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_fraction_flags_dominant_gene() {
        let m = ExpressionMatrix::Dense(array![[8.0, 1.0, 1.0], [8.0, 1.0, 1.0]]);
        let (frac, invalid) = compute_gene_exp_fraction(&m, 0.5);
        assert_relative_eq!(frac[0], 0.8);
        assert_relative_eq!(frac.iter().sum::<f64>(), 1.0);
        assert_eq!(invalid, vec![0]);

        let (_, none) = compute_gene_exp_fraction(&m, 1.0);
        assert!(none.is_empty());
    }

    #[test]
    fn test_all_zero_matrix() {
        let m = ExpressionMatrix::Dense(ndarray::Array2::zeros((3, 2)));
        let (frac, invalid) = compute_gene_exp_fraction(&m, 0.1);
        assert_eq!(frac, vec![0.0, 0.0]);
        assert!(invalid.is_empty());
    }
}
