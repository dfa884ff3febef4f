//! Gene selection recipes
//!
//! Both recipes score genes with one [`GeneScorer`], then record the chosen
//! genes in the `use_for_pca` gene metadata column (or subset the store).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::gini::{gini, gini_key};
use super::seurat::{select_genes_by_seurat_dispersion, SeuratDispersionParams};
use super::svr::{get_svr_filter, select_genes_by_svr, SvrAlgorithm, SvrSelectParams};
use crate::data::{AnnotatedMatrix, Column, X_LAYER};
use crate::error::{Result, ScError};
use crate::filter::compute_gene_exp_fraction;
use crate::progress::ProgressSink;
use crate::stats::argsort_descending;

/// Gene metadata column holding the final selection
pub const USE_FOR_PCA: &str = "use_for_pca";
pub const PASS_BASIC_FILTER: &str = "pass_basic_filter";

/// Statistic used to rank genes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneScorer {
    Gini,
    SeuratDispersion,
    CvDispersion,
    FanoDispersion,
}

impl fmt::Display for GeneScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeneScorer::Gini => "gini",
            GeneScorer::SeuratDispersion => "seurat_dispersion",
            GeneScorer::CvDispersion => "cv_dispersion",
            GeneScorer::FanoDispersion => "fano_dispersion",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for GeneScorer {
    type Err = ScError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gini" => Ok(GeneScorer::Gini),
            "seurat_dispersion" => Ok(GeneScorer::SeuratDispersion),
            "cv_dispersion" => Ok(GeneScorer::CvDispersion),
            "fano_dispersion" => Ok(GeneScorer::FanoDispersion),
            other => Err(not_existed(other)),
        }
    }
}

fn not_existed(name: impl fmt::Display) -> ScError {
    ScError::InvalidConfig {
        reason: format!("The algorithm {} is not existed", name),
    }
}

/// Parameters shared by the selection recipes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneSelectionConfig {
    pub layer: String,
    /// Flag genes in `use_for_pca` instead of removing unselected ones
    pub keep_filtered: bool,
    /// Number of genes to keep; every gene when `None`
    pub n_top_genes: Option<usize>,
    pub sort_by: GeneScorer,
    /// Genes carrying more than this fraction of the total expression are excluded
    pub exprs_frac_for_gene_exclusion: f64,
    pub genes_to_exclude: Vec<String>,
    pub svr: SvrSelectParams,
    pub seurat: SeuratDispersionParams,
    /// Replacement for NaN and infinite layer values in the Seurat recipe
    pub nan_replace_val: Option<f64>,
    /// Explicit gene list evaluated by the Seurat recipe
    pub gene_names: Option<Vec<String>>,
    /// Boolean gene column restricting the Seurat recipe when `gene_names` is unset
    pub var_filter_key: Option<String>,
    /// Subset the store to the selected genes after the Seurat recipe
    pub inplace: bool,
}

impl Default for GeneSelectionConfig {
    fn default() -> Self {
        Self {
            layer: X_LAYER.to_string(),
            keep_filtered: true,
            n_top_genes: Some(2000),
            sort_by: GeneScorer::CvDispersion,
            exprs_frac_for_gene_exclusion: 1.0,
            genes_to_exclude: Vec::new(),
            svr: SvrSelectParams::default(),
            seurat: SeuratDispersionParams::default(),
            nan_replace_val: None,
            gene_names: None,
            var_filter_key: Some(PASS_BASIC_FILTER.to_string()),
            inplace: false,
        }
    }
}

impl GeneSelectionConfig {
    /// Load from a JSON document; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Top-N genes by Gini coefficient among the genes passing `candidates`
fn top_by_gini<A: AnnotatedMatrix>(
    store: &mut A,
    layer: &str,
    candidates: &[bool],
    n_top: usize,
    sink: &dyn ProgressSink,
) -> Result<Vec<bool>> {
    let key = gini_key(layer);
    if store.var_column(&key).is_none() {
        gini(store, Some(&[layer]), sink)?;
    }
    let values = store.require_var_float(&key)?;
    let pool: Vec<usize> = (0..values.len()).filter(|&g| candidates[g]).collect();
    let pool_values: Vec<f64> = pool.iter().map(|&g| values[g]).collect();

    let mut mask = vec![false; values.len()];
    for k in argsort_descending(&pool_values).into_iter().take(n_top) {
        mask[pool[k]] = true;
    }
    Ok(mask)
}

/// Monocle-style selection by Gini coefficient or SVR dispersion score
///
/// Genes failing `pass_basic_filter` (when present) are never scored. When
/// the store holds no more genes than requested, every gene is kept. Genes
/// dominating total expression and genes named in `genes_to_exclude` are then
/// removed from the selection. Returns the mask over the genes present on
/// entry.
pub fn select_genes_monocle<A: AnnotatedMatrix>(
    store: &mut A,
    config: &GeneSelectionConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<bool>> {
    let n_vars = store.n_vars();
    let n_top = config.n_top_genes.unwrap_or(n_vars);
    let basic = match store.var_column(PASS_BASIC_FILTER) {
        Some(_) => store.require_var_bool(PASS_BASIC_FILTER)?,
        None => vec![true; n_vars],
    };

    let mut mask = if n_vars <= n_top {
        vec![true; n_vars]
    } else {
        match config.sort_by {
            GeneScorer::Gini => top_by_gini(store, &config.layer, &basic, n_top, sink)?,
            GeneScorer::CvDispersion | GeneScorer::FanoDispersion => {
                let algorithm = if config.sort_by == GeneScorer::CvDispersion {
                    SvrAlgorithm::CvDispersion
                } else {
                    SvrAlgorithm::FanoDispersion
                };
                select_genes_by_svr(store, &config.layer, Some(&basic), algorithm, &config.svr, sink)?;
                get_svr_filter(store, &config.layer, n_top)?
            }
            GeneScorer::SeuratDispersion => return Err(not_existed(config.sort_by)),
        }
    };

    let (frac, invalid) = compute_gene_exp_fraction(store.require_layer(X_LAYER)?, config.exprs_frac_for_gene_exclusion);
    sink.info_insert("frac", "var");
    store.set_var_column("frac", Column::Float(frac))?;

    let named: HashSet<&str> = config.genes_to_exclude.iter().map(String::as_str).collect();
    let mut excluded: Vec<bool> = store.gene_ids().iter().map(|id| named.contains(id.as_str())).collect();
    for g in invalid {
        excluded[g] = true;
    }
    let n_excluded = mask.iter().zip(excluded.iter()).filter(|(&m, &e)| m && e).count();
    if n_excluded > 0 {
        sink.info(&format!("excluding {} genes from the selection", n_excluded));
    }
    for (m, e) in mask.iter_mut().zip(excluded.iter()) {
        *m = *m && !e;
    }

    if config.keep_filtered {
        store.set_var_column(USE_FOR_PCA, Column::Bool(mask.clone()))?;
    } else {
        store.subset_genes(&mask)?;
        let kept = store.n_vars();
        store.set_var_column(USE_FOR_PCA, Column::Bool(vec![true; kept]))?;
    }
    Ok(mask)
}

/// Genes evaluated by the Seurat recipe, in evaluation order
fn seurat_candidates<A: AnnotatedMatrix>(
    store: &A,
    config: &GeneSelectionConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<usize>> {
    let ids = store.gene_ids();
    let picked: Vec<usize> = match (&config.gene_names, &config.var_filter_key) {
        (Some(names), _) if !names.is_empty() => {
            sink.info("select genes on gene names from arguments <gene_names>");
            names
                .iter()
                .map(|name| {
                    ids.iter().position(|id| id == name).ok_or_else(|| ScError::MissingKey {
                        key: name.clone(),
                        location: "gene identifiers".to_string(),
                    })
                })
                .collect::<Result<_>>()?
        }
        (_, Some(key)) => {
            sink.info(&format!("select genes on var key: {}", key));
            let passing = store.require_var_bool(key)?;
            (0..ids.len()).filter(|&g| passing[g]).collect()
        }
        _ => (0..ids.len()).collect(),
    };

    let unique: HashSet<&str> = picked.iter().map(|&g| ids[g].as_str()).collect();
    if unique.len() != picked.len() {
        sink.warning("gene names are not unique, please check your preprocessing procedure.");
    }
    Ok(picked)
}

/// Seurat-style selection by binned, normalized dispersion
///
/// Writes `gene_mean`, `gene_var`, `highly_variable` and `use_for_pca`; genes
/// outside the evaluated set get NaN statistics and are not selected.
/// [`GeneScorer::FanoDispersion`] is delegated to [`select_genes_monocle`].
pub fn select_genes_by_seurat_recipe<A: AnnotatedMatrix>(
    store: &mut A,
    config: &GeneSelectionConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<bool>> {
    match config.sort_by {
        GeneScorer::SeuratDispersion => {}
        GeneScorer::FanoDispersion => return select_genes_monocle(store, config, sink),
        other => return Err(not_existed(other)),
    }

    let n_vars = store.n_vars();
    let candidates = seurat_candidates(&*store, config, sink)?;
    let n_top = match config.n_top_genes {
        Some(n) => n,
        None => {
            sink.info("n_top_genes is None, reserve all genes and add filter gene information");
            n_vars
        }
    };

    let mut matrix = store.require_layer(&config.layer)?.select_genes(&candidates);
    if let Some(value) = config.nan_replace_val {
        sink.info(&format!("replacing nan values with: {}", value));
        let replaced = matrix.replace_non_finite(value);
        sink.debug(&format!("{} non-finite values replaced", replaced));
    }

    let result = select_genes_by_seurat_dispersion(&matrix, Some(n_top), &config.seurat, sink);

    let mut gene_mean = vec![f64::NAN; n_vars];
    let mut gene_var = vec![f64::NAN; n_vars];
    let mut highly_variable = vec![false; n_vars];
    for (k, &g) in candidates.iter().enumerate() {
        gene_mean[g] = result.mean[k];
        gene_var[g] = result.variance[k];
        highly_variable[g] = result.mask[k];
    }

    for key in ["gene_mean", "gene_var", "highly_variable"] {
        sink.info_insert(key, "var");
    }
    store.set_var_column("gene_mean", Column::Float(gene_mean))?;
    store.set_var_column("gene_var", Column::Float(gene_var))?;
    store.set_var_column("highly_variable", Column::Bool(highly_variable.clone()))?;
    store.set_var_column(USE_FOR_PCA, Column::Bool(highly_variable.clone()))?;

    let n_selected = highly_variable.iter().filter(|&&h| h).count();
    sink.info(&format!("number of selected highly variable genes: {}", n_selected));
    if config.inplace {
        sink.info("inplace is True, subset adata according to selected genes.");
        store.subset_genes(&highly_variable)?;
    }
    Ok(highly_variable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellDataSet, ExpressionMatrix};
    use crate::progress::tests::RecordingSink;
    use crate::progress::NullSink;
    use crate::rng::MersenneTwister;
    use ndarray::Array2;

    const NOISY: [usize; 5] = [5, 15, 25, 35, 45];

    /// 100 cells x 50 genes; five genes carry all their mass in 5 cells
    fn fixture() -> CellDataSet {
        let mut rng = MersenneTwister::new(7);
        let counts = Array2::from_shape_fn((100, 50), |(i, j)| {
            let mean = 2.0 + 0.4 * j as f64;
            if NOISY.contains(&j) {
                if i % 20 == 0 {
                    20.0 * mean
                } else {
                    0.0
                }
            } else {
                (mean + mean.sqrt() * rng.standard_normal()).max(0.0)
            }
        });
        CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap()
    }

    fn selected(mask: &[bool]) -> Vec<usize> {
        (0..mask.len()).filter(|&g| mask[g]).collect()
    }

    #[test]
    fn test_scorer_from_str() {
        assert_eq!("gini".parse::<GeneScorer>().unwrap(), GeneScorer::Gini);
        assert_eq!(GeneScorer::SeuratDispersion.to_string(), "seurat_dispersion");
        match "svr".parse::<GeneScorer>() {
            Err(ScError::InvalidConfig { reason }) => assert!(reason.contains("svr")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_config_from_json() {
        let config = GeneSelectionConfig::from_json(r#"{"sort_by": "fano_dispersion", "n_top_genes": 5}"#).unwrap();
        assert_eq!(config.sort_by, GeneScorer::FanoDispersion);
        assert_eq!(config.n_top_genes, Some(5));
        assert!(config.keep_filtered);
        assert_eq!(config.var_filter_key.as_deref(), Some(PASS_BASIC_FILTER));
        assert!(GeneSelectionConfig::from_json(r#"{"sort_by": "pca"}"#).is_err());
    }

    #[test]
    fn test_monocle_cv_and_fano_find_noisy_genes() {
        for scorer in [GeneScorer::CvDispersion, GeneScorer::FanoDispersion] {
            let mut ds = fixture();
            let config = GeneSelectionConfig {
                n_top_genes: Some(5),
                sort_by: scorer,
                ..Default::default()
            };
            let mask = select_genes_monocle(&mut ds, &config, &NullSink).unwrap();
            assert_eq!(selected(&mask), NOISY.to_vec(), "scorer {}", scorer);
            assert_eq!(ds.require_var_bool(USE_FOR_PCA).unwrap(), mask);
            assert_eq!(ds.require_var_float("frac").unwrap().len(), 50);
        }
    }

    #[test]
    fn test_monocle_svr_skips_zero_and_constant_genes() {
        const ZERO: usize = 10;
        const CONSTANT: usize = 12;
        for scorer in [GeneScorer::CvDispersion, GeneScorer::FanoDispersion] {
            let mut ds = fixture();
            let mut counts = ds.x().to_dense();
            counts.column_mut(ZERO).fill(0.0);
            counts.column_mut(CONSTANT).fill(3.0);
            *ds.x_mut() = ExpressionMatrix::Dense(counts);

            let config = GeneSelectionConfig {
                n_top_genes: Some(5),
                sort_by: scorer,
                ..Default::default()
            };
            let sink = RecordingSink::default();
            let mask = select_genes_monocle(&mut ds, &config, &sink).unwrap();
            assert_eq!(selected(&mask), NOISY.to_vec(), "scorer {}", scorer);
            assert!(
                sink.warnings().iter().any(|w| w.contains("exclude them in SVR training")),
                "scorer {}",
                scorer
            );

            let score = ds.require_var_float("score").unwrap();
            let log_cv = ds.require_var_float("log_cv").unwrap();
            let skipped = if scorer == GeneScorer::CvDispersion { CONSTANT } else { ZERO };
            assert!(score[skipped].is_nan());
            assert!(log_cv[skipped].is_nan());
        }
    }

    #[test]
    fn test_keep_filtered_matches_subset() {
        let config = GeneSelectionConfig {
            n_top_genes: Some(5),
            ..Default::default()
        };
        let mut flagged = fixture();
        let mask = select_genes_monocle(&mut flagged, &config, &NullSink).unwrap();

        let mut subset = fixture();
        let config = GeneSelectionConfig {
            keep_filtered: false,
            ..config
        };
        let mask_subset = select_genes_monocle(&mut subset, &config, &NullSink).unwrap();

        assert_eq!(mask, mask_subset);
        let expected: Vec<String> = selected(&mask).iter().map(|&g| format!("gene_{}", g)).collect();
        assert_eq!(subset.gene_ids(), expected.as_slice());
        assert!(subset.require_var_bool(USE_FOR_PCA).unwrap().iter().all(|&u| u));
    }

    #[test]
    fn test_monocle_small_store_keeps_all_but_excluded() {
        let mut ds = fixture();
        let config = GeneSelectionConfig {
            sort_by: GeneScorer::Gini,
            genes_to_exclude: vec!["gene_3".to_string()],
            ..Default::default()
        };
        let mask = select_genes_monocle(&mut ds, &config, &NullSink).unwrap();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 49);
        assert!(!mask[3]);
    }

    #[test]
    fn test_monocle_gini_respects_basic_filter() {
        let mut ds = fixture();
        let mut basic = vec![true; 50];
        basic[NOISY[0]] = false;
        ds.set_var_column(PASS_BASIC_FILTER, Column::Bool(basic)).unwrap();
        let config = GeneSelectionConfig {
            n_top_genes: Some(4),
            sort_by: GeneScorer::Gini,
            ..Default::default()
        };
        let mask = select_genes_monocle(&mut ds, &config, &NullSink).unwrap();
        assert_eq!(selected(&mask), NOISY[1..].to_vec());
        assert!(ds.require_var_float("X_gini").is_ok());
    }

    #[test]
    fn test_seurat_recipe_writes_columns() {
        let mut ds = fixture();
        let mut basic = vec![true; 50];
        basic[0] = false;
        basic[1] = false;
        ds.set_var_column(PASS_BASIC_FILTER, Column::Bool(basic)).unwrap();
        let config = GeneSelectionConfig {
            n_top_genes: Some(5),
            sort_by: GeneScorer::SeuratDispersion,
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let mask = select_genes_by_seurat_recipe(&mut ds, &config, &sink).unwrap();

        assert_eq!(mask.iter().filter(|&&m| m).count(), 5);
        assert!(!mask[0] && !mask[1]);
        let gene_mean = ds.require_var_float("gene_mean").unwrap();
        assert!(gene_mean[0].is_nan());
        assert_eq!(ds.require_var_bool("highly_variable").unwrap(), mask);
        assert_eq!(ds.require_var_bool(USE_FOR_PCA).unwrap(), mask);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_seurat_recipe_inplace_and_missing_filter_key() {
        let mut ds = fixture();
        let config = GeneSelectionConfig {
            n_top_genes: Some(5),
            sort_by: GeneScorer::SeuratDispersion,
            ..Default::default()
        };
        assert!(matches!(
            select_genes_by_seurat_recipe(&mut ds, &config, &NullSink),
            Err(ScError::MissingKey { .. })
        ));

        let config = GeneSelectionConfig {
            var_filter_key: None,
            inplace: true,
            ..config
        };
        select_genes_by_seurat_recipe(&mut ds, &config, &NullSink).unwrap();
        assert_eq!(ds.n_vars(), 5);
    }

    #[test]
    fn test_seurat_recipe_duplicate_names_warn() {
        let mut ds = fixture();
        let config = GeneSelectionConfig {
            n_top_genes: Some(3),
            sort_by: GeneScorer::SeuratDispersion,
            gene_names: Some(vec!["gene_1".into(), "gene_2".into(), "gene_1".into(), "gene_9".into()]),
            nan_replace_val: Some(0.0),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        select_genes_by_seurat_recipe(&mut ds, &config, &sink).unwrap();
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_seurat_recipe_rejects_gini() {
        let mut ds = fixture();
        let config = GeneSelectionConfig {
            sort_by: GeneScorer::Gini,
            ..Default::default()
        };
        assert!(matches!(
            select_genes_by_seurat_recipe(&mut ds, &config, &NullSink),
            Err(ScError::InvalidConfig { .. })
        ));
    }
}
