//! Annotated matrix boundary and its in-memory implementation

use std::collections::HashMap;

use super::{CellMetadata, Column, ExpressionMatrix, GeneMetadata};
use crate::error::{Result, ScError};

/// Key of the main expression matrix
pub const X_LAYER: &str = "X";

/// Access to an annotated cells x genes container.
///
/// Algorithms read matrices and metadata through this trait and write derived
/// per-gene columns back; the container itself is owned by the caller.
pub trait AnnotatedMatrix {
    fn n_obs(&self) -> usize;
    fn n_vars(&self) -> usize;
    fn gene_ids(&self) -> &[String];

    /// Matrix stored under `key` (`"X"` for the main matrix)
    fn layer(&self, key: &str) -> Option<&ExpressionMatrix>;

    fn layer_mut(&mut self, key: &str) -> Option<&mut ExpressionMatrix>;

    /// Keys of every available layer, `"X"` first
    fn layer_keys(&self) -> Vec<String>;

    fn obs_column(&self, key: &str) -> Option<&Column>;
    fn var_column(&self, key: &str) -> Option<&Column>;
    fn set_var_column(&mut self, key: &str, column: Column) -> Result<()>;

    /// Physically keep only the genes whose mask entry is true
    fn subset_genes(&mut self, mask: &[bool]) -> Result<()>;

    /// Matrix under `key`, or a configuration error naming the missing layer
    fn require_layer(&self, key: &str) -> Result<&ExpressionMatrix> {
        self.layer(key).ok_or_else(|| ScError::MissingKey {
            key: key.to_string(),
            location: "layers".to_string(),
        })
    }

    fn require_var_bool(&self, key: &str) -> Result<Vec<bool>> {
        self.var_column(key)
            .and_then(|c| c.as_bool())
            .map(|v| v.to_vec())
            .ok_or_else(|| ScError::MissingKey {
                key: key.to_string(),
                location: "gene metadata (boolean column)".to_string(),
            })
    }

    fn require_var_float(&self, key: &str) -> Result<Vec<f64>> {
        self.var_column(key)
            .and_then(|c| c.as_float())
            .map(|v| v.to_vec())
            .ok_or_else(|| ScError::MissingKey {
                key: key.to_string(),
                location: "gene metadata (numeric column)".to_string(),
            })
    }

    fn obs_float(&self, key: &str) -> Option<Vec<f64>> {
        self.obs_column(key).and_then(|c| c.as_float()).map(|v| v.to_vec())
    }
}

/// In-memory annotated matrix: a main matrix, named layers and metadata
#[derive(Debug, Clone)]
pub struct CellDataSet {
    x: ExpressionMatrix,
    layers: HashMap<String, ExpressionMatrix>,
    obs: CellMetadata,
    var: GeneMetadata,
}

impl CellDataSet {
    pub fn new(x: ExpressionMatrix, cell_ids: Vec<String>, gene_ids: Vec<String>) -> Result<Self> {
        let (n_cells, n_genes) = (x.n_cells(), x.n_genes());
        if cell_ids.len() != n_cells {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} cell IDs", n_cells),
                got: format!("{} cell IDs", cell_ids.len()),
            });
        }
        if gene_ids.len() != n_genes {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        Ok(Self {
            x,
            layers: HashMap::new(),
            obs: CellMetadata::new(cell_ids),
            var: GeneMetadata::new(gene_ids),
        })
    }

    /// Build with generated identifiers `cell_<i>` / `gene_<j>`
    pub fn from_matrix(x: ExpressionMatrix) -> Result<Self> {
        let cells = (0..x.n_cells()).map(|i| format!("cell_{}", i)).collect();
        let genes = (0..x.n_genes()).map(|j| format!("gene_{}", j)).collect();
        Self::new(x, cells, genes)
    }

    pub fn x(&self) -> &ExpressionMatrix {
        &self.x
    }

    pub fn x_mut(&mut self) -> &mut ExpressionMatrix {
        &mut self.x
    }

    pub fn obs(&self) -> &CellMetadata {
        &self.obs
    }

    pub fn obs_mut(&mut self) -> &mut CellMetadata {
        &mut self.obs
    }

    pub fn var(&self) -> &GeneMetadata {
        &self.var
    }

    pub fn add_layer(&mut self, key: &str, matrix: ExpressionMatrix) -> Result<()> {
        if matrix.n_cells() != self.x.n_cells() || matrix.n_genes() != self.x.n_genes() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} x {}", self.x.n_cells(), self.x.n_genes()),
                got: format!("{} x {}", matrix.n_cells(), matrix.n_genes()),
            });
        }
        self.layers.insert(key.to_string(), matrix);
        Ok(())
    }

}

impl AnnotatedMatrix for CellDataSet {
    fn n_obs(&self) -> usize {
        self.x.n_cells()
    }

    fn n_vars(&self) -> usize {
        self.x.n_genes()
    }

    fn gene_ids(&self) -> &[String] {
        self.var.gene_ids()
    }

    fn layer(&self, key: &str) -> Option<&ExpressionMatrix> {
        if key == X_LAYER {
            Some(&self.x)
        } else {
            self.layers.get(key)
        }
    }

    fn layer_mut(&mut self, key: &str) -> Option<&mut ExpressionMatrix> {
        if key == X_LAYER {
            Some(&mut self.x)
        } else {
            self.layers.get_mut(key)
        }
    }

    fn layer_keys(&self) -> Vec<String> {
        let mut others: Vec<String> = self.layers.keys().cloned().collect();
        others.sort();
        let mut keys = vec![X_LAYER.to_string()];
        keys.extend(others);
        keys
    }

    fn obs_column(&self, key: &str) -> Option<&Column> {
        self.obs.get(key)
    }

    fn var_column(&self, key: &str) -> Option<&Column> {
        self.var.get(key)
    }

    fn set_var_column(&mut self, key: &str, column: Column) -> Result<()> {
        self.var.insert(key, column)
    }

    fn subset_genes(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.n_vars() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} mask entries", self.n_vars()),
                got: format!("{} mask entries", mask.len()),
            });
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .collect();
        self.x = self.x.select_genes(&keep);
        for layer in self.layers.values_mut() {
            *layer = layer.select_genes(&keep);
        }
        self.var = self.var.subset(&keep);
        Ok(())
    }
}
