//! Metadata tables for cells and genes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, ScError};

/// One per-gene (or per-cell) metadata column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            Column::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            Column::Bool(v) => Some(v),
            Column::Float(_) => None,
        }
    }

    /// Keep the rows listed in `indices`
    pub fn select(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Bool(v) => Column::Bool(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// Cell (observation) metadata: size factors and other numeric columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    cell_ids: Vec<String>,
    columns: HashMap<String, Column>,
}

impl CellMetadata {
    pub fn new(cell_ids: Vec<String>) -> Self {
        Self {
            cell_ids,
            columns: HashMap::new(),
        }
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn insert(&mut self, name: &str, column: Column) -> Result<()> {
        if column.len() != self.cell_ids.len() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} values", self.cell_ids.len()),
                got: format!("{} values", column.len()),
            });
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }
}

/// Gene (variable) metadata: identifiers plus derived per-gene columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneMetadata {
    gene_ids: Vec<String>,
    columns: HashMap<String, Column>,
}

impl GeneMetadata {
    pub fn new(gene_ids: Vec<String>) -> Self {
        {
            let mut seen = std::collections::HashSet::new();
            for id in &gene_ids {
                if !seen.insert(id) {
                    log::warn!("Duplicate gene name detected: '{}'. Gene names should be unique.", id);
                }
            }
        }
        Self {
            gene_ids,
            columns: HashMap::new(),
        }
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Index of a gene by name
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    pub fn insert(&mut self, name: &str, column: Column) -> Result<()> {
        if column.len() != self.gene_ids.len() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} values", self.gene_ids.len()),
                got: format!("{} values", column.len()),
            });
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Subset every column to the genes listed in `indices`
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            gene_ids: indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.select(indices)))
                .collect(),
        }
    }
}
