//! Gini coefficient per gene

use crate::data::{AnnotatedMatrix, Column, MatrixStats};
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::stats::argsort_descending;

/// Gene metadata column holding the Gini coefficients of a layer
pub fn gini_key(layer: &str) -> String {
    format!("{}_gini", layer)
}

/// Compute the per-gene Gini coefficient of each layer and store it as `{layer}_gini`
///
/// `layers = None` processes every layer of the store. Returns the keys written.
pub fn gini<A: AnnotatedMatrix>(store: &mut A, layers: Option<&[&str]>, sink: &dyn ProgressSink) -> Result<Vec<String>> {
    let layers: Vec<String> = match layers {
        Some(list) => list.iter().map(|s| s.to_string()).collect(),
        None => store.layer_keys(),
    };

    let mut written = Vec::with_capacity(layers.len());
    for layer in &layers {
        let values = store.require_layer(layer)?.gini();
        let key = gini_key(layer);
        sink.info_insert(&key, "var");
        store.set_var_column(&key, Column::Float(values.to_vec()))?;
        written.push(key);
    }
    Ok(written)
}

/// Genes ranked by their stored Gini coefficient, highest first
pub fn top_table_gini<A: AnnotatedMatrix>(store: &A, layer: &str) -> Result<Vec<(String, f64)>> {
    let values = store.require_var_float(&gini_key(layer))?;
    let ids = store.gene_ids();
    Ok(argsort_descending(&values)
        .into_iter()
        .map(|g| (ids[g].clone(), values[g]))
        .collect())
}
