use crate::adata::AnnMatrix;
use crate::error::{Error, Result};
use crate::nn::{batch_balanced_neighbors, NeighborGraph};
use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sprs::TriMat;
use std::collections::BTreeSet;

/// Batch-balanced k-NN settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrateConfig {
    /// Nearest neighbors drawn from every batch for every cell.
    pub neighbors_within_batch: usize,
}

impl Default for IntegrateConfig {
    fn default() -> Self {
        IntegrateConfig {
            neighbors_within_batch: 3,
        }
    }
}

impl IntegrateConfig {
    /// Reject settings that produce no graph.
    pub fn validate(&self) -> Result<()> {
        if self.neighbors_within_batch == 0 {
            return Err(Error::Configuration(
                "neighbors_within_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Gene symbols present in both matrices, in sorted order. Commutative as a
/// set.
pub fn intersect_genes(a: &AnnMatrix, b: &AnnMatrix) -> Vec<String> {
    let a_symbols: BTreeSet<&str> = a.gene_symbols.iter().map(String::as_str).collect();
    let b_symbols: BTreeSet<&str> = b.gene_symbols.iter().map(String::as_str).collect();
    a_symbols
        .intersection(&b_symbols)
        .map(|s| s.to_string())
        .collect()
}

/// Concatenate two samples along cells over their shared genes (sorted
/// symbol order). Barcodes are suffixed with the batch label so they stay
/// unique across samples; `rows(out) = rows(a) + rows(b)`. When the two
/// samples annotate a shared symbol with different gene identifiers, the
/// merged id is `"{a_id};{b_id}"`.
pub fn concat(a: &AnnMatrix, b: &AnnMatrix) -> Result<AnnMatrix> {
    let shared = intersect_genes(a, b);
    if shared.is_empty() {
        return Err(Error::EmptyResult("no genes shared between the samples".to_string()));
    }

    let a_index = a.symbol_index();
    let b_index = b.symbol_index();
    let a_cols: Vec<usize> = shared.iter().map(|s| a_index[s.as_str()]).collect();
    let b_cols: Vec<usize> = shared.iter().map(|s| b_index[s.as_str()]).collect();

    let a_sub = a.select_genes(&a_cols, "gene intersection")?;
    let b_sub = b.select_genes(&b_cols, "gene intersection")?;

    let (a_cells, genes) = (a_sub.n_cells(), a_sub.n_genes());
    let cells = a_cells + b_sub.n_cells();

    let mut tri = TriMat::new((cells, genes));
    for (row, row_vec) in a_sub.counts.outer_iterator().enumerate() {
        for (col, &v) in row_vec.iter() {
            tri.add_triplet(row, col, v);
        }
    }
    for (row, row_vec) in b_sub.counts.outer_iterator().enumerate() {
        for (col, &v) in row_vec.iter() {
            tri.add_triplet(a_cells + row, col, v);
        }
    }

    let suffixed = |m: &AnnMatrix| -> Vec<String> {
        m.barcodes
            .iter()
            .zip(&m.obs.batch)
            .map(|(bc, batch)| format!("{bc}-{batch}"))
            .collect()
    };
    let mut barcodes = suffixed(&a_sub);
    barcodes.extend(suffixed(&b_sub));

    // the samples may carry different identifiers for a shared symbol;
    // keep both so neither is silently lost
    let gene_ids: Vec<String> = a_sub
        .gene_ids
        .iter()
        .zip(&b_sub.gene_ids)
        .map(|(ia, ib)| if ia == ib { ia.clone() } else { format!("{ia};{ib}") })
        .collect();

    let chain = |xa: &[f64], xb: &[f64]| -> Vec<f64> { xa.iter().chain(xb).copied().collect() };
    let mut out = AnnMatrix::new(tri.to_csr(), barcodes, gene_ids, shared, "merged")?;
    out.obs.total_counts = chain(&a_sub.obs.total_counts, &b_sub.obs.total_counts);
    out.obs.pct_mito = chain(&a_sub.obs.pct_mito, &b_sub.obs.pct_mito);
    out.obs.pct_ribo = chain(&a_sub.obs.pct_ribo, &b_sub.obs.pct_ribo);
    out.obs.n_genes = a_sub
        .obs
        .n_genes
        .iter()
        .chain(&b_sub.obs.n_genes)
        .copied()
        .collect();
    out.obs.batch = a_sub
        .obs
        .batch
        .iter()
        .chain(&b_sub.obs.batch)
        .cloned()
        .collect();
    out.var.mito = a_sub.var.mito.clone();
    out.var.ribo = a_sub.var.ribo.clone();
    out.var.n_cells = crate::qc::genes_per_cell_counts(&out);

    info!(
        "merged {} + {} cells over {} shared genes",
        a_cells,
        b_sub.n_cells(),
        genes
    );
    Ok(out)
}

/// Numeric batch ids from the per-cell labels, in sorted label order.
pub fn batch_ids(labels: &[String]) -> Vec<usize> {
    let uniq: Vec<&String> = {
        let set: BTreeSet<&String> = labels.iter().collect();
        set.into_iter().collect()
    };
    labels
        .iter()
        .map(|l| uniq.binary_search(&l).expect("label in unique set"))
        .collect()
}

/// Replace the naive k-NN graph with a batch-balanced one over the same PC
/// coordinates: every cell draws neighbors from every batch.
pub fn bbknn(pca: &Array2<f64>, batch_labels: &[String], config: &IntegrateConfig) -> Result<NeighborGraph> {
    config.validate()?;
    let ids = batch_ids(batch_labels);
    Ok(batch_balanced_neighbors(pca, &ids, config.neighbors_within_batch))
}
