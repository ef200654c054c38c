use crate::adata::AnnMatrix;
use crate::error::{Error, Result};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Quality-control thresholds. Gene-name patterns are species-dependent and
/// caller-configurable; the defaults match human gene symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    /// Drop genes detected in fewer than this many cells.
    pub min_cells_per_gene: usize,
    /// Drop cells expressing fewer than this many genes.
    pub min_genes_per_cell: usize,
    /// Drop cells expressing more than this many genes (putative multiplets).
    pub max_genes_per_cell: usize,
    /// Drop cells whose mitochondrial fraction exceeds this percentage.
    pub max_pct_mito: f64,
    /// Regex matching mitochondrial gene symbols.
    pub mito_pattern: String,
    /// Regex matching ribosomal gene symbols.
    pub ribo_pattern: String,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig {
            min_cells_per_gene: 3,
            min_genes_per_cell: 200,
            max_genes_per_cell: 5000,
            max_pct_mito: 10.0,
            mito_pattern: "^MT-".to_string(),
            ribo_pattern: "^RP[SL]".to_string(),
        }
    }
}

impl QcConfig {
    /// Check thresholds and compile the gene-name patterns.
    pub fn validate(&self) -> Result<(Regex, Regex)> {
        if self.min_genes_per_cell > self.max_genes_per_cell {
            return Err(Error::Configuration(format!(
                "min_genes_per_cell ({}) > max_genes_per_cell ({})",
                self.min_genes_per_cell, self.max_genes_per_cell
            )));
        }
        if !(0.0..=100.0).contains(&self.max_pct_mito) {
            return Err(Error::Configuration(format!(
                "max_pct_mito ({}) must be a percentage",
                self.max_pct_mito
            )));
        }
        let mito = Regex::new(&self.mito_pattern)
            .map_err(|e| Error::Configuration(format!("bad mito_pattern: {e}")))?;
        let ribo = Regex::new(&self.ribo_pattern)
            .map_err(|e| Error::Configuration(format!("bad ribo_pattern: {e}")))?;
        Ok((mito, ribo))
    }
}

/// Number of cells each gene is detected in.
pub fn genes_per_cell_counts(adata: &AnnMatrix) -> Vec<usize> {
    let mut n_cells = vec![0usize; adata.n_genes()];
    for row in adata.counts.outer_iterator() {
        for (col, &v) in row.iter() {
            if v > 0 {
                n_cells[col] += 1;
            }
        }
    }
    n_cells
}

/// Drop genes detected in fewer than `min_cells` cells; `var.n_cells` is
/// filled on the result.
pub fn filter_genes(adata: &AnnMatrix, min_cells: usize) -> Result<AnnMatrix> {
    let n_cells = genes_per_cell_counts(adata);
    let keep: Vec<usize> = (0..adata.n_genes()).filter(|&g| n_cells[g] >= min_cells).collect();
    let mut out = adata.select_genes(&keep, "min_cells gene filter")?;
    out.var.n_cells = keep.iter().map(|&g| n_cells[g]).collect();
    Ok(out)
}

/// Drop cells expressing fewer than `min_genes` genes.
pub fn filter_cells_min_genes(adata: &AnnMatrix, min_genes: usize) -> Result<AnnMatrix> {
    let keep: Vec<usize> = adata
        .counts
        .outer_iterator()
        .enumerate()
        .filter(|(_, row)| row.iter().filter(|&(_, &v)| v > 0).count() >= min_genes)
        .map(|(i, _)| i)
        .collect();
    adata.select_cells(&keep, "min_genes cell filter")
}

/// Fill per-cell metrics (`n_genes`, `total_counts`, `pct_mito`, `pct_ribo`)
/// and per-gene flags from the compiled patterns, returning a new matrix.
pub fn compute_metrics(adata: &AnnMatrix, mito: &Regex, ribo: &Regex) -> AnnMatrix {
    let mut out = adata.clone();

    out.var.mito = out.gene_symbols.iter().map(|s| mito.is_match(s)).collect();
    out.var.ribo = out.gene_symbols.iter().map(|s| ribo.is_match(s)).collect();
    out.var.n_cells = genes_per_cell_counts(adata);

    for (cell, row) in out.counts.outer_iterator().enumerate() {
        let mut total = 0.0;
        let mut n_genes = 0usize;
        let mut mito_counts = 0.0;
        let mut ribo_counts = 0.0;
        for (col, &v) in row.iter() {
            if v > 0 {
                n_genes += 1;
            }
            let v = f64::from(v);
            total += v;
            if out.var.mito[col] {
                mito_counts += v;
            }
            if out.var.ribo[col] {
                ribo_counts += v;
            }
        }
        out.obs.total_counts[cell] = total;
        out.obs.n_genes[cell] = n_genes;
        out.obs.pct_mito[cell] = if total > 0.0 { 100.0 * mito_counts / total } else { 0.0 };
        out.obs.pct_ribo[cell] = if total > 0.0 { 100.0 * ribo_counts / total } else { 0.0 };
    }
    out
}

/// Run the full QC sequence, in fixed order:
/// gene floor, cell floor, metrics, multiplet ceiling, cell floor again,
/// mitochondrial cutoff. A cell exactly at `max_pct_mito` is kept.
pub fn run(adata: &AnnMatrix, config: &QcConfig) -> Result<AnnMatrix> {
    let (mito, ribo) = config.validate()?;
    let (cells0, genes0) = (adata.n_cells(), adata.n_genes());

    let adata = filter_genes(adata, config.min_cells_per_gene)?;
    let adata = filter_cells_min_genes(&adata, config.min_genes_per_cell)?;
    let adata = compute_metrics(&adata, &mito, &ribo);

    let keep: Vec<usize> = (0..adata.n_cells())
        .filter(|&c| adata.obs.n_genes[c] <= config.max_genes_per_cell)
        .collect();
    let adata = adata.select_cells(&keep, "max_genes cell filter")?;

    let keep: Vec<usize> = (0..adata.n_cells())
        .filter(|&c| adata.obs.n_genes[c] >= config.min_genes_per_cell)
        .collect();
    let adata = adata.select_cells(&keep, "min_genes cell filter")?;

    let keep: Vec<usize> = (0..adata.n_cells())
        .filter(|&c| adata.obs.pct_mito[c] <= config.max_pct_mito)
        .collect();
    let adata = adata.select_cells(&keep, "pct_mito cell filter")?;

    info!(
        "qc: {} x {} -> {} x {}",
        cells0,
        genes0,
        adata.n_cells(),
        adata.n_genes()
    );
    Ok(adata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn matrix(dense: &[&[u32]], symbols: &[&str]) -> AnnMatrix {
        let cells = dense.len();
        let genes = dense[0].len();
        let mut tri = TriMat::new((cells, genes));
        for (i, row) in dense.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v > 0 {
                    tri.add_triplet(i, j, v);
                }
            }
        }
        let ids: Vec<String> = (0..genes).map(|g| format!("ENSG{g}")).collect();
        let barcodes: Vec<String> = (0..cells).map(|c| format!("BC{c}-1")).collect();
        AnnMatrix::new(tri.to_csr(), barcodes, ids, strings(symbols), "s1").unwrap()
    }

    #[test]
    fn test_gene_floor_drops_rare_gene() {
        // 3 cells x 5 genes, gene "E" seen in one cell only
        let m = matrix(
            &[
                &[1, 2, 3, 1, 0],
                &[2, 1, 1, 3, 0],
                &[1, 1, 2, 1, 4],
            ],
            &["A", "B", "C", "D", "E"],
        );
        let out = filter_genes(&m, 3).unwrap();
        assert_eq!(out.n_cells(), 3);
        assert_eq!(out.n_genes(), 4);
        assert_eq!(out.gene_symbols, strings(&["A", "B", "C", "D"]));
        assert_eq!(out.var.n_cells, vec![3, 3, 3, 3]);
    }

    #[test]
    fn test_filtering_is_monotonic() {
        let m = matrix(
            &[
                &[1, 2, 3, 1, 0],
                &[2, 1, 1, 3, 0],
                &[0, 0, 0, 1, 4],
            ],
            &["A", "B", "C", "D", "E"],
        );
        let cfg = QcConfig {
            min_cells_per_gene: 2,
            min_genes_per_cell: 2,
            max_genes_per_cell: 5000,
            max_pct_mito: 100.0,
            ..QcConfig::default()
        };
        let out = run(&m, &cfg).unwrap();
        assert!(out.n_cells() <= m.n_cells());
        assert!(out.n_genes() <= m.n_genes());
    }

    #[test]
    fn test_mito_boundary() {
        // total 100 counts per cell; MT-CO1 carries 15 / 10 / 5 of them
        let m = matrix(
            &[
                &[15, 45, 30, 10],
                &[10, 50, 30, 10],
                &[5, 55, 30, 10],
            ],
            &["MT-CO1", "A", "B", "C"],
        );
        let cfg = QcConfig {
            min_cells_per_gene: 1,
            min_genes_per_cell: 1,
            ..QcConfig::default()
        };
        let out = run(&m, &cfg).unwrap();
        // 15% dropped, exactly 10% kept, 5% kept
        assert_eq!(out.n_cells(), 2);
        assert_eq!(out.barcodes, strings(&["BC1-1", "BC2-1"]));
        assert_eq!(out.obs.pct_mito, vec![10.0, 5.0]);
    }

    #[test]
    fn test_metrics() {
        let m = matrix(
            &[
                &[4, 0, 6, 10],
                &[0, 5, 0, 15],
            ],
            &["MT-ND1", "RPS6", "RPL3", "A"],
        );
        let cfg = QcConfig::default();
        let (mito, ribo) = cfg.validate().unwrap();
        let out = compute_metrics(&m, &mito, &ribo);

        assert_eq!(out.var.mito, vec![true, false, false, false]);
        assert_eq!(out.var.ribo, vec![false, true, true, false]);
        assert_eq!(out.obs.n_genes, vec![3, 2]);
        assert_eq!(out.obs.total_counts, vec![20.0, 20.0]);
        assert_eq!(out.obs.pct_mito, vec![20.0, 0.0]);
        assert_eq!(out.obs.pct_ribo, vec![30.0, 25.0]);
    }

    #[test]
    fn test_invalid_config() {
        let cfg = QcConfig {
            mito_pattern: "^MT-(".to_string(),
            ..QcConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let cfg = QcConfig {
            min_genes_per_cell: 10,
            max_genes_per_cell: 5,
            ..QcConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_everything_filtered_is_empty_result() {
        let m = matrix(&[&[1, 0], &[0, 1]], &["A", "B"]);
        let cfg = QcConfig {
            min_cells_per_gene: 1,
            min_genes_per_cell: 100,
            ..QcConfig::default()
        };
        assert!(matches!(run(&m, &cfg), Err(Error::EmptyResult(_))));
    }
}
