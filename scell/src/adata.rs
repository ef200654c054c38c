use crate::error::{Error, Result};
use sprs::{CsMat, TriMat};
use std::collections::HashMap;

/// Per-cell annotations, parallel to the rows of the count matrix.
#[derive(Debug, Clone, Default)]
pub struct ObsTable {
    /// Total UMI counts per cell.
    pub total_counts: Vec<f64>,
    /// Number of genes detected per cell.
    pub n_genes: Vec<usize>,
    /// Percent of counts from mitochondrial genes.
    pub pct_mito: Vec<f64>,
    /// Percent of counts from ribosomal genes.
    pub pct_ribo: Vec<f64>,
    /// Sample-of-origin label.
    pub batch: Vec<String>,
}

impl ObsTable {
    fn select(&self, keep: &[usize]) -> ObsTable {
        ObsTable {
            total_counts: keep.iter().map(|&i| self.total_counts[i]).collect(),
            n_genes: keep.iter().map(|&i| self.n_genes[i]).collect(),
            pct_mito: keep.iter().map(|&i| self.pct_mito[i]).collect(),
            pct_ribo: keep.iter().map(|&i| self.pct_ribo[i]).collect(),
            batch: keep.iter().map(|&i| self.batch[i].clone()).collect(),
        }
    }
}

/// Per-gene annotations, parallel to the columns of the count matrix.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    /// Number of cells each gene is detected in.
    pub n_cells: Vec<usize>,
    /// Mitochondrial gene flag.
    pub mito: Vec<bool>,
    /// Ribosomal gene flag.
    pub ribo: Vec<bool>,
    /// Highly-variable gene flag.
    pub highly_variable: Vec<bool>,
}

impl VarTable {
    fn select(&self, keep: &[usize]) -> VarTable {
        VarTable {
            n_cells: keep.iter().map(|&i| self.n_cells[i]).collect(),
            mito: keep.iter().map(|&i| self.mito[i]).collect(),
            ribo: keep.iter().map(|&i| self.ribo[i]).collect(),
            highly_variable: keep.iter().map(|&i| self.highly_variable[i]).collect(),
        }
    }
}

/// Annotated UMI count matrix, cells in rows and genes in columns.
#[derive(Debug, Clone)]
pub struct AnnMatrix {
    /// Sparse CSR counts, `n_cells x n_genes`.
    pub counts: CsMat<u32>,
    /// Cell barcodes, one per row.
    pub barcodes: Vec<String>,
    /// Gene identifiers, one per column.
    pub gene_ids: Vec<String>,
    /// Gene symbols, unique after loading.
    pub gene_symbols: Vec<String>,
    /// Per-cell annotations.
    pub obs: ObsTable,
    /// Per-gene annotations.
    pub var: VarTable,
}

impl AnnMatrix {
    /// Assemble a matrix from loader output; annotation tables start zeroed
    /// and `batch` carries the sample label.
    pub fn new(
        counts: CsMat<u32>,
        barcodes: Vec<String>,
        gene_ids: Vec<String>,
        gene_symbols: Vec<String>,
        sample: &str,
    ) -> Result<AnnMatrix> {
        let (cells, genes) = counts.shape();
        if barcodes.len() != cells {
            return Err(Error::InputFormat(format!(
                "matrix has {} rows but {} barcodes",
                cells,
                barcodes.len()
            )));
        }
        if gene_ids.len() != genes || gene_symbols.len() != genes {
            return Err(Error::InputFormat(format!(
                "matrix has {} columns but {} features",
                genes,
                gene_ids.len()
            )));
        }

        let gene_symbols = make_unique(&gene_symbols);
        Ok(AnnMatrix {
            counts,
            barcodes,
            gene_ids,
            gene_symbols,
            obs: ObsTable {
                total_counts: vec![0.0; cells],
                n_genes: vec![0; cells],
                pct_mito: vec![0.0; cells],
                pct_ribo: vec![0.0; cells],
                batch: vec![sample.to_string(); cells],
            },
            var: VarTable {
                n_cells: vec![0; genes],
                mito: vec![false; genes],
                ribo: vec![false; genes],
                highly_variable: vec![false; genes],
            },
        })
    }

    /// Number of cells (rows).
    pub fn n_cells(&self) -> usize {
        self.counts.rows()
    }

    /// Number of genes (columns).
    pub fn n_genes(&self) -> usize {
        self.counts.cols()
    }

    /// Keep only the cells at `keep` (row indices, ascending), returning a
    /// new matrix. Fails with `EmptyResult` when nothing survives.
    pub fn select_cells(&self, keep: &[usize], what: &str) -> Result<AnnMatrix> {
        if keep.is_empty() {
            return Err(Error::EmptyResult(format!("no cells left after {what}")));
        }

        let genes = self.n_genes();
        let mut tri = TriMat::new((keep.len(), genes));
        for (new_row, &old_row) in keep.iter().enumerate() {
            if let Some(row) = self.counts.outer_view(old_row) {
                for (col, &v) in row.iter() {
                    tri.add_triplet(new_row, col, v);
                }
            }
        }

        Ok(AnnMatrix {
            counts: tri.to_csr(),
            barcodes: keep.iter().map(|&i| self.barcodes[i].clone()).collect(),
            gene_ids: self.gene_ids.clone(),
            gene_symbols: self.gene_symbols.clone(),
            obs: self.obs.select(keep),
            var: self.var.clone(),
        })
    }

    /// Keep only the genes at `keep` (column indices, ascending), returning a
    /// new matrix. Fails with `EmptyResult` when nothing survives.
    pub fn select_genes(&self, keep: &[usize], what: &str) -> Result<AnnMatrix> {
        if keep.is_empty() {
            return Err(Error::EmptyResult(format!("no genes left after {what}")));
        }

        let mut col_map = vec![usize::MAX; self.n_genes()];
        for (new_col, &old_col) in keep.iter().enumerate() {
            col_map[old_col] = new_col;
        }

        let mut tri = TriMat::new((self.n_cells(), keep.len()));
        for (row, row_vec) in self.counts.outer_iterator().enumerate() {
            for (col, &v) in row_vec.iter() {
                if col_map[col] != usize::MAX {
                    tri.add_triplet(row, col_map[col], v);
                }
            }
        }

        Ok(AnnMatrix {
            counts: tri.to_csr(),
            barcodes: self.barcodes.clone(),
            gene_ids: keep.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            gene_symbols: keep.iter().map(|&i| self.gene_symbols[i].clone()).collect(),
            obs: self.obs.clone(),
            var: self.var.select(keep),
        })
    }

    /// Column index of each gene symbol.
    pub fn symbol_index(&self) -> HashMap<&str, usize> {
        self.gene_symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect()
    }
}

/// Deduplicate gene symbols: the first occurrence is kept as-is, later ones
/// get `-1`, `-2`, ... suffixes. Suffixed names are checked against the full
/// symbol set so an existing `FOO-1` never collides.
pub fn make_unique(symbols: &[String]) -> Vec<String> {
    let mut taken: HashMap<String, usize> = HashMap::new();
    for s in symbols {
        *taken.entry(s.clone()).or_insert(0) += 1;
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(symbols.len());
    for s in symbols {
        let times = seen.entry(s.as_str()).or_insert(0);
        if *times == 0 {
            out.push(s.clone());
        } else {
            let mut suffix = *times;
            let mut candidate = format!("{s}-{suffix}");
            while taken.contains_key(&candidate) {
                suffix += 1;
                candidate = format!("{s}-{suffix}");
            }
            taken.insert(candidate.clone(), 1);
            out.push(candidate);
        }
        *times += 1;
    }
    out
}
