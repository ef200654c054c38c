//! End-to-end run over a synthetic two-sample dataset written to disk in
//! the 10X triple-file layout.

use scell::config::PipelineConfig;
use scell::export::{export_analysis, export_integrated};
use scell::pipeline::{analyze_sample, integrate_samples};
use scell::normalize::{HvgConfig, NormConfig};
use scell::qc::QcConfig;
use scell::tenx::load_tenx_dir;
use std::fmt::Write as _;
use std::path::Path;

const CELLS: usize = 40;
const GENES: usize = 30;

/// Two interleaved populations: even cells express the first half of the
/// genes strongly, odd cells the second half. `shift` perturbs the counts
/// so the two samples are not identical; `extra_gene` adds a gene private
/// to the sample so integration exercises the intersection.
fn write_sample(dir: &Path, shift: u32, extra_gene: bool) {
    let genes = if extra_gene { GENES + 1 } else { GENES };

    let mut features = String::new();
    for g in 0..GENES {
        let symbol = if g == GENES - 1 { "MT-1".to_string() } else { format!("GENE{g}") };
        writeln!(features, "ENSG{g:05}\t{symbol}").unwrap();
    }
    if extra_gene {
        writeln!(features, "ENSGEXTRA\tEXTRA").unwrap();
    }
    std::fs::write(dir.join("genes.tsv"), features).unwrap();

    let mut barcodes = String::new();
    for c in 0..CELLS {
        writeln!(barcodes, "BC{c:04}").unwrap();
    }
    std::fs::write(dir.join("barcodes.tsv"), barcodes).unwrap();

    let mut entries: Vec<(usize, usize, u32)> = Vec::new();
    for c in 0..CELLS {
        let population = c % 2;
        for g in 0..genes {
            let count = if g == GENES - 1 {
                // mitochondrial gene: a small, constant fraction
                2
            } else if g >= GENES {
                1
            } else {
                let strong = if g < GENES / 2 { population == 0 } else { population == 1 };
                let noise = ((c as u32 * 13 + g as u32 * 7 + shift) % 3) + 1;
                if strong {
                    20 + noise
                } else {
                    noise % 2
                }
            };
            if count > 0 {
                entries.push((g + 1, c + 1, count));
            }
        }
    }

    let mut mtx = String::new();
    writeln!(mtx, "%%MatrixMarket matrix coordinate integer general").unwrap();
    writeln!(mtx, "%").unwrap();
    writeln!(mtx, "{} {} {}", genes, CELLS, entries.len()).unwrap();
    for (g, c, v) in entries {
        writeln!(mtx, "{g} {c} {v}").unwrap();
    }
    std::fs::write(dir.join("matrix.mtx"), mtx).unwrap();
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        qc: QcConfig {
            min_cells_per_gene: 1,
            min_genes_per_cell: 2,
            max_genes_per_cell: 5000,
            max_pct_mito: 50.0,
            ..QcConfig::default()
        },
        norm: NormConfig {
            // the synthetic counts are concentrated in a few genes, which
            // pushes their normalized means past the usual expression cap
            hvg: HvgConfig { max_mean: 10.0, ..HvgConfig::default() },
            ..NormConfig::default()
        },
        n_pcs: 5,
        n_neighbors: 6,
        seed: 0,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_single_sample_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_sample(dir.path(), 0, false);

    let adata = load_tenx_dir(dir.path(), "s1").unwrap();
    assert_eq!(adata.n_cells(), CELLS);
    assert_eq!(adata.n_genes(), GENES);

    let config = test_config();
    let analysis = analyze_sample(&adata, &config).unwrap();

    // filtering only shrinks
    assert!(analysis.adata.n_cells() <= CELLS);
    assert!(analysis.adata.n_genes() <= GENES);

    let cells = analysis.adata.n_cells();
    assert_eq!(analysis.pca.nrows(), cells);
    assert_eq!(analysis.pca.ncols(), config.n_pcs);
    assert_eq!(analysis.umap.dim(), (cells, 2));
    assert_eq!(analysis.clusters.len(), cells);
    assert!(analysis.adata.var.highly_variable.iter().any(|&h| h));

    // the two populations are far apart and should not share a cluster
    let even = analysis.clusters[0];
    let odd = analysis.clusters[1];
    assert_ne!(even, odd);

    // deterministic for a fixed seed
    let again = analyze_sample(&adata, &config).unwrap();
    assert_eq!(again.clusters, analysis.clusters);
    assert_eq!(again.umap, analysis.umap);

    let out = tempfile::tempdir().unwrap();
    export_analysis(out.path(), &analysis).unwrap();
    for name in ["obs.tsv.gz", "var.tsv.gz", "matrix.mtx.gz", "pca.tsv.gz"] {
        assert!(out.path().join(name).is_file(), "{name} missing");
    }
}

#[test]
fn test_two_sample_integration() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    write_sample(dir_a.path(), 0, false);
    write_sample(dir_b.path(), 1, true);

    let config = test_config();
    let a = analyze_sample(&load_tenx_dir(dir_a.path(), "s1").unwrap(), &config).unwrap();
    let b = analyze_sample(&load_tenx_dir(dir_b.path(), "s2").unwrap(), &config).unwrap();

    let integrated = integrate_samples(&a.adata, &b.adata, &config).unwrap();

    // cells add up, the private gene is gone
    assert_eq!(integrated.adata.n_cells(), a.adata.n_cells() + b.adata.n_cells());
    assert!(!integrated.adata.gene_symbols.iter().any(|s| s == "EXTRA"));

    // barcodes stay unique after suffixing
    let mut barcodes = integrated.adata.barcodes.clone();
    barcodes.sort();
    barcodes.dedup();
    assert_eq!(barcodes.len(), integrated.adata.n_cells());

    // the balanced graph draws neighbors from both batches for every cell
    let ids: Vec<&str> = integrated.adata.obs.batch.iter().map(String::as_str).collect();
    for (cell, row) in integrated.neighbors.indices.rows().into_iter().enumerate() {
        let hit_batches: std::collections::BTreeSet<&str> =
            row.iter().filter(|&&j| j != usize::MAX).map(|&j| ids[j]).collect();
        assert_eq!(hit_batches.len(), 2, "cell {cell} is not batch balanced");
    }

    let out = tempfile::tempdir().unwrap();
    export_integrated(out.path(), &integrated).unwrap();
    assert!(out.path().join("umap_naive.tsv.gz").is_file());

    let naive: std::collections::BTreeSet<usize> = integrated.naive_clusters.iter().copied().collect();
    assert!(!naive.is_empty());
    assert_eq!(integrated.clusters.len(), integrated.adata.n_cells());
}
