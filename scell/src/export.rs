use crate::error::Result;
use crate::pipeline::{IntegratedAnalysis, SampleAnalysis};
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use log::info;
use ndarray::Array2;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

fn gz_writer(path: &Path) -> Result<BufWriter<GzEncoder<File>>> {
    Ok(BufWriter::new(GzEncoder::new(File::create(path)?, Compression::default())))
}

fn write_obs(
    dir: &Path,
    analysis_adata: &crate::adata::AnnMatrix,
    umap: &Array2<f64>,
    clusters: &[usize],
    naive_clusters: Option<&[usize]>,
) -> Result<()> {
    let mut w = gz_writer(&dir.join("obs.tsv.gz"))?;
    write!(
        w,
        "barcode\tbatch\ttotal_counts\tn_genes\tpct_mito\tpct_ribo\tcluster\tumap_1\tumap_2"
    )?;
    if naive_clusters.is_some() {
        write!(w, "\tnaive_cluster")?;
    }
    writeln!(w)?;

    let obs = &analysis_adata.obs;
    for (i, barcode) in analysis_adata.barcodes.iter().enumerate() {
        write!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            barcode,
            obs.batch[i],
            obs.total_counts[i],
            obs.n_genes[i],
            obs.pct_mito[i],
            obs.pct_ribo[i],
            clusters[i],
            umap[[i, 0]],
            umap[[i, 1]],
        )?;
        if let Some(naive) = naive_clusters {
            write!(w, "\t{}", naive[i])?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn write_var(dir: &Path, adata: &crate::adata::AnnMatrix) -> Result<()> {
    let mut w = gz_writer(&dir.join("var.tsv.gz"))?;
    writeln!(w, "gene_id\tsymbol\tn_cells\thighly_variable")?;
    for g in 0..adata.n_genes() {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            adata.gene_ids[g],
            adata.gene_symbols[g],
            adata.var.n_cells[g],
            adata.var.highly_variable[g],
        )?;
    }
    Ok(())
}

/// Filtered counts in MatrixMarket format, genes x cells as the upstream
/// triple-file layout stores them.
fn write_mtx(dir: &Path, adata: &crate::adata::AnnMatrix) -> Result<()> {
    let mut w = gz_writer(&dir.join("matrix.mtx.gz"))?;
    writeln!(w, "%%MatrixMarket matrix coordinate integer general")?;
    writeln!(w, "%")?;
    writeln!(w, "{} {} {}", adata.n_genes(), adata.n_cells(), adata.counts.nnz())?;
    for (cell, row) in adata.counts.outer_iterator().enumerate() {
        for (gene, &v) in row.iter() {
            writeln!(w, "{} {} {}", gene + 1, cell + 1, v)?;
        }
    }
    Ok(())
}

fn write_tsv_matrix(path: &Path, array: &Array2<f64>) -> Result<()> {
    let mut w = gz_writer(path)?;
    for row in array.rows() {
        writeln!(w, "{}", row.iter().join("\t"))?;
    }
    Ok(())
}

/// Write a per-sample analysis as a directory of gzipped artifacts:
/// `obs.tsv.gz`, `var.tsv.gz`, `matrix.mtx.gz` and `pca.tsv.gz`.
pub fn export_analysis(dir: impl AsRef<Path>, analysis: &SampleAnalysis) -> Result<()> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    write_obs(dir, &analysis.adata, &analysis.umap, &analysis.clusters, None)?;
    write_var(dir, &analysis.adata)?;
    write_mtx(dir, &analysis.adata)?;
    write_tsv_matrix(&dir.join("pca.tsv.gz"), &analysis.pca)?;
    info!("wrote analysis to {}", dir.display());
    Ok(())
}

/// Write an integrated analysis; `obs.tsv.gz` carries both the corrected
/// and the naive cluster labels, and the naive UMAP is written alongside.
pub fn export_integrated(dir: impl AsRef<Path>, analysis: &IntegratedAnalysis) -> Result<()> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    write_obs(
        dir,
        &analysis.adata,
        &analysis.umap,
        &analysis.clusters,
        Some(&analysis.naive_clusters),
    )?;
    write_var(dir, &analysis.adata)?;
    write_mtx(dir, &analysis.adata)?;
    write_tsv_matrix(&dir.join("pca.tsv.gz"), &analysis.pca)?;
    write_tsv_matrix(&dir.join("umap_naive.tsv.gz"), &analysis.naive_umap)?;
    info!("wrote integrated analysis to {}", dir.display());
    Ok(())
}
