use crate::adata::AnnMatrix;
use crate::cluster::leiden_clusters;
use crate::config::PipelineConfig;
use crate::dim_red::rand_svd::RandSvd;
use crate::dim_red::{principal_coords, Pca};
use crate::error::Result;
use crate::integrate::{bbknn, concat};
use crate::nn::{nearest_neighbors, NeighborGraph};
use crate::normalize;
use crate::qc;
use log::{info, warn};
use ndarray::Array2;
use umap_embed::{Umap, UmapConfig};

/// Output of the per-sample pipeline.
#[derive(Debug, Clone)]
pub struct SampleAnalysis {
    /// QC-filtered matrix with metrics and HVG flags filled.
    pub adata: AnnMatrix,
    /// Principal coordinates, cells x n_pcs.
    pub pca: Array2<f64>,
    /// k-NN graph in PC space.
    pub neighbors: NeighborGraph,
    /// 2-D UMAP embedding of the graph.
    pub umap: Array2<f64>,
    /// Leiden cluster label per cell.
    pub clusters: Vec<usize>,
}

/// Output of the two-sample integration pass.
#[derive(Debug, Clone)]
pub struct IntegratedAnalysis {
    /// Merged matrix over the shared genes.
    pub adata: AnnMatrix,
    /// Principal coordinates of the merged matrix.
    pub pca: Array2<f64>,
    /// Clusters of the naive (uncorrected) graph; these show batch effects.
    pub naive_clusters: Vec<usize>,
    /// UMAP of the naive graph.
    pub naive_umap: Array2<f64>,
    /// Batch-balanced graph.
    pub neighbors: NeighborGraph,
    /// UMAP of the batch-balanced graph.
    pub umap: Array2<f64>,
    /// Clusters of the batch-balanced graph.
    pub clusters: Vec<usize>,
}

fn embed_and_cluster(
    pca: &Array2<f64>,
    neighbors: &NeighborGraph,
    config: &PipelineConfig,
) -> (Array2<f64>, Vec<usize>) {
    let umap = Umap::new(UmapConfig::default()).embed(&neighbors.indices, &neighbors.distances, config.seed);
    let clusters = leiden_clusters(neighbors, pca.nrows(), &config.cluster, config.seed);
    (umap, clusters)
}

/// Normalize, reduce and build the k-NN graph. Shared by the per-sample and
/// merged pipelines; returns the HVG-flagged matrix and the PC coordinates.
fn reduce(adata: AnnMatrix, config: &PipelineConfig) -> Result<(AnnMatrix, Array2<f64>)> {
    let normalized = normalize::run(&adata, &config.norm)?;

    let mut adata = adata;
    adata.var.highly_variable = vec![false; adata.n_genes()];
    for &g in &normalized.hvg {
        adata.var.highly_variable[g] = true;
    }

    let (cells, hvgs) = (normalized.data.nrows(), normalized.data.ncols());
    let k = config.n_pcs.min(cells.min(hvgs));
    if k < config.n_pcs {
        warn!("clamping n_pcs from {} to {} for {} x {} data", config.n_pcs, k, cells, hvgs);
    }

    let solver = RandSvd {
        seed: config.seed,
        ..config.pca.clone()
    };
    let (u, s, _) = solver.run_pca(&normalized.data.view(), k)?;
    Ok((adata, principal_coords(&u, &s)))
}

/// Run the full per-sample pipeline: QC, normalization, PCA, k-NN graph,
/// UMAP and Leiden clustering. All stochastic stages derive from
/// `config.seed`.
pub fn analyze_sample(adata: &AnnMatrix, config: &PipelineConfig) -> Result<SampleAnalysis> {
    config.validate()?;

    let filtered = qc::run(adata, &config.qc)?;
    let (filtered, pca) = reduce(filtered, config)?;

    let neighbors = nearest_neighbors(&pca, config.n_neighbors);
    let (umap, clusters) = embed_and_cluster(&pca, &neighbors, config);

    Ok(SampleAnalysis {
        adata: filtered,
        pca,
        neighbors,
        umap,
        clusters,
    })
}

/// Integrate two QC-filtered samples: merge over shared genes, run the
/// naive merged pipeline (which shows the batch separation), then replace
/// the graph with a batch-balanced one and re-embed and re-cluster.
pub fn integrate_samples(a: &AnnMatrix, b: &AnnMatrix, config: &PipelineConfig) -> Result<IntegratedAnalysis> {
    config.validate()?;

    let merged = concat(a, b)?;
    let (merged, pca) = reduce(merged, config)?;

    info!("naive pass over the merged matrix");
    let naive_neighbors = nearest_neighbors(&pca, config.n_neighbors);
    let (naive_umap, naive_clusters) = embed_and_cluster(&pca, &naive_neighbors, config);

    info!("batch-balanced pass");
    let neighbors = bbknn(&pca, &merged.obs.batch, &config.integrate)?;
    let (umap, clusters) = embed_and_cluster(&pca, &neighbors, config);

    Ok(IntegratedAnalysis {
        adata: merged,
        pca,
        naive_clusters,
        naive_umap,
        neighbors,
        umap,
        clusters,
    })
}
