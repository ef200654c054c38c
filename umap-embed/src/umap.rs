use crate::curve::find_ab_params;
use crate::embed::{initialize_embedding, initialize_simplicial_set_embedding};
use crate::fuzzy::fuzzy_simplicial_set;
use crate::optimize::State;
use log::info;
use ndarray::Array2;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Layout parameters. The defaults match the common interactive-visualization
/// settings; `n_epochs = None` picks 500 epochs for small datasets and 200
/// for large ones.
#[derive(Debug, Clone)]
pub struct UmapConfig {
    /// Output dimensionality of the layout.
    pub n_components: usize,
    /// Minimum spacing between embedded points.
    pub min_dist: f64,
    /// Scale of the embedded neighborhoods.
    pub spread: f64,
    /// Optimization epochs; `None` chooses based on dataset size.
    pub n_epochs: Option<usize>,
    /// Initial SGD learning rate.
    pub learning_rate: f64,
    /// Weight of the repulsive force on negative samples.
    pub repulsion_strength: f64,
    /// Negative samples drawn per positive sample.
    pub negative_sample_rate: usize,
    /// Assumed number of fully-connected nearest neighbors.
    pub local_connectivity: f64,
    /// 1.0 for fuzzy union symmetrization, 0.0 for intersection.
    pub set_op_mix_ratio: f64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        UmapConfig {
            n_components: 2,
            min_dist: 0.5,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            repulsion_strength: 1.0,
            negative_sample_rate: 5,
            local_connectivity: 1.0,
            set_op_mix_ratio: 1.0,
        }
    }
}

/// UMAP over a precomputed k-nearest-neighbor graph.
pub struct Umap {
    config: UmapConfig,
}

impl Umap {
    /// Create an embedder with the given layout parameters.
    pub fn new(config: UmapConfig) -> Umap {
        Umap { config }
    }

    /// Embed `n` points given their kNN graph (`n x k` neighbor indices and
    /// distances, rows sorted by distance, `usize::MAX` padding for missing
    /// neighbors). Runs the full pipeline: fuzzy simplicial set, random
    /// initialization, then sequential SGD. Deterministic for a fixed seed.
    pub fn embed(&self, knn_indices: &Array2<usize>, knn_distances: &Array2<f64>, seed: u64) -> Array2<f64> {
        let n_points = knn_indices.nrows();
        let n_epochs = self.config.n_epochs.unwrap_or(if n_points <= 10_000 { 500 } else { 200 });

        let mut graph = fuzzy_simplicial_set(
            knn_indices,
            knn_distances,
            self.config.local_connectivity,
            self.config.set_op_mix_ratio,
        );

        let mut random = Pcg64Mcg::seed_from_u64(seed);
        let (head, tail, epochs_per_sample) =
            initialize_simplicial_set_embedding(&mut graph, n_epochs as f64, &mut random);
        let embedding = initialize_embedding(n_points, self.config.n_components, &mut random);

        let (a, b) = find_ab_params(self.config.spread, self.config.min_dist);
        info!("optimizing layout for {} points over {} epochs (a={:.4}, b={:.4})", n_points, n_epochs, a, b);

        let mut state = State::new(
            a,
            b,
            self.config.learning_rate,
            self.config.repulsion_strength,
            self.config.negative_sample_rate,
            n_epochs,
            embedding,
            head,
            tail,
            epochs_per_sample,
            random,
        );
        state.optimize();
        state.embedding
    }
}
