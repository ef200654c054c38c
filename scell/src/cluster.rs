use crate::nn::NeighborGraph;
use community::{Leiden, Network};
use log::info;
use serde::{Deserialize, Serialize};

/// Leiden clustering settings over the k-NN graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Leiden resolution; higher values give more, smaller clusters.
    pub resolution: f64,
    /// Randomness of the refinement phase.
    pub randomness: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            resolution: community::leiden::DEFAULT_RESOLUTION,
            randomness: community::leiden::DEFAULT_RANDOMNESS,
        }
    }
}

/// Build an undirected, unit-weight network from a k-NN graph. Reciprocal
/// neighbor pairs collapse to a single edge.
pub fn knn_network(graph: &NeighborGraph, n_cells: usize) -> Network {
    Network::from_edges(
        n_cells,
        graph
            .edges()
            .into_iter()
            .map(|(i, j, _)| (i as u32, j as u32)),
    )
}

/// Leiden community detection on a k-NN graph, one label per cell.
/// Deterministic for a fixed seed.
pub fn leiden_clusters(graph: &NeighborGraph, n_cells: usize, config: &ClusterConfig, seed: u64) -> Vec<usize> {
    let network = knn_network(graph, n_cells);
    let mut leiden = Leiden::new(config.resolution, config.randomness, Some(seed));
    let clustering = leiden.run(&network);
    info!(
        "leiden found {} clusters over {} cells (resolution {})",
        clustering.num_clusters(),
        n_cells,
        config.resolution
    );
    clustering.labels().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    // two tight 1-d blobs: cells 0..5 around 0, cells 5..10 around 100
    fn blob_graph() -> (NeighborGraph, usize) {
        let coords: Vec<f64> = (0..5)
            .map(|i| i as f64 * 0.1)
            .chain((0..5).map(|i| 100.0 + i as f64 * 0.1))
            .collect();
        let data = Array2::from_shape_vec((10, 1), coords).unwrap();
        (crate::nn::nearest_neighbors(&data, 3), 10)
    }

    #[test]
    fn test_two_blobs_two_clusters() {
        let (graph, n) = blob_graph();
        let labels = leiden_clusters(&graph, n, &ClusterConfig::default(), 0);
        assert_eq!(labels.len(), 10);

        // one label per blob, and the two blobs differ
        for i in 1..5 {
            assert_eq!(labels[i], labels[0]);
            assert_eq!(labels[5 + i], labels[5]);
        }
        assert_ne!(labels[0], labels[5]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let (graph, n) = blob_graph();
        let a = leiden_clusters(&graph, n, &ClusterConfig::default(), 42);
        let b = leiden_clusters(&graph, n, &ClusterConfig::default(), 42);
        assert_eq!(a, b);
    }
}
