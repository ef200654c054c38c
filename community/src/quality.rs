use crate::{Clustering, Network};

/// The 'Constant Potts Model' quality of a clustering; with degree node
/// weights this is the (resolution-scaled) modularity.
pub fn cpm(resolution: f64, n: &Network, clustering: &Clustering) -> f64 {
    let mut quality = 0.0f64;
    let total_edge_weight = n.total_edge_weight();
    if total_edge_weight == 0.0 {
        return 0.0;
    }

    for i in 0..n.nodes() {
        let ci = clustering.get(i);
        for (j, w) in n.neighbors(i) {
            if j < i && ci == clustering.get(j) {
                quality += 2.0 * w;
            }
        }
    }

    let mut cluster_weights = vec![0.0; clustering.num_clusters()];
    for i in 0..n.nodes() {
        cluster_weights[clustering.get(i)] += n.weight(i);
    }
    for cluster_weight in cluster_weights {
        quality -= cluster_weight * cluster_weight * resolution / (2.0 * total_edge_weight);
    }

    quality / (2.0 * total_edge_weight)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cpm_perfect_split() {
        // two disconnected edges
        let n = Network::from_edges(4, vec![(0u32, 1u32), (2, 3)].into_iter());
        let split = Clustering::from_labels(&[0, 0, 1, 1]);
        let uniform = Clustering::uniform(4);
        assert!(cpm(1.0, &n, &split) > cpm(1.0, &n, &uniform));
        // modularity of the perfect split of two equal components is 1/2
        assert!((cpm(1.0, &n, &split) - 0.5).abs() < 1e-12);
    }
}
