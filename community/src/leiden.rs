use crate::local_moving::LocalMoving;
use crate::refine::LocalMerging;
use crate::{Clustering, Network, ZeroVec};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Default resolution parameter.
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Default randomness of the refinement phase.
pub const DEFAULT_RANDOMNESS: f64 = 0.01;

/// The Leiden community-detection algorithm: greedy local moving, a
/// randomized refinement of the resulting clusters, then recursion on the
/// aggregated network.
pub struct Leiden {
    resolution: f64,
    randomness: f64,
    rng: ChaCha20Rng,
    local_moving: LocalMoving,
    nodes_per_refined_cluster: Vec<usize>,
}

impl Leiden {
    /// Initialize with the given resolution and randomness. An optional
    /// random seed can be supplied, otherwise a seed of 0 is used.
    pub fn new(resolution: f64, randomness: f64, seed: Option<u64>) -> Leiden {
        Leiden {
            resolution,
            randomness,
            rng: ChaCha20Rng::seed_from_u64(seed.unwrap_or_default()),
            local_moving: LocalMoving::new(resolution),
            nodes_per_refined_cluster: Vec::new(),
        }
    }

    /// Run the algorithm to convergence, starting from singleton clusters.
    /// Returns the final clustering.
    pub fn run(&mut self, n: &Network) -> Clustering {
        let mut c = Clustering::singletons(n.nodes());
        let mut iterations = 0;
        while self.iterate(n, &mut c) {
            iterations += 1;
            if iterations >= 10 {
                break;
            }
        }
        c
    }

    /// One full Leiden step. Returns true if any label changed.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering) -> bool {
        let mut update = self.local_moving.iterate(n, c, &mut self.rng);

        if c.num_clusters() == n.nodes() {
            return update;
        }

        // Refinement works on the CPM scale of the current network.
        let total_edge_weight = n.total_edge_weight();
        if total_edge_weight == 0.0 {
            return update;
        }
        let mut local_merging = LocalMerging::new(self.resolution / (2.0 * total_edge_weight), self.randomness);

        let subnetworks = n.subnetworks(c);
        let nodes_per_cluster = c.nodes_per_cluster();

        // Replace the clustering with its refinement: each cluster is split
        // into the sub-clusters found by local merging.
        c.clear();
        self.nodes_per_refined_cluster.zero_len(subnetworks.len());
        let mut cluster_counter = 0;
        for (i, sub) in subnetworks.iter().enumerate() {
            let sub_clustering = local_merging.run(sub, &mut self.rng);
            for (j, &node) in nodes_per_cluster[i].iter().enumerate() {
                c.set(node, cluster_counter + sub_clustering.get(j));
            }
            cluster_counter += sub_clustering.num_clusters();
            self.nodes_per_refined_cluster[i] = sub_clustering.num_clusters();
        }
        c.compact();

        let reduced = n.reduce(c);

        // Seed the aggregate clustering from the unrefined clusters, so the
        // recursion starts from the local-moving solution.
        let mut aggregate_labels = vec![0; c.num_clusters()];
        let mut offset = 0;
        for (i, &count) in self.nodes_per_refined_cluster.iter().enumerate() {
            for label in aggregate_labels.iter_mut().skip(offset).take(count) {
                *label = i;
            }
            offset += count;
        }
        let mut aggregate_clustering = Clustering::from_labels(&aggregate_labels);

        update |= self.iterate(&reduced, &mut aggregate_clustering);

        c.merge(&aggregate_clustering);
        update
    }
}
