use crate::{Clustering, Network, ZeroVec};
use rand::seq::SliceRandom;
use rand::Rng;

/// Randomized merging of singleton nodes within one cluster's subnetwork.
/// Only well-connected singletons move, and the target cluster is drawn with
/// probability proportional to `exp(gain / randomness)` over the
/// non-negative-gain candidates, so clusters are refined without being split.
pub(crate) struct LocalMerging {
    resolution: f64,
    randomness: f64,
    cluster_weights: Vec<f64>,
    non_singleton: Vec<bool>,
    external_edge_weight: Vec<f64>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
    cum_transformed_qv: Vec<f64>,
    node_order: Vec<usize>,
}

impl LocalMerging {
    pub fn new(resolution: f64, randomness: f64) -> Self {
        LocalMerging {
            resolution,
            randomness,
            cluster_weights: Vec::new(),
            non_singleton: Vec::new(),
            external_edge_weight: Vec::new(),
            edge_weight_per_cluster: Vec::new(),
            neighboring_clusters: Vec::new(),
            cum_transformed_qv: Vec::new(),
            node_order: Vec::new(),
        }
    }

    pub fn run(&mut self, n: &Network, rng: &mut impl Rng) -> Clustering {
        let mut c = Clustering::singletons(n.nodes());
        if n.nodes() <= 1 {
            return c;
        }

        let total_node_weight = n.total_node_weight();
        self.cluster_weights.clear();
        for i in 0..n.nodes() {
            self.cluster_weights.push(n.weight(i));
        }
        n.edge_weight_per_node(&mut self.external_edge_weight);

        self.node_order.clear();
        self.node_order.extend(0..n.nodes());
        self.node_order.shuffle(rng);

        self.non_singleton.zero_len(n.nodes());
        self.edge_weight_per_cluster.zero_len(n.nodes());
        self.neighboring_clusters.zero_len(n.nodes());

        let mut update = false;

        for i in 0..n.nodes() {
            let j = self.node_order[i];

            // Only well-connected singletons may move; this guarantees
            // clusters are never split by the refinement.
            let thresh = self.cluster_weights[j] * (total_node_weight - self.cluster_weights[j]) * self.resolution;
            if self.non_singleton[j] || self.external_edge_weight[j] < thresh {
                continue;
            }

            self.cluster_weights[j] = 0.0;
            self.external_edge_weight[j] = 0.0;

            // Gather candidate clusters adjacent to the node; the (now
            // empty) old cluster stays reachable so the node can stay put.
            self.neighboring_clusters[0] = j;
            let mut num_neighboring = 1;
            for (neighbor, edge_weight) in n.neighbors(j) {
                let neighbor_cluster = c.get(neighbor);
                if self.edge_weight_per_cluster[neighbor_cluster] == 0.0 {
                    self.neighboring_clusters[num_neighboring] = neighbor_cluster;
                    num_neighboring += 1;
                }
                self.edge_weight_per_cluster[neighbor_cluster] += edge_weight;
            }

            let mut best_cluster = j;
            let mut max_qv_increment = 0.0;
            let mut total_transformed = 0.0;
            self.cum_transformed_qv.clear();
            for k in 0..num_neighboring {
                let l = self.neighboring_clusters[k];
                let well_connected = self.external_edge_weight[l]
                    >= self.cluster_weights[l] * (total_node_weight - self.cluster_weights[l]) * self.resolution;

                let qv_increment = if well_connected {
                    self.edge_weight_per_cluster[l] - n.weight(j) * self.cluster_weights[l] * self.resolution
                } else {
                    f64::NEG_INFINITY
                };

                if qv_increment > max_qv_increment {
                    best_cluster = l;
                    max_qv_increment = qv_increment;
                }
                if qv_increment >= 0.0 {
                    total_transformed += (qv_increment / self.randomness).exp();
                }
                self.cum_transformed_qv.push(total_transformed);
            }

            // Draw the target cluster; fall back to the best candidate when
            // the transformed total overflows.
            let chosen_cluster = if total_transformed.is_finite() && total_transformed > 0.0 {
                let r = rng.gen_range(0.0..total_transformed);
                let mut idx = 0;
                while self.cum_transformed_qv[idx] <= r {
                    idx += 1;
                }
                self.neighboring_clusters[idx]
            } else {
                best_cluster
            };

            for k in 0..num_neighboring {
                self.edge_weight_per_cluster[self.neighboring_clusters[k]] = 0.0;
            }

            self.cluster_weights[chosen_cluster] += n.weight(j);
            for (neighbor, edge_weight) in n.neighbors(j) {
                if c.get(neighbor) == chosen_cluster {
                    self.external_edge_weight[chosen_cluster] -= edge_weight;
                } else {
                    self.external_edge_weight[chosen_cluster] += edge_weight;
                }
            }

            if chosen_cluster != j {
                c.set(j, chosen_cluster);
                self.non_singleton[chosen_cluster] = true;
                update = true;
            }
        }

        if update {
            c.compact();
        }
        c
    }
}
