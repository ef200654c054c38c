use crate::Clustering;
use fxhash::{FxHashMap, FxHashSet};

/// Weighted undirected graph stored as per-node adjacency lists. Every edge
/// `(i, j)` appears in both `adj[i]` and `adj[j]`.
#[derive(Clone, Debug, Default)]
pub struct Network {
    node_weights: Vec<f64>,
    adj: Vec<Vec<(u32, f32)>>,
}

impl Network {
    /// Create a network with `n_nodes` nodes and no edges.
    pub fn with_nodes(n_nodes: usize) -> Network {
        Network {
            node_weights: vec![0.0; n_nodes],
            adj: vec![Vec::new(); n_nodes],
        }
    }

    /// Build a network from a stream of adjacency pairs, e.g. the rows of a
    /// k-NN index matrix. Duplicate and reversed pairs collapse to a single
    /// undirected edge of weight 1; node weights are set to the node degree.
    pub fn from_edges<I: Iterator<Item = (u32, u32)>>(n_nodes: usize, adjacency: I) -> Network {
        let mut net = Network::with_nodes(n_nodes);
        let mut seen = vec![FxHashSet::<u32>::default(); n_nodes];

        for (i, j) in adjacency {
            if i == j {
                continue;
            }
            let (i, j) = if i < j { (i, j) } else { (j, i) };
            if seen[i as usize].insert(j) {
                net.add_edge(i as usize, j as usize, 1.0);
            }
        }

        // node weight is the degree, matching the modularity objective
        for i in 0..n_nodes {
            net.node_weights[i] = net.adj[i].iter().map(|&(_, w)| w as f64).sum();
        }
        net
    }

    /// Add an undirected edge. The caller is responsible for not adding the
    /// same edge twice.
    pub fn add_edge(&mut self, i: usize, j: usize, weight: f32) {
        self.adj[i].push((j as u32, weight));
        self.adj[j].push((i as u32, weight));
    }

    /// Set the weight of `node`.
    pub fn set_weight(&mut self, node: usize, weight: f64) {
        self.node_weights[node] = weight;
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Weight of `node`.
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Iterator over `(neighbor, edge_weight)` pairs of `node`.
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adj[node].iter().map(|&(j, w)| (j as usize, w as f64))
    }

    /// Sum of all node weights.
    pub fn total_node_weight(&self) -> f64 {
        self.node_weights.iter().sum()
    }

    /// Sum of all edge weights, each edge counted once.
    pub fn total_edge_weight(&self) -> f64 {
        let twice: f64 = self
            .adj
            .iter()
            .map(|edges| edges.iter().map(|&(_, w)| w as f64).sum::<f64>())
            .sum();
        twice / 2.0
    }

    /// Tabulate the total edge weight of each node into `result`.
    pub fn edge_weight_per_node(&self, result: &mut Vec<f64>) {
        result.clear();
        for edges in &self.adj {
            result.push(edges.iter().map(|&(_, w)| w as f64).sum());
        }
    }

    /// Aggregate the network by a clustering: one node per cluster, node
    /// weights summed, inter-cluster edge weights summed, intra-cluster
    /// edges dropped.
    pub fn reduce(&self, clustering: &Clustering) -> Network {
        let mut reduced = Network::with_nodes(clustering.num_clusters());

        for i in 0..self.nodes() {
            reduced.node_weights[clustering.get(i)] += self.weight(i);
        }

        let mut memo = FxHashMap::<(u32, u32), f32>::default();
        for i in 0..self.nodes() {
            let ci = clustering.get(i) as u32;
            for &(j, w) in &self.adj[i] {
                // visit each undirected edge once
                if (j as usize) < i {
                    continue;
                }
                let cj = clustering.get(j as usize) as u32;
                if ci == cj {
                    continue;
                }
                let key = if ci < cj { (ci, cj) } else { (cj, ci) };
                *memo.entry(key).or_insert(0.0) += w;
            }
        }
        for ((c1, c2), w) in memo {
            reduced.add_edge(c1 as usize, c2 as usize, w);
        }
        reduced
    }

    /// Split the network into one subnetwork per cluster, keeping only
    /// intra-cluster edges. Nodes are renumbered within each subnetwork in
    /// increasing order of their original ids.
    pub fn subnetworks(&self, clustering: &Clustering) -> Vec<Network> {
        let mut subs: Vec<Network> = (0..clustering.num_clusters()).map(|_| Network::default()).collect();
        let mut new_id = Vec::with_capacity(self.nodes());

        for i in 0..self.nodes() {
            let c = clustering.get(i);
            new_id.push(subs[c].nodes() as u32);
            subs[c].node_weights.push(self.weight(i));
            subs[c].adj.push(Vec::new());
        }

        for i in 0..self.nodes() {
            let ci = clustering.get(i);
            for &(j, w) in &self.adj[i] {
                if (j as usize) < i || clustering.get(j as usize) != ci {
                    continue;
                }
                let (a, b) = (new_id[i] as usize, new_id[j as usize] as usize);
                subs[ci].add_edge(a, b, w);
            }
        }
        subs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn triangle_plus_one() -> Network {
        // nodes 0-1-2 form a triangle, node 3 hangs off node 2
        let edges = vec![(0u32, 1u32), (1, 2), (2, 0), (2, 3)];
        Network::from_edges(4, edges.into_iter())
    }

    #[test]
    fn test_from_edges_degree_weights() {
        let n = triangle_plus_one();
        assert_eq!(n.nodes(), 4);
        assert_eq!(n.total_edge_weight(), 4.0);
        assert_eq!(n.weight(2), 3.0);
        assert_eq!(n.weight(3), 1.0);
        assert_eq!(n.total_node_weight(), 8.0);
    }

    #[test]
    fn test_from_edges_dedups_reversed_pairs() {
        let edges = vec![(0u32, 1u32), (1, 0), (0, 1), (0, 0)];
        let n = Network::from_edges(2, edges.into_iter());
        assert_eq!(n.total_edge_weight(), 1.0);
        assert_eq!(n.weight(0), 1.0);
    }

    #[test]
    fn test_reduce() {
        let n = triangle_plus_one();
        let c = Clustering::from_labels(&[0, 0, 0, 1]);
        let r = n.reduce(&c);
        assert_eq!(r.nodes(), 2);
        assert_eq!(r.weight(0), 7.0);
        assert_eq!(r.weight(1), 1.0);
        // only the 2-3 edge crosses the clusters
        assert_eq!(r.total_edge_weight(), 1.0);
    }

    #[test]
    fn test_subnetworks() {
        let n = triangle_plus_one();
        let c = Clustering::from_labels(&[0, 0, 0, 1]);
        let subs = n.subnetworks(&c);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].nodes(), 3);
        assert_eq!(subs[0].total_edge_weight(), 3.0);
        assert_eq!(subs[1].nodes(), 1);
        assert_eq!(subs[1].total_edge_weight(), 0.0);
    }
}
