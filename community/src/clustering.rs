/// Assignment of one integer label per node. Labels are kept dense: after
/// `compact`, they cover `0..num_clusters` with no gaps.
#[derive(Clone, Debug, Default)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Each node in its own cluster.
    pub fn singletons(num_nodes: usize) -> Clustering {
        Clustering {
            labels: (0..num_nodes).collect(),
            num_clusters: num_nodes,
        }
    }

    /// All nodes in a single cluster.
    pub fn uniform(num_nodes: usize) -> Clustering {
        Clustering {
            labels: vec![0; num_nodes],
            num_clusters: usize::from(num_nodes > 0),
        }
    }

    /// Adopt an existing label vector, compacting away unused labels.
    pub fn from_labels(labels: &[usize]) -> Clustering {
        let num_clusters = labels.iter().max().map_or(0, |&m| m + 1);
        let mut c = Clustering {
            labels: labels.to_vec(),
            num_clusters,
        };
        c.compact();
        c
    }

    /// Label of node `i`.
    pub fn get(&self, i: usize) -> usize {
        self.labels[i]
    }

    /// Assign node `i` to `cluster`.
    pub fn set(&mut self, i: usize, cluster: usize) {
        self.labels[i] = cluster;
        if cluster >= self.num_clusters {
            self.num_clusters = cluster + 1;
        }
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct cluster labels.
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// The label vector.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// List the member nodes of every cluster.
    pub fn nodes_per_cluster(&self) -> Vec<Vec<usize>> {
        let mut lists = vec![Vec::new(); self.num_clusters];
        for (node, &label) in self.labels.iter().enumerate() {
            lists[label].push(node);
        }
        lists
    }

    /// Set all labels to 0.
    pub fn clear(&mut self) {
        for l in self.labels.iter_mut() {
            *l = 0;
        }
        self.num_clusters = usize::from(!self.labels.is_empty());
    }

    /// Relabel so that labels are contiguous starting at 0.
    pub fn compact(&mut self) {
        let mut counts = vec![0usize; self.num_clusters];
        for &l in &self.labels {
            counts[l] += 1;
        }

        let mut remap = vec![usize::MAX; self.num_clusters];
        let mut next = 0;
        for (old, &count) in counts.iter().enumerate() {
            if count > 0 {
                remap[old] = next;
                next += 1;
            }
        }

        for l in self.labels.iter_mut() {
            debug_assert!(remap[*l] != usize::MAX);
            *l = remap[*l];
        }
        self.num_clusters = next;
    }

    /// Apply a clustering of the cluster labels themselves, as produced on an
    /// aggregated network, back onto the nodes.
    pub fn merge(&mut self, cluster_clustering: &Clustering) {
        for i in 0..self.labels.len() {
            self.labels[i] = cluster_clustering.get(self.labels[i]);
        }
        self.num_clusters = cluster_clustering.num_clusters();
        self.compact();
    }
}
