//! Graph community detection for nearest-neighbor networks.
//!
//! Implements the Leiden algorithm (local moving, subnetwork refinement,
//! aggregation) over a weighted undirected graph, as used for clustering
//! cells on a k-NN graph.
#![deny(missing_docs)]
#![deny(warnings)]

/// Label assignment for the nodes of a network
pub mod clustering;

/// Leiden clustering algorithm
pub mod leiden;

/// Weighted undirected graph
pub mod network;

/// Clustering objective functions
pub mod quality;

mod local_moving;
mod refine;

pub use clustering::Clustering;
pub use leiden::Leiden;
pub use network::Network;

pub(crate) trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        for v in self.iter_mut() {
            *v = T::default();
        }
        self.resize_with(len, T::default)
    }
}
