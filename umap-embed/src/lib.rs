//! UMAP 2-D embedding seeded from a precomputed k-NN graph.
//!
//! The caller supplies nearest-neighbor indices and distances (so batch
//! balanced graphs plug in unchanged); this crate calibrates the fuzzy
//! simplicial set, schedules edge sampling epochs, and optimizes the layout
//! with sequential stochastic gradient descent.
#![deny(missing_docs)]
#![deny(warnings)]

/// Kernel parameter fitting for min_dist/spread
pub mod curve;

/// Epoch scheduling and embedding initialization
pub mod embed;

/// Fuzzy simplicial set construction
pub mod fuzzy;

/// SGD layout optimization
pub mod optimize;

mod umap;

pub use umap::{Umap, UmapConfig};
