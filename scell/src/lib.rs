//! # scell: single-cell RNA-seq QC, clustering and integration

#![deny(missing_docs)]
#![deny(warnings)]

/// Annotated expression matrix
pub mod adata;

/// Leiden clustering over the k-NN graph
pub mod cluster;

/// Pipeline configuration
pub mod config;

/// Dimensionality reduction methods
pub mod dim_red;

/// Error taxonomy
pub mod error;

/// Gzipped TSV/MTX export
pub mod export;

/// Two-sample batch-balanced integration
pub mod integrate;

/// Nearest-neighbor graphs
pub mod nn;

/// Count matrix normalization
pub mod normalize;

/// Per-sample analysis driver
pub mod pipeline;

/// Cell and gene quality-control filters
pub mod qc;

pub mod stats;

/// 10X triple-file matrix loading
pub mod tenx;

pub use error::{Error, Result};
