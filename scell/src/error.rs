//! Error taxonomy for the analysis pipeline. Input problems are fatal and
//! carry enough context to name the offending file; empty filter results and
//! solver failures are recoverable by the caller with different settings.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A matrix, feature or barcode file is malformed or inconsistent.
    #[error("input format error: {0}")]
    InputFormat(String),

    /// A filter or intersection produced zero cells or zero genes.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// An iterative solver failed to converge.
    #[error("solver failed to converge: {0}")]
    SolverConvergence(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
