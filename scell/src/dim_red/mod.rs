#![allow(non_snake_case)]

//! Dimensionality reduction. PCA runs behind the [`Pca`] trait so the
//! pipeline never depends on a particular factorization; the provided
//! implementation is a seeded randomized SVD.

use crate::error::Result;
use ndarray::{Array1, Array2, ArrayView2};

/// Randomized SVD method
pub mod rand_svd;

/// `(u, s, v)`: left singular vectors (`m x k`), singular values (`k`),
/// right singular vectors (`n x k`).
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Perform an SVD of a matrix, retaining `k` principal components.
/// This trait always performs the pure SVD of the matrix; PCA proper is
/// achieved by centering/scaling the input beforehand.
pub trait Pca {
    /// Compute a rank `k` decomposition.
    fn run_pca(&self, matrix: &ArrayView2<'_, f64>, k: usize) -> Result<PcaResult>;
}

/// Project a matrix onto its principal components: `u * diag(s)`.
pub fn principal_coords(u: &Array2<f64>, s: &Array1<f64>) -> Array2<f64> {
    let mut coords = u.clone();
    for (mut col, &sv) in coords.columns_mut().into_iter().zip(s.iter()) {
        col.mapv_inplace(|v| v * sv);
    }
    coords
}
