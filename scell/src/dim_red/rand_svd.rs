#![allow(non_snake_case)]

use super::{Pca, PcaResult};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOL: f64 = 1e-11;

/// Settings for randomized SVD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandSvd {
    /// Multiple of the requested k to use in randomized projections.
    pub l_multiplier: f64,
    /// Number of power iterations to perform.
    pub n_iter: usize,
    /// Seed for the projection matrix; set by the caller, not the config
    /// file.
    #[serde(skip)]
    pub seed: u64,
}

impl RandSvd {
    /// Create a new RandSvd with default settings.
    pub fn new() -> RandSvd {
        RandSvd {
            l_multiplier: 2.0,
            n_iter: 2,
            seed: 0,
        }
    }
}

impl Default for RandSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl Pca for RandSvd {
    fn run_pca(&self, array: &ArrayView2<'_, f64>, k: usize) -> Result<PcaResult> {
        let l = std::cmp::max(k + 4, ((k as f64) * self.l_multiplier) as usize);
        svd_rand(array, k, l, self.n_iter, self.seed)
    }
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `l`
/// projection dimensions and `n_iter` power iterations.
pub fn svd_rand(A: &ArrayView2<'_, f64>, k: usize, l: usize, n_iter: usize, seed: u64) -> Result<PcaResult> {
    let m = A.nrows();
    let n = A.ncols();

    if m < 2 || n < 2 {
        return Err(Error::Configuration("the input matrix must be at least 2x2".to_string()));
    }
    if k == 0 || k > std::cmp::min(m, n) {
        return Err(Error::Configuration(format!("invalid rank {k} for a {m} x {n} matrix")));
    }

    let l = std::cmp::min(l, std::cmp::min(m, n));
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    // Range finder: project with a random matrix, orthonormalize, refine by
    // power iterations for spectral decay.
    let omega = Array2::random_using((n, l), unif, &mut rng);
    let mut Q = orthonormalize(A.dot(&omega));
    for _ in 0..n_iter {
        Q = orthonormalize(A.t().dot(&Q));
        Q = orthonormalize(A.dot(&Q));
    }

    // B = Qt A is small (l x n); its left singular system is the
    // eigensystem of B Bt.
    let B = Q.t().dot(A);
    let BBt = B.dot(&B.t());
    let (eigvals, eigvecs) = jacobi_eigh(BBt)?;

    if eigvals.len() < k {
        return Err(Error::SolverConvergence(format!(
            "matrix rank {} is below the requested {k} components",
            eigvals.len()
        )));
    }

    // eigenpairs in descending order
    let mut order: Vec<usize> = (0..eigvals.len()).collect();
    order.sort_by(|&a, &b| eigvals[b].partial_cmp(&eigvals[a]).unwrap());
    let order = &order[..k];

    let sigma = Array1::from_iter(order.iter().map(|&i| eigvals[i].max(0.0).sqrt()));
    let Ub = eigvecs.select(Axis(1), order);

    let U = Q.dot(&Ub);
    let mut V = B.t().dot(&Ub);
    for (mut col, &sv) in V.columns_mut().into_iter().zip(sigma.iter()) {
        if sv > 0.0 {
            col.mapv_inplace(|v| v / sv);
        }
    }

    Ok((U, sigma, V))
}

/// Modified Gram-Schmidt orthonormalization of the columns of `y`.
/// Numerically degenerate columns are dropped, so the result may be
/// narrower than the input.
fn orthonormalize(y: Array2<f64>) -> Array2<f64> {
    let m = y.nrows();
    let cols = y.ncols();
    let mut kept: Vec<Array1<f64>> = Vec::with_capacity(cols);

    for j in 0..cols {
        let mut v = y.column(j).to_owned();
        // two passes of MGS for stability
        for _ in 0..2 {
            for q in &kept {
                let proj = q.dot(&v);
                v.scaled_add(-proj, q);
            }
        }
        let norm = v.dot(&v).sqrt();
        if norm > 1e-10 {
            kept.push(v / norm);
        }
    }

    let mut out = Array2::zeros((m, kept.len()));
    for (j, q) in kept.iter().enumerate() {
        out.column_mut(j).assign(q);
    }
    out
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix. Returns the
/// eigenvalues and the matrix of eigenvectors (in columns), unsorted.
fn jacobi_eigh(mut a: Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    let mut v = Array2::eye(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = {
            let mut acc = 0.0;
            for p in 0..n {
                for q in p + 1..n {
                    acc += a[[p, q]] * a[[p, q]];
                }
            }
            acc
        };
        if off.sqrt() <= JACOBI_TOL * (1.0 + frobenius_sq(&a).sqrt()) {
            return Ok((Array1::from_iter((0..n).map(|i| a[[i, i]])), v));
        }

        for p in 0..n {
            for q in p + 1..n {
                if a[[p, q]].abs() <= f64::EPSILON * (a[[p, p]].abs() + a[[q, q]].abs()) {
                    continue;
                }
                // Jacobi rotation zeroing a[p][q]
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let sn = t * c;

                for i in 0..n {
                    let aip = a[[i, p]];
                    let aiq = a[[i, q]];
                    a[[i, p]] = c * aip - sn * aiq;
                    a[[i, q]] = sn * aip + c * aiq;
                }
                for i in 0..n {
                    let api = a[[p, i]];
                    let aqi = a[[q, i]];
                    a[[p, i]] = c * api - sn * aqi;
                    a[[q, i]] = sn * api + c * aqi;
                }
                for i in 0..n {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = c * vip - sn * viq;
                    v[[i, q]] = sn * vip + c * viq;
                }
            }
        }
    }

    Err(Error::SolverConvergence(format!(
        "jacobi eigensolver did not converge in {JACOBI_MAX_SWEEPS} sweeps"
    )))
}

fn frobenius_sq(a: &Array2<f64>) -> f64 {
    a.iter().map(|&v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_jacobi_diagonal() {
        let a = array![[3.0, 0.0], [0.0, 1.0]];
        let (vals, _) = jacobi_eigh(a).unwrap();
        let mut vals: Vec<f64> = vals.to_vec();
        vals.sort_by(|x, y| y.partial_cmp(x).unwrap());
        assert_abs_diff_eq!(vals[0], 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(vals[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_jacobi_known_eigensystem() {
        // eigenvalues of [[2,1],[1,2]] are 3 and 1
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (vals, vecs) = jacobi_eigh(a.clone()).unwrap();
        for i in 0..2 {
            let lambda = vals[i];
            let x = vecs.column(i);
            let ax = a.dot(&x);
            for j in 0..2 {
                assert_abs_diff_eq!(ax[j], lambda * x[j], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_orthonormalize() {
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let y = Array2::random_using((20, 5), Uniform::new(-1.0, 1.0), &mut rng);
        let q = orthonormalize(y);
        assert_eq!(q.ncols(), 5);
        let qtq = q.t().dot(&q);
        for i in 0..5 {
            for j in 0..5 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(qtq[[i, j]], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_orthonormalize_drops_dependent_columns() {
        let mut y = Array2::zeros((4, 3));
        y.column_mut(0).assign(&array![1.0, 0.0, 0.0, 0.0]);
        y.column_mut(1).assign(&array![2.0, 0.0, 0.0, 0.0]);
        y.column_mut(2).assign(&array![0.0, 1.0, 0.0, 0.0]);
        let q = orthonormalize(y);
        assert_eq!(q.ncols(), 2);
    }

    #[test]
    fn test_svd_recovers_low_rank_matrix() {
        // rank-2 matrix: A = u1 s1 v1' + u2 s2 v2'
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let u = orthonormalize(Array2::random_using((30, 2), Uniform::new(-1.0, 1.0), &mut rng));
        let v = orthonormalize(Array2::random_using((12, 2), Uniform::new(-1.0, 1.0), &mut rng));
        let mut sv = Array2::zeros((2, 2));
        sv[[0, 0]] = 9.0;
        sv[[1, 1]] = 4.0;
        let a = u.dot(&sv).dot(&v.t());

        let (U, s, V) = svd_rand(&a.view(), 2, 8, 2, 0).unwrap();
        assert_abs_diff_eq!(s[0], 9.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s[1], 4.0, epsilon = 1e-6);

        // reconstruction
        let mut svd = Array2::zeros((2, 2));
        svd[[0, 0]] = s[0];
        svd[[1, 1]] = s[1];
        let approx_a = U.dot(&svd).dot(&V.t());
        for (x, y) in a.iter().zip(approx_a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_svd_deterministic_for_seed() {
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let a = Array2::random_using((25, 10), Uniform::new(0.0, 1.0), &mut rng);
        let (u1, s1, _) = svd_rand(&a.view(), 3, 10, 2, 7).unwrap();
        let (u2, s2, _) = svd_rand(&a.view(), 3, 10, 2, 7).unwrap();
        assert_eq!(u1, u2);
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_invalid_rank() {
        let a = Array2::<f64>::zeros((4, 4));
        assert!(svd_rand(&a.view(), 5, 8, 1, 0).is_err());
        assert!(svd_rand(&a.view(), 0, 8, 1, 0).is_err());
    }
}
