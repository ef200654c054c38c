use ndarray::{Array2, ArrayView1};
use sprs::{CsMat, TriMat};

const BANDWIDTH: f64 = 1.0;
const N_ITER: usize = 64;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;

/// Build the fuzzy simplicial set of a dataset from its k-NN graph: the
/// per-point distance scales are calibrated so each point's neighborhood has
/// a fixed effective size, membership strengths are exponential in the
/// rescaled distances, and the directed graph is symmetrized by fuzzy union.
///
/// Rows of `knn_indices`/`knn_distances` must be sorted by distance; padded
/// entries (`usize::MAX` index) are skipped.
pub fn fuzzy_simplicial_set(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<f64>,
    local_connectivity: f64,
    set_op_mix_ratio: f64,
) -> CsMat<f64> {
    let (n_points, _) = knn_indices.dim();

    let (sigmas, rhos) = smooth_knn_distances(knn_distances, local_connectivity);
    let (rows, cols, values) = membership_strengths(knn_indices, knn_distances, &sigmas, &rhos);

    let directed = TriMat::from_triplets((n_points, n_points), rows, cols, values).to_csr();
    let transpose = directed.transpose_view().to_csr();

    // fuzzy union: A + At - A*At, mixed with the intersection by
    // set_op_mix_ratio (1.0 = pure union)
    let prod = sprs::binop::mul_mat_same_storage(&directed, &transpose);
    let sum = &directed + &transpose;
    let union = &(&sum - &prod) * set_op_mix_ratio;
    let intersection = &prod * (1.0 - set_op_mix_ratio);
    &union + &intersection
}

/// Calibrate the per-point kernel: `rho` is the distance to the
/// `local_connectivity`-th nearest neighbor (interpolated) and `sigma` is the
/// bandwidth solving `sum exp(-(d - rho)/sigma) = log2(k)`.
fn smooth_knn_distances(knn_distances: &Array2<f64>, local_connectivity: f64) -> (Vec<f64>, Vec<f64>) {
    let (n_points, k) = knn_distances.dim();
    let mut rhos = vec![0.0; n_points];
    let mut sigmas = vec![0.0; n_points];

    let overall_mean = {
        let mut acc = 0.0;
        let mut count = 0usize;
        for &d in knn_distances.iter() {
            if d.is_finite() {
                acc += d;
                count += 1;
            }
        }
        if count > 0 {
            acc / count as f64
        } else {
            0.0
        }
    };

    for i in 0..n_points {
        let row = knn_distances.row(i);
        let non_zero: Vec<f64> = row.iter().copied().filter(|&d| d > 0.0 && d.is_finite()).collect();

        if non_zero.len() >= local_connectivity as usize && !non_zero.is_empty() {
            let index = local_connectivity.floor();
            let interpolation = local_connectivity - index;
            if index > 0.0 {
                let index = index as usize;
                rhos[i] = non_zero[index - 1];
                if interpolation > SMOOTH_K_TOLERANCE && index < non_zero.len() {
                    rhos[i] += interpolation * (non_zero[index] - non_zero[index - 1]);
                }
            } else {
                rhos[i] = interpolation * non_zero[0];
            }
        } else if !non_zero.is_empty() {
            rhos[i] = non_zero.iter().fold(f64::MIN, |a, &b| a.max(b));
        }

        sigmas[i] = smooth_knn_dist(row, rhos[i], k);

        // keep sigma away from zero relative to the local scale
        let finite: Vec<f64> = row.iter().copied().filter(|d| d.is_finite()).collect();
        let floor = if rhos[i] > 0.0 && !finite.is_empty() {
            MIN_K_DIST_SCALE * (finite.iter().sum::<f64>() / finite.len() as f64)
        } else {
            MIN_K_DIST_SCALE * overall_mean
        };
        if sigmas[i] < floor {
            sigmas[i] = floor;
        }
    }
    (sigmas, rhos)
}

/// Binary search for the bandwidth of a single point.
fn smooth_knn_dist(distances: ArrayView1<f64>, rho: f64, k: usize) -> f64 {
    let target = (k as f64).log2() * BANDWIDTH;
    let mut lo = 0.0;
    let mut mid = 1.0;
    let mut hi = f64::MAX;

    for _ in 0..N_ITER {
        let psum = distances
            .iter()
            .filter(|d| d.is_finite())
            .fold(0.0, |acc, &d| acc + (-((d - rho).max(0.0) / mid)).exp());

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = lo + (hi - lo) / 2.0;
        } else {
            lo = mid;
            if hi == f64::MAX {
                mid *= 2.0;
            } else {
                mid = lo + (hi - lo) / 2.0;
            }
        }
    }
    mid
}

/// Convert calibrated distances into directed membership strengths as
/// `(row, col, value)` triplets.
fn membership_strengths(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<f64>,
    sigmas: &[f64],
    rhos: &[f64],
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let (n_points, n_neighbors) = knn_indices.dim();
    let mut rows = Vec::with_capacity(n_points * n_neighbors);
    let mut cols = Vec::with_capacity(n_points * n_neighbors);
    let mut values = Vec::with_capacity(n_points * n_neighbors);

    for i in 0..n_points {
        for j in 0..n_neighbors {
            let neighbor = knn_indices[[i, j]];
            if neighbor == usize::MAX {
                continue;
            }
            let val = if neighbor == i {
                0.0
            } else if knn_distances[[i, j]] - rhos[i] <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-((knn_distances[[i, j]] - rhos[i]) / sigmas[i])).exp()
            };
            rows.push(i);
            cols.push(neighbor);
            values.push(val);
        }
    }
    (rows, cols, values)
}
