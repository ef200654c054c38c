use crate::adata::AnnMatrix;
use crate::error::{Error, Result};
use crate::stats::{col_mean_var, median_mut};
use log::{debug, info};
use ndarray::parallel::prelude::{IntoParallelIterator, ParallelIterator};
use ndarray::{Array1, Array2, Axis};
use noisy_float::prelude::n64;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Highly-variable-gene selection thresholds (binned mean/dispersion,
/// Seurat-style cutoffs on the log scale).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HvgConfig {
    /// Lower bound on log1p mean expression.
    pub min_mean: f64,
    /// Upper bound on log1p mean expression.
    pub max_mean: f64,
    /// Lower bound on the normalized log dispersion.
    pub min_disp: f64,
    /// Number of equal-width mean bins for dispersion normalization.
    pub n_bins: usize,
}

impl Default for HvgConfig {
    fn default() -> Self {
        HvgConfig {
            min_mean: 0.0125,
            max_mean: 3.0,
            min_disp: 0.5,
            n_bins: 20,
        }
    }
}

/// Normalization settings. The stages run in a fixed order inside [`run`]:
/// total-count scaling, log1p, HVG selection, covariate regression, scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormConfig {
    /// Per-cell count total after scaling; `None` scales to the median total.
    pub target_sum: Option<f64>,
    /// HVG selection thresholds.
    pub hvg: HvgConfig,
    /// Regress out per-cell total counts.
    pub regress_total_counts: bool,
    /// Regress out the mitochondrial percentage.
    pub regress_pct_mito: bool,
    /// Regress out the ribosomal percentage.
    pub regress_pct_ribo: bool,
    /// Clamp scaled values to `[-clip, clip]`.
    pub clip: Option<f64>,
}

impl Default for NormConfig {
    fn default() -> Self {
        NormConfig {
            target_sum: Some(1000.0),
            hvg: HvgConfig::default(),
            regress_total_counts: true,
            regress_pct_mito: true,
            regress_pct_ribo: true,
            clip: Some(10.0),
        }
    }
}

impl NormConfig {
    /// Reject settings that cannot select any gene.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.target_sum {
            if t <= 0.0 {
                return Err(Error::Configuration(format!("target_sum ({t}) must be positive")));
            }
        }
        if self.hvg.min_mean >= self.hvg.max_mean {
            return Err(Error::Configuration(format!(
                "hvg min_mean ({}) >= max_mean ({})",
                self.hvg.min_mean, self.hvg.max_mean
            )));
        }
        if self.hvg.n_bins == 0 {
            return Err(Error::Configuration("hvg n_bins must be at least 1".to_string()));
        }
        if let Some(c) = self.clip {
            if c <= 0.0 {
                return Err(Error::Configuration(format!("clip ({c}) must be positive")));
            }
        }
        Ok(())
    }
}

/// The densified, fully normalized expression of the highly-variable genes.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Cells x HVGs, regressed and scaled.
    pub data: Array2<f64>,
    /// Column indices of the selected genes in the input matrix.
    pub hvg: Vec<usize>,
}

/// Scale every cell's counts to the same total. With `target = None` the
/// median of the observed totals is used, as in the count normalization the
/// aligner pipelines apply.
pub fn normalize_total(counts: &CsMat<f64>, target: Option<f64>) -> CsMat<f64> {
    let row_sums: Vec<f64> = counts
        .outer_iterator()
        .map(|row| row.iter().map(|(_, &v)| v).sum())
        .collect();

    let target = match target {
        Some(t) => t,
        None => {
            let mut sums = Array1::from_iter(row_sums.iter().map(|&s| n64(s)));
            median_mut(&mut sums).map_or(1.0, |m| m.raw().max(1.0))
        }
    };

    let mut out = counts.clone();
    for (mut row, &sum) in out.outer_iterator_mut().zip(&row_sums) {
        if sum > 0.0 {
            let scale = target / sum;
            for (_, v) in row.iter_mut() {
                *v *= scale;
            }
        }
    }
    out
}

/// Integer counts as a floating-point matrix with the same structure.
pub fn counts_to_f64(counts: &CsMat<u32>) -> CsMat<f64> {
    let mut tri = sprs::TriMat::with_capacity(counts.shape(), counts.nnz());
    for (row, vec) in counts.outer_iterator().enumerate() {
        for (col, &v) in vec.iter() {
            tri.add_triplet(row, col, f64::from(v));
        }
    }
    tri.to_csr()
}

/// `x -> ln(1 + x)` on the non-zero entries.
pub fn log1p(mat: &CsMat<f64>) -> CsMat<f64> {
    mat.map(|&v| v.ln_1p())
}

/// Select highly-variable genes from a log-transformed matrix. Means and
/// dispersions are computed on the un-logged values, dispersions are
/// z-scored within equal-width bins of log1p mean, and the thresholds
/// are applied on the log scale.
pub fn select_hvg(log_mat: &CsMat<f64>, config: &HvgConfig) -> Result<Vec<usize>> {
    let unlogged = log_mat.map(|&v| v.exp_m1());
    let (mean, var) = col_mean_var(&unlogged);
    let genes = mean.len();

    // log-scale mean and dispersion; genes with no signal are not candidates
    let mut log_mean = vec![f64::NAN; genes];
    let mut log_disp = vec![f64::NAN; genes];
    for g in 0..genes {
        if mean[g] > 0.0 && var[g] > 0.0 {
            log_mean[g] = mean[g].ln_1p();
            log_disp[g] = (var[g] / mean[g]).ln();
        }
    }

    let (lo, hi) = log_mean
        .iter()
        .filter(|m| m.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| (lo.min(m), hi.max(m)));
    if lo > hi {
        return Err(Error::EmptyResult("no expressed genes for HVG selection".to_string()));
    }

    let width = ((hi - lo) / config.n_bins as f64).max(f64::EPSILON);
    let bin_of = |m: f64| (((m - lo) / width) as usize).min(config.n_bins - 1);

    // per-bin mean and std of the dispersions
    let mut bin_sum = vec![0.0; config.n_bins];
    let mut bin_sum_sq = vec![0.0; config.n_bins];
    let mut bin_n = vec![0usize; config.n_bins];
    for g in 0..genes {
        if log_mean[g].is_finite() {
            let b = bin_of(log_mean[g]);
            bin_sum[b] += log_disp[g];
            bin_sum_sq[b] += log_disp[g] * log_disp[g];
            bin_n[b] += 1;
        }
    }

    let mut keep = Vec::new();
    for g in 0..genes {
        if !log_mean[g].is_finite() {
            continue;
        }
        let b = bin_of(log_mean[g]);
        let n = bin_n[b] as f64;
        let bin_mean = bin_sum[b] / n;
        let bin_std = if bin_n[b] > 1 {
            ((bin_sum_sq[b] - n * bin_mean * bin_mean) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
        // a singleton bin cannot be z-scored; treat its gene as dispersed
        let disp_norm = if bin_std > 0.0 {
            (log_disp[g] - bin_mean) / bin_std
        } else if bin_n[b] == 1 {
            1.0
        } else {
            0.0
        };

        if log_mean[g] > config.min_mean && log_mean[g] < config.max_mean && disp_norm > config.min_disp {
            keep.push(g);
        }
    }

    if keep.is_empty() {
        return Err(Error::EmptyResult("no highly-variable genes selected".to_string()));
    }
    Ok(keep)
}

/// Densify a column subset of a sparse matrix.
pub fn densify_columns(mat: &CsMat<f64>, cols: &[usize]) -> Array2<f64> {
    let mut col_map = vec![usize::MAX; mat.cols()];
    for (new, &old) in cols.iter().enumerate() {
        col_map[old] = new;
    }
    let mut out = Array2::zeros((mat.rows(), cols.len()));
    for (row, row_vec) in mat.outer_iterator().enumerate() {
        for (col, &v) in row_vec.iter() {
            if col_map[col] != usize::MAX {
                out[[row, col_map[col]]] = v;
            }
        }
    }
    out
}

/// Replace every gene with the residuals of an ordinary least squares fit
/// against the covariates (plus an intercept). The small normal-equation
/// system is factored once and back-substituted per gene.
pub fn regress_out(data: &mut Array2<f64>, covariates: &[Vec<f64>]) -> Result<()> {
    let cells = data.nrows();
    for cov in covariates {
        if cov.len() != cells {
            return Err(Error::Configuration(format!(
                "covariate length {} != {} cells",
                cov.len(),
                cells
            )));
        }
    }

    // constant covariates are collinear with the intercept; drop them
    let covariates: Vec<&Vec<f64>> = covariates
        .iter()
        .filter(|cov| {
            let mean = cov.iter().sum::<f64>() / cells as f64;
            let var = cov.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / cells as f64;
            if var < 1e-12 {
                debug!("dropping constant covariate from the regression");
                false
            } else {
                true
            }
        })
        .collect();
    let d = covariates.len() + 1;

    // design matrix with intercept, and its normal equations
    let mut x = Array2::ones((cells, d));
    for (j, cov) in covariates.iter().enumerate() {
        for (i, &v) in cov.iter().enumerate() {
            x[[i, j + 1]] = v;
        }
    }
    let xtx = x.t().dot(&x);
    let lu = LuFactors::new(xtx)?;

    let xt = x.t().to_owned();
    data.axis_iter_mut(Axis(1)).into_par_iter().for_each(|mut gene| {
        let mut beta: Vec<f64> = (0..d).map(|j| xt.row(j).dot(&gene)).collect();
        lu.solve(&mut beta);
        for (i, v) in gene.iter_mut().enumerate() {
            let mut fit = beta[0];
            for j in 1..d {
                fit += beta[j] * x[[i, j]];
            }
            *v -= fit;
        }
    });
    Ok(())
}

/// LU factorization with partial pivoting of a small dense matrix.
struct LuFactors {
    lu: Array2<f64>,
    piv: Vec<usize>,
}

impl LuFactors {
    fn new(mut a: Array2<f64>) -> Result<LuFactors> {
        let n = a.nrows();
        let mut piv: Vec<usize> = (0..n).collect();
        for k in 0..n {
            let mut p = k;
            for i in k + 1..n {
                if a[[i, k]].abs() > a[[p, k]].abs() {
                    p = i;
                }
            }
            if a[[p, k]].abs() < 1e-12 {
                return Err(Error::SolverConvergence("singular regression design matrix".to_string()));
            }
            if p != k {
                piv.swap(p, k);
                for j in 0..n {
                    let tmp = a[[k, j]];
                    a[[k, j]] = a[[p, j]];
                    a[[p, j]] = tmp;
                }
            }
            for i in k + 1..n {
                let factor = a[[i, k]] / a[[k, k]];
                a[[i, k]] = factor;
                for j in k + 1..n {
                    a[[i, j]] -= factor * a[[k, j]];
                }
            }
        }
        Ok(LuFactors { lu: a, piv })
    }

    fn solve(&self, b: &mut [f64]) {
        let n = self.lu.nrows();
        let permuted: Vec<f64> = self.piv.iter().map(|&p| b[p]).collect();
        b.copy_from_slice(&permuted);
        for i in 1..n {
            for j in 0..i {
                b[i] -= self.lu[[i, j]] * b[j];
            }
        }
        for i in (0..n).rev() {
            for j in i + 1..n {
                b[i] -= self.lu[[i, j]] * b[j];
            }
            b[i] /= self.lu[[i, i]];
        }
    }
}

/// Center every gene at zero mean and unit variance, optionally clamping.
/// Zero-variance genes are centered only.
pub fn scale(data: &mut Array2<f64>, clip: Option<f64>) {
    let cells = data.nrows() as f64;
    data.axis_iter_mut(Axis(1)).into_par_iter().for_each(|mut gene| {
        let mean = gene.sum() / cells;
        let var = gene.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>()
            / (cells - 1.0).max(1.0);
        let std = var.sqrt();
        for v in gene.iter_mut() {
            *v -= mean;
            if std > 0.0 {
                *v /= std;
            }
            if let Some(c) = clip {
                *v = v.clamp(-c, c);
            }
        }
    });
}

/// Run the full normalization sequence on QC-filtered counts. The ordering
/// is fixed by construction; each stage consumes the previous stage's
/// output and the input matrix is left untouched.
pub fn run(adata: &AnnMatrix, config: &NormConfig) -> Result<Normalized> {
    config.validate()?;

    let counts = counts_to_f64(&adata.counts);
    let normed = normalize_total(&counts, config.target_sum);
    let logged = log1p(&normed);

    let hvg = select_hvg(&logged, &config.hvg)?;
    info!("selected {} of {} genes as highly variable", hvg.len(), adata.n_genes());

    let mut data = densify_columns(&logged, &hvg);

    let mut covariates = Vec::new();
    if config.regress_total_counts {
        covariates.push(adata.obs.total_counts.clone());
    }
    if config.regress_pct_mito {
        covariates.push(adata.obs.pct_mito.clone());
    }
    if config.regress_pct_ribo {
        covariates.push(adata.obs.pct_ribo.clone());
    }
    if !covariates.is_empty() {
        regress_out(&mut data, &covariates)?;
    }

    scale(&mut data, config.clip);

    Ok(Normalized { data, hvg })
}

#[cfg(test)]
mod test_normalize {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use sprs::TriMat;

    fn sparse(dense: &[&[f64]]) -> CsMat<f64> {
        let mut tri = TriMat::new((dense.len(), dense[0].len()));
        for (i, row) in dense.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    tri.add_triplet(i, j, v);
                }
            }
        }
        tri.to_csr()
    }

    fn row_sums(mat: &CsMat<f64>) -> Vec<f64> {
        mat.outer_iterator()
            .map(|row| row.iter().map(|(_, &v)| v).sum())
            .collect()
    }

    #[test]
    fn test_normalize_total_fixed_target() {
        let m = sparse(&[&[2., 2., 0.], &[1., 0., 3.]]);
        let out = normalize_total(&m, Some(1000.0));
        for s in row_sums(&out) {
            assert_abs_diff_eq!(s, 1000.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalize_total_idempotent() {
        let m = sparse(&[&[2., 2., 0.], &[1., 0., 3.], &[5., 5., 5.]]);
        let once = normalize_total(&m, Some(1000.0));
        let twice = normalize_total(&once, Some(1000.0));
        for (a, b) in row_sums(&once).iter().zip(row_sums(&twice)) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalize_total_median_target() {
        // totals 2, 4, 6 -> median 4
        let m = sparse(&[&[2., 0.], &[4., 0.], &[0., 6.]]);
        let out = normalize_total(&m, None);
        for s in row_sums(&out) {
            assert_abs_diff_eq!(s, 4.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_log1p() {
        let m = sparse(&[&[0., 1.], &[f64::exp(1.0) - 1.0, 0.]]);
        let out = log1p(&m);
        assert_eq!(out.get(0, 0), None);
        assert_abs_diff_eq!(*out.get(0, 1).unwrap(), 2.0_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(*out.get(1, 0).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_select_hvg_prefers_variable_gene() {
        // gene 0 nearly constant, gene 1 highly variable, similar means
        let mut dense = Vec::new();
        for i in 0..20 {
            let constant = 1.0;
            let variable = if i % 2 == 0 { 0.1 } else { 2.0 };
            dense.push([constant, variable]);
        }
        let rows: Vec<&[f64]> = dense.iter().map(|r| r.as_slice()).collect();
        let logged = log1p(&sparse(&rows));

        let cfg = HvgConfig {
            n_bins: 1,
            ..HvgConfig::default()
        };
        let hvg = select_hvg(&logged, &cfg).unwrap();
        assert_eq!(hvg, vec![1]);
    }

    #[test]
    fn test_regress_out_removes_covariate_trend() {
        // gene is an exact linear function of the covariate
        let cov: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut data = Array2::from_shape_fn((10, 1), |(i, _)| 3.0 + 2.0 * i as f64);
        regress_out(&mut data, &[cov]).unwrap();
        for &v in data.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_regress_out_singular_design() {
        // duplicated covariate makes the normal equations singular
        let cov: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let mut data = Array2::zeros((5, 1));
        let r = regress_out(&mut data, &[cov.clone(), cov]);
        assert!(matches!(r, Err(Error::SolverConvergence(_))));
    }

    #[test]
    fn test_regress_out_skips_constant_covariate() {
        let constant = vec![0.0; 10];
        let cov: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut data = Array2::from_shape_fn((10, 1), |(i, _)| 3.0 + 2.0 * i as f64);
        regress_out(&mut data, &[constant, cov]).unwrap();
        for &v in data.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_scale_zero_mean_unit_variance() {
        let mut data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        scale(&mut data, None);
        for col in data.axis_iter(Axis(1)) {
            let mean = col.sum() / 4.0;
            let var = col.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / 3.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_scale_clips() {
        let mut data = Array2::zeros((11, 1));
        data[[10, 0]] = 1000.0;
        scale(&mut data, Some(3.0));
        assert!(data.iter().all(|&v| (-3.0..=3.0).contains(&v)));
    }
}
