//! Statistics functions

use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use num_traits::FromPrimitive;
use sprs::CsMat;
use std::ops::{Add, Div};

/// Return the median. Sorts its argument in place.
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Clone + Copy + Ord + FromPrimitive + Add<Output = T> + Div<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    match xs.as_slice_mut() {
        Some(vector) => vector.sort_unstable(),
        None => panic!("median of non-contiguous data"),
    }
    Ok(if xs.len() % 2 == 0 {
        (xs[xs.len() / 2] + xs[xs.len() / 2 - 1]) / (T::from_u64(2).unwrap())
    } else {
        xs[xs.len() / 2]
    })
}

/// Per-column mean and variance (ddof = 1) of a CSR matrix, zeros included.
pub fn col_mean_var(mat: &CsMat<f64>) -> (Vec<f64>, Vec<f64>) {
    let (rows, cols) = mat.shape();
    let mut sum = vec![0.0; cols];
    let mut sum_sq = vec![0.0; cols];

    for row in mat.outer_iterator() {
        for (col, &v) in row.iter() {
            sum[col] += v;
            sum_sq[col] += v * v;
        }
    }

    let n = rows as f64;
    let mean: Vec<f64> = sum.iter().map(|&s| s / n).collect();
    let var: Vec<f64> = sum_sq
        .iter()
        .zip(&mean)
        .map(|(&sq, &m)| {
            if rows < 2 {
                0.0
            } else {
                (sq - n * m * m) / (n - 1.0)
            }
        })
        .collect();
    (mean, var)
}
