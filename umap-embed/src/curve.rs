use log::debug;

/// Published defaults for min_dist = 0.1, spread = 1.0; used as the starting
/// point and as the fallback when the fit does not converge.
const FALLBACK_A: f64 = 1.5769434603113077;
const FALLBACK_B: f64 = 0.8950608779109733;

const MAX_ITER: usize = 300;

/// Fit the embedding kernel `1 / (1 + a * d^(2b))` to the target curve
/// defined by `min_dist` and `spread` (1 inside min_dist, exponential decay
/// beyond it), by damped Gauss-Newton least squares on a sampled grid.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let step = spread / 100.0;
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * step).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let mut a = FALLBACK_A;
    let mut b = FALLBACK_B;
    let mut lambda = 1e-3;
    let mut sse = sum_sq_err(a, b, &xs, &ys);

    for iter in 0..MAX_ITER {
        // normal equations J^T J delta = -J^T r for the two parameters
        let (mut jtj_aa, mut jtj_ab, mut jtj_bb) = (0.0, 0.0, 0.0);
        let (mut jtr_a, mut jtr_b) = (0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let xp = x.powf(2.0 * b);
            let denom = 1.0 + a * xp;
            let f = 1.0 / denom;
            let r = f - y;
            let da = -xp / (denom * denom);
            let db = -2.0 * a * xp * x.ln() / (denom * denom);
            jtj_aa += da * da;
            jtj_ab += da * db;
            jtj_bb += db * db;
            jtr_a += da * r;
            jtr_b += db * r;
        }

        // Levenberg damping keeps the 2x2 solve well conditioned
        let maa = jtj_aa * (1.0 + lambda);
        let mbb = jtj_bb * (1.0 + lambda);
        let det = maa * mbb - jtj_ab * jtj_ab;
        if det.abs() < 1e-30 {
            break;
        }
        let delta_a = (-jtr_a * mbb + jtr_b * jtj_ab) / det;
        let delta_b = (-jtr_b * maa + jtr_a * jtj_ab) / det;

        let cand_a = (a + delta_a).max(1e-8);
        let cand_b = (b + delta_b).max(1e-8);
        let cand_sse = sum_sq_err(cand_a, cand_b, &xs, &ys);

        if cand_sse < sse {
            let converged = (sse - cand_sse) < 1e-12;
            a = cand_a;
            b = cand_b;
            sse = cand_sse;
            lambda = (lambda * 0.5).max(1e-12);
            if converged {
                debug!("ab fit converged after {} iterations: a={}, b={}", iter, a, b);
                return (a, b);
            }
        } else {
            lambda *= 4.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    if sse.is_finite() && sse < sum_sq_err(FALLBACK_A, FALLBACK_B, &xs, &ys) + 1e-9 {
        (a, b)
    } else {
        (FALLBACK_A, FALLBACK_B)
    }
}

fn sum_sq_err(a: f64, b: f64, xs: &[f64], ys: &[f64]) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
            (f - y) * (f - y)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_min_dist_01_matches_reference() {
        let (a, b) = find_ab_params(1.0, 0.1);
        assert_abs_diff_eq!(a, FALLBACK_A, epsilon = 0.05);
        assert_abs_diff_eq!(b, FALLBACK_B, epsilon = 0.02);
    }

    #[test]
    fn test_larger_min_dist_flattens_kernel() {
        let (a_01, _) = find_ab_params(1.0, 0.1);
        let (a_05, b_05) = find_ab_params(1.0, 0.5);
        // a shrinks as min_dist grows; the kernel plateau widens
        assert!(a_05 < a_01);
        assert!(b_05 > 0.0);
    }
}
