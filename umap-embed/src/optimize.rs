//! Sequential stochastic gradient optimization of the low-dimensional layout.
//! Position updates are applied immediately and influence the updates of other
//! points within the same epoch, so the loop cannot be parallelized without
//! changing the result.

use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64Mcg;

/// Full optimization state: the edge lists, per-edge sampling schedule, and
/// the embedding being updated in place.
pub struct State {
    /// Whether an attractive update also moves the tail endpoint.
    pub move_other: bool,
    /// Learning rate at epoch 0; `alpha` decays linearly from here.
    pub initial_alpha: f64,

    /// Repulsion strength applied to negative samples.
    pub gamma: f64,
    /// Kernel parameter `a` of `1 / (1 + a * d^(2b))`.
    pub a: f64,
    /// Kernel parameter `b`.
    pub b: f64,
    /// Negative samples drawn per positive sample.
    pub negative_sample_rate: usize,

    /// Total epochs to run.
    pub n_epochs: usize,
    /// Epochs completed so far.
    pub current_epoch: usize,

    /// Edge head indices.
    pub head: Vec<usize>,
    /// Edge tail indices.
    pub tail: Vec<usize>,
    /// Epochs between consecutive samples of each edge.
    pub epochs_per_sample: Vec<f64>,
    /// Epochs between consecutive negative samples of each edge.
    pub epochs_per_negative_sample: Vec<f64>,

    /// Current learning rate.
    pub alpha: f64,
    /// The layout, updated in place each epoch.
    pub embedding: Array2<f64>,
    /// Next epoch at which each edge is sampled.
    pub epoch_of_next_sample: Vec<f64>,
    /// Next epoch at which each edge draws negative samples.
    pub epoch_of_next_negative_sample: Vec<f64>,

    random: Pcg64Mcg,
}

impl State {
    /// Build the optimization state from fitted kernel parameters and the
    /// edge sampling schedule.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        a: f64,
        b: f64,
        learning_rate: f64,
        repulsion_strength: f64,
        negative_sample_rate: usize,
        n_epochs: usize,
        embedding: Array2<f64>,
        head: Vec<usize>,
        tail: Vec<usize>,
        epochs_per_sample: Vec<f64>,
        random: Pcg64Mcg,
    ) -> State {
        let epochs_per_negative_sample = epochs_per_sample
            .iter()
            .map(|&e| e / (negative_sample_rate as f64))
            .collect::<Vec<_>>();

        State {
            random,
            a,
            b,
            embedding,
            initial_alpha: learning_rate,
            alpha: learning_rate,
            gamma: repulsion_strength,
            negative_sample_rate,
            move_other: true,
            n_epochs,
            head,
            tail,
            epochs_per_sample: epochs_per_sample.clone(),
            epoch_of_next_sample: epochs_per_sample,
            epoch_of_next_negative_sample: epochs_per_negative_sample.clone(),
            epochs_per_negative_sample,
            current_epoch: 0,
        }
    }

    /// Number of points in the layout.
    pub fn num_points(&self) -> usize {
        self.embedding.shape()[0]
    }

    /// Run all remaining epochs.
    pub fn optimize(&mut self) {
        while self.current_epoch < self.n_epochs {
            optimize_layout_step(self);
        }
    }

    /// The current layout.
    pub fn get_embedding(&self) -> &Array2<f64> {
        &self.embedding
    }
}

/// Squared Euclidean distance
#[inline]
fn euclidean_sq(embeddings: &Array2<f64>, j: usize, k: usize) -> f64 {
    let x = embeddings.row(j);
    let y = embeddings.row(k);
    x.iter().zip(y).map(|(&x, &y)| x - y).fold(0.0, |acc, s| acc + s * s)
}

fn optimize_layout_step(state: &mut State) {
    for i in 0..state.epochs_per_sample.len() {
        iterate_euclidean(state, i);
    }

    state.alpha = state.initial_alpha * (1.0 - (state.current_epoch as f64) / (state.n_epochs as f64));
    state.current_epoch += 1;
}

#[inline]
fn iterate_euclidean(state: &mut State, i: usize) {
    if state.epoch_of_next_sample[i] > state.current_epoch as f64 {
        return;
    }

    let j = state.head[i];
    let k = state.tail[i];

    let (a, b, gamma, alpha) = (state.a, state.b, state.gamma, state.alpha);
    let embedded_dim = state.embedding.shape()[1];

    let dist_sq = euclidean_sq(&state.embedding, j, k);
    let grad_coeff = if dist_sq > 0.0 {
        (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b))
    } else {
        0.0
    };

    for d in 0..embedded_dim {
        let current = state.embedding[[j, d]];
        let other = state.embedding[[k, d]];
        let grad_d = (grad_coeff * (current - other)).clamp(-4.0, 4.0);

        state.embedding[[j, d]] += grad_d * alpha;
        if state.move_other {
            state.embedding[[k, d]] -= grad_d * alpha;
        }
    }

    state.epoch_of_next_sample[i] += state.epochs_per_sample[i];

    let n_neg_samples =
        (state.current_epoch as f64 - state.epoch_of_next_negative_sample[i]) / state.epochs_per_negative_sample[i];

    for _ in 0..n_neg_samples.floor() as isize {
        let k = state.random.gen_range(0..state.embedding.shape()[0]);

        if j == k {
            continue;
        }

        let dist_sq = euclidean_sq(&state.embedding, j, k);
        let grad_coeff = if dist_sq > 0.0 {
            (2.0 * gamma * b) / ((1e-3 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
        } else {
            0.0
        };

        for d in 0..embedded_dim {
            let current = state.embedding[[j, d]];
            let other = state.embedding[[k, d]];
            let grad_d = if grad_coeff > 0.0 {
                (grad_coeff * (current - other)).clamp(-4.0, 4.0)
            } else {
                4.0
            };

            state.embedding[[j, d]] += grad_d * alpha;
        }
    }

    state.epoch_of_next_negative_sample[i] += n_neg_samples * state.epochs_per_negative_sample[i];
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn toy_state() -> State {
        // two attracted pairs seeded far apart
        let embedding = ndarray::arr2(&[[0.0, 0.0], [5.0, 5.0], [-5.0, 5.0], [5.0, -5.0]]);
        State::new(
            1.5769434603113077,
            0.8950608779109733,
            1.0,
            1.0,
            5,
            50,
            embedding,
            vec![0, 1, 2, 3],
            vec![1, 0, 3, 2],
            vec![1.0, 1.0, 1.0, 1.0],
            Pcg64Mcg::seed_from_u64(42),
        )
    }

    #[test]
    fn test_attraction_pulls_edge_endpoints_closer() {
        let mut state = toy_state();
        let before = euclidean_sq(&state.embedding, 0, 1);
        state.optimize();
        let after = euclidean_sq(&state.embedding, 0, 1);
        assert!(after < before, "{after} >= {before}");
        assert_eq!(state.current_epoch, state.n_epochs);
    }

    #[test]
    fn test_alpha_decays_to_zero() {
        let mut state = toy_state();
        state.optimize();
        assert_abs_diff_eq!(state.alpha, 0.0, epsilon = 0.05);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let mut s1 = toy_state();
        let mut s2 = toy_state();
        s1.optimize();
        s2.optimize();
        assert_eq!(s1.embedding, s2.embedding);
    }
}
