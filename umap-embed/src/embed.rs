use ndarray::Array2;
use rand::Rng;
use sprs::CsMat;

/// Seed the embedding with uniform noise in [-10, 10].
pub fn initialize_embedding(n_points: usize, embedding_dim: usize, random: &mut impl Rng) -> Array2<f64> {
    let mut embedding = Array2::zeros((n_points, embedding_dim));
    embedding.mapv_inplace(|_| random.gen_range(-10.0..10.0));
    embedding
}

/// Turn the fuzzy graph into the edge lists the optimizer consumes. Edges
/// whose weight falls below `max_weight / n_epochs` would never be sampled,
/// so they are dropped up front.
pub fn initialize_simplicial_set_embedding(
    graph: &mut CsMat<f64>,
    n_epochs: f64,
    random: &mut impl Rng,
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut weights = Vec::<f64>::new();
    let mut head = Vec::<usize>::new();
    let mut tail = Vec::<usize>::new();

    let graph_max = graph.iter().fold(0.0_f64, |acc, (&value, _)| acc.max(value));

    graph.map_inplace(|&value| if value < graph_max / n_epochs { 0.0 } else { value });

    graph.iter().for_each(|(&value, (row, col))| {
        if value != 0.0 {
            weights.push(value);
            tail.push(row);
            head.push(col);
        }
    });

    shuffle_together(&mut head, &mut tail, &mut weights, random);

    (head, tail, make_epochs_per_sample(&weights, n_epochs))
}

fn shuffle_together<T, T2, T3>(list: &mut [T], other: &mut [T2], weights: &mut [T3], random: &mut impl Rng)
where
    T: Copy,
    T2: Copy,
    T3: Copy,
{
    let mut n = list.len();
    assert_eq!(other.len(), n);
    assert_eq!(weights.len(), n);
    while n > 1 {
        n -= 1;
        let k = random.gen_range(0..n + 1);
        list.swap(k, n);
        other.swap(k, n);
        weights.swap(k, n);
    }
}

fn make_epochs_per_sample(weights: &[f64], n_epochs: f64) -> Vec<f64> {
    let mut result = vec![-1.0; weights.len()];
    let max = weights.iter().fold(f64::MIN, |a, &b| a.max(b));
    weights.iter().enumerate().for_each(|(i, &w)| {
        let n = (w / max) * n_epochs;
        if n > 0.0 {
            result[i] = n_epochs / n;
        }
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use sprs::TriMat;

    #[test]
    fn test_initialize_embedding_bounds() {
        let mut random = Pcg64Mcg::seed_from_u64(7);
        let embedding = initialize_embedding(50, 2, &mut random);
        assert_eq!(embedding.shape(), &[50, 2]);
        assert!(embedding.iter().all(|&v| (-10.0..10.0).contains(&v)));
    }

    #[test]
    fn test_low_weight_edges_pruned() {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        tri.add_triplet(1, 2, 0.001);
        tri.add_triplet(2, 1, 0.001);
        let mut graph: CsMat<f64> = tri.to_csr();

        let mut random = Pcg64Mcg::seed_from_u64(0);
        let (head, tail, epochs_per_sample) =
            initialize_simplicial_set_embedding(&mut graph, 100.0, &mut random);

        // 0.001 < max/n_epochs = 0.01, so only the strong edge survives
        assert_eq!(head.len(), 2);
        assert_eq!(tail.len(), 2);
        for &e in &epochs_per_sample {
            assert_abs_diff_eq!(e, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_epochs_per_sample_scales_with_weight() {
        let eps = make_epochs_per_sample(&[1.0, 0.5, 0.25], 200.0);
        assert_abs_diff_eq!(eps[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eps[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eps[2], 4.0, epsilon = 1e-12);
    }
}
