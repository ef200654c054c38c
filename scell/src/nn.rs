use log::{info, warn};
use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{s, Array2, Axis};
use noisy_float::checkers::NumChecker;
use noisy_float::NoisyFloat;
use num_traits::Bounded;
use vpsearch::{BestCandidate, MetricSpace, Tree};

/// k-nearest-neighbor graph over cells: `n x k` neighbor indices and
/// distances, each row sorted by distance. Rows with fewer than `k`
/// neighbors are padded with `usize::MAX` / `f64::INFINITY`.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    /// Neighbor indices per cell.
    pub indices: Array2<usize>,
    /// Euclidean distances per cell, parallel to `indices`.
    pub distances: Array2<f64>,
}

impl NeighborGraph {
    /// Neighbors requested per cell.
    pub fn k(&self) -> usize {
        self.indices.ncols()
    }

    /// Undirected edges `(i, j, distance)`, one per stored neighbor pair.
    pub fn edges(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::new();
        for (i, row) in self.indices.rows().into_iter().enumerate() {
            for (slot, &j) in row.iter().enumerate() {
                if j != usize::MAX {
                    out.push((i, j, self.distances[[i, slot]]));
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug)]
struct Sample<'a> {
    data: &'a [f64],
    idx: usize,
}

impl MetricSpace for Sample<'_> {
    type UserData = ();
    type Distance = NoisyFloat<f64, NumChecker>;

    fn distance(&self, other: &Self, _: &Self::UserData) -> Self::Distance {
        let d = self
            .data
            .iter()
            .zip(other.data)
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>();
        NoisyFloat::new(d.sqrt())
    }
}

/// Custom search tracking the indices of the N nearest points.
struct CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    max_item_count: usize,
    max_observed_distance: Item::Distance,
    distance_x_index: Vec<(Item::Distance, usize)>,
}

impl<Item, Impl> CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Item::Distance as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Item::Distance as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    /// Insert a single index in the correct position given that
    /// `distance_x_index` is already sorted.
    fn insert_index(&mut self, index: usize, distance: Item::Distance) {
        let val = (distance, index);
        let idx = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(idx, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            self.max_observed_distance = self.distance_x_index.last().unwrap().0;
        }
    }
}

impl<'a, Item, Impl> BestCandidate<Item, Impl> for &'a mut CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl> + Clone,
    Item::Distance: Ord,
{
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Item::Distance, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Item, distance: Item::Distance, candidate_index: usize, _: &Item::UserData) {
        if self.max_item_count == 0 {
            return;
        }
        if distance < self.max_observed_distance || self.distance_x_index.len() < self.max_item_count {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Item::Distance {
        self.max_observed_distance
    }

    fn result(self, _: &Item::UserData) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

fn samples_of(data: &Array2<f64>) -> Vec<Sample<'_>> {
    (0..data.nrows())
        .map(|idx| Sample {
            data: data.slice(s![idx, ..]).to_slice().unwrap(),
            idx,
        })
        .collect()
}

/// Compute the `k` nearest neighbors of each row of `data` with a
/// vantage-point tree over Euclidean distance.
pub fn nearest_neighbors(data: &Array2<f64>, mut k: usize) -> NeighborGraph {
    let cells = data.nrows();
    if cells <= k {
        warn!("{} neighbors requested, but only {} available", k, cells - 1);
        k = cells - 1;
    }

    let samples = samples_of(data);
    info!("constructing vp-tree of {} points", cells);
    let vp = Tree::new(&samples);

    let mut indices = Array2::from_elem((cells, k), usize::MAX);
    let mut distances = Array2::from_elem((cells, k), f64::INFINITY);

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k + 1),
            |neighborhood, (cell, (mut indices, mut distances))| {
                neighborhood.clear();
                let query = &samples[cell];
                let mut j = 0;
                for (dist, idx) in vp.find_nearest_custom(query, &(), neighborhood) {
                    if query.idx != idx && j < k {
                        indices[j] = idx;
                        distances[j] = dist.raw();
                        j += 1;
                    }
                }
            },
        );

    NeighborGraph { indices, distances }
}

/// Batch-balanced k-NN: every cell draws its `neighbors_within_batch`
/// nearest neighbors from each batch separately, so the graph connects
/// batches even when they are shifted apart in PC space. `batches[i]` is
/// the batch id of row `i`; rows of the result are re-sorted by distance.
pub fn batch_balanced_neighbors(
    data: &Array2<f64>,
    batches: &[usize],
    neighbors_within_batch: usize,
) -> NeighborGraph {
    assert_eq!(batches.len(), data.nrows());
    let n_batches = batches.iter().max().map_or(0, |&b| b + 1);
    let cells = data.nrows();
    let k = neighbors_within_batch * n_batches;

    let samples = samples_of(data);
    let members: Vec<Vec<usize>> = (0..n_batches)
        .map(|b| (0..cells).filter(|&i| batches[i] == b).collect())
        .collect();
    let batch_samples: Vec<Vec<Sample<'_>>> = members
        .iter()
        .map(|m| m.iter().map(|&i| samples[i].clone()).collect())
        .collect();

    info!("constructing {} per-batch vp-trees over {} cells", n_batches, cells);
    let trees: Vec<Tree<Sample<'_>>> = batch_samples.iter().map(|s| Tree::new(s)).collect();

    let mut indices = Array2::from_elem((cells, k), usize::MAX);
    let mut distances = Array2::from_elem((cells, k), f64::INFINITY);

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(neighbors_within_batch + 1),
            |neighborhood, (cell, (mut indices, mut distances))| {
                let query = &samples[cell];
                let mut found: Vec<(f64, usize)> = Vec::with_capacity(k);
                for (batch, tree) in trees.iter().enumerate() {
                    neighborhood.clear();
                    let mut taken = 0;
                    for (dist, local) in tree.find_nearest_custom(query, &(), &mut *neighborhood) {
                        let global = members[batch][local];
                        if global != cell && taken < neighbors_within_batch {
                            found.push((dist.raw(), global));
                            taken += 1;
                        }
                    }
                }
                found.sort_by(|a, b| a.partial_cmp(b).unwrap());
                for (slot, (d, idx)) in found.into_iter().enumerate() {
                    indices[slot] = idx;
                    distances[slot] = d;
                }
            },
        );

    NeighborGraph { indices, distances }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_nearest_neighbors_line() {
        // points on a line at 0, 1, 2, 10
        let data = arr2(&[[0.0], [1.0], [2.0], [10.0]]);
        let g = nearest_neighbors(&data, 2);
        assert_eq!(g.indices.row(0).to_vec(), vec![1, 2]);
        assert_eq!(g.indices.row(1).to_vec(), vec![0, 2]);
        assert_eq!(g.indices.row(2).to_vec(), vec![1, 0]);
        assert_eq!(g.indices.row(3).to_vec(), vec![2, 1]);
        assert_eq!(g.distances.row(3).to_vec(), vec![8.0, 9.0]);
    }

    #[test]
    fn test_k_clamped_to_available() {
        let data = arr2(&[[0.0], [1.0], [2.0]]);
        let g = nearest_neighbors(&data, 10);
        assert_eq!(g.k(), 2);
        assert!(g.indices.iter().all(|&i| i != usize::MAX));
    }

    #[test]
    fn test_batch_balanced_bridges_shifted_batches() {
        // batch 0 near the origin, batch 1 shifted by 100; plain kNN would
        // keep every neighbor within the own batch
        let data = arr2(&[[0.0], [1.0], [2.0], [100.0], [101.0], [102.0]]);
        let batches = vec![0, 0, 0, 1, 1, 1];
        let g = batch_balanced_neighbors(&data, &batches, 1);

        assert_eq!(g.k(), 2);
        for cell in 0..6 {
            let row = g.indices.row(cell);
            let own = batches[cell];
            let batch_hits: Vec<usize> = row.iter().map(|&j| batches[j]).collect();
            assert!(batch_hits.contains(&own));
            assert!(batch_hits.contains(&(1 - own)));
        }

        // rows are sorted by distance: the own-batch neighbor comes first
        assert_eq!(g.indices[[0, 0]], 1);
        assert_eq!(g.indices[[0, 1]], 3);
    }
}
