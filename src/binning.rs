use std::ops::Index;
use std::sync::Arc;

use crate::dataset::{Dataset, Event};
use crate::variable::Variable;

/// A dataset partitioned into equal-width bins of a kinematic variable.
#[derive(Debug, Clone)]
pub struct BinnedDataset {
    datasets: Vec<Arc<Dataset>>,
    edges: Vec<f64>,
}

impl Index<usize> for BinnedDataset {
    type Output = Arc<Dataset>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.datasets[index]
    }
}

impl BinnedDataset {
    pub fn n_bins(&self) -> usize {
        self.datasets.len()
    }
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }
    pub fn range(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }
    /// Lower and upper edge of bin `index`.
    pub fn bin_edges(&self, index: usize) -> (f64, f64) {
        (self.edges[index], self.edges[index + 1])
    }
    pub fn centers(&self) -> Vec<f64> {
        self.edges
            .windows(2)
            .map(|edges| (edges[0] + edges[1]) / 2.0)
            .collect()
    }
    pub fn get(&self, index: usize) -> Option<&Arc<Dataset>> {
        self.datasets.get(index)
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dataset>> {
        self.datasets.iter()
    }
    /// Total number of events across all bins.
    pub fn len(&self) -> usize {
        self.datasets.iter().map(|dataset| dataset.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bin index of `value` for `bins` equal-width bins over the closed interval `[lower, upper]`.
pub fn bin_index(value: f64, bins: usize, (lower, upper): (f64, f64)) -> Option<usize> {
    if !(lower..=upper).contains(&value) {
        return None;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let index = ((value - lower) / (upper - lower) * bins as f64).floor() as usize;
    Some(index.min(bins - 1))
}

impl Dataset {
    /// Partitions the dataset into `bins` equal-width bins of `variable` over the closed range
    /// `range`.
    ///
    /// Events keep their weights and their relative order. Events outside the range (or with a
    /// non-finite value) are dropped, and an event exactly on the upper edge lands in the last
    /// bin.
    ///
    /// # Panics
    ///
    /// Panics if `bins` is zero.
    pub fn bin_by<V: Variable>(
        &self,
        variable: &V,
        bins: usize,
        range: (f64, f64),
    ) -> BinnedDataset {
        assert!(bins > 0, "cannot partition a dataset into zero bins");
        let (lower, upper) = range;
        let values = variable.value_on(self);
        let mut partition: Vec<Vec<Arc<Event>>> = vec![Vec::new(); bins];
        for (event, value) in self.events.iter().zip(values) {
            if let Some(index) = bin_index(value, bins, range) {
                partition[index].push(Arc::clone(event));
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let width = (upper - lower) / bins as f64;
        #[allow(clippy::cast_precision_loss)]
        let mut edges: Vec<f64> = (0..bins).map(|i| lower + width * i as f64).collect();
        edges.push(upper);
        BinnedDataset {
            datasets: partition
                .into_iter()
                .map(|events| Arc::new(Dataset { events }))
                .collect(),
            edges,
        }
    }
}
