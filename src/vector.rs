// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Contract towards the external ANN library.
//!
//! The core never looks inside a vector index; it only consumes the
//! operations below. [`FlatVectorIndex`] is an exact brute-force
//! implementation of the contract, the executable specification the hybrid
//! iterator is tested against, and a serviceable index for small corpora.

use crate::binary_search::partition_point;
use crate::record::DocId;
use crate::time::Deadline;
use std::sync::Arc;

/// Distance function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared euclidean distance.
    L2,
    /// `1 - <a, b>`.
    InnerProduct,
    /// `1 - cos(a, b)`; vectors are stored normalized.
    Cosine,
}

/// A vector query as handed over by the planner.
#[derive(Debug, Clone)]
pub enum VectorQuery {
    /// The `k` nearest neighbours.
    Knn {
        /// The query vector.
        vector: Vec<f32>,
        /// How many neighbours.
        k: usize,
    },
    /// Everything within `radius` (inclusive) of the query vector.
    Range {
        /// The query vector.
        vector: Vec<f32>,
        /// Maximum distance.
        radius: f64,
    },
}

impl VectorQuery {
    /// The query vector.
    #[must_use]
    pub fn vector(&self) -> &[f32] {
        match self {
            Self::Knn { vector, .. } | Self::Range { vector, .. } => vector,
        }
    }
}

/// Iterator handing out results batch by batch, cheapest first.
pub trait BatchIterator {
    /// Returns `true` if further batches are available.
    fn has_next(&self) -> bool;

    /// Returns up to `n` yet-unreturned results, sorted by ascending doc id.
    fn next_batch(&mut self, n: usize) -> Vec<(DocId, f64)>;
}

/// The operations the core consumes from an ANN index.
pub trait VectorIndex {
    /// Vector dimensionality.
    fn dimension(&self) -> usize;

    /// The index's distance function.
    fn metric(&self) -> DistanceMetric;

    /// Number of indexed vectors.
    fn index_size(&self) -> usize;

    /// The `k` lowest-distance entries, sorted by ascending distance (ties
    /// by doc id). `deadline` lets cooperating implementations cut the
    /// search short, returning a partial result.
    fn top_k(&self, query: &[f32], k: usize, deadline: &Deadline) -> Vec<(DocId, f64)>;

    /// All entries within `radius` of `query`, sorted by ascending doc id.
    fn range_query(&self, query: &[f32], radius: f64, deadline: &Deadline) -> Vec<(DocId, f64)>;

    /// Batch cursor over all entries by ascending distance.
    fn batch_iterator(&self, query: &[f32]) -> Box<dyn BatchIterator>;

    /// Distance between the stored vector of `doc_id` and `query`, or `None`
    /// if the document is not (or no longer) in the index. For cosine
    /// indexes the query must already be normalized.
    fn distance_from(&self, doc_id: DocId, query: &[f32]) -> Option<f64>;

    /// Heuristic: would brute force over `subset_size` filtered candidates
    /// beat batched ANN probing for a `k`-result query?
    fn prefer_ad_hoc_search(&self, subset_size: usize, k: usize, initial: bool) -> bool;
}

/// Normalizes `v` to unit length in place; zero vectors are left alone.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn l2_squared(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(x * y)).sum()
}

/// Exact brute-force vector index over an in-memory table.
pub struct FlatVectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    // sorted by doc id; shared with outstanding batch iterators
    entries: Arc<Vec<(DocId, Vec<f32>)>>,
}

impl FlatVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            entries: Arc::new(Vec::new()),
        }
    }

    /// Inserts or replaces a vector. Cosine indexes store it normalized.
    ///
    /// # Panics
    ///
    /// Panics if the vector length does not match the index dimension.
    pub fn insert(&mut self, doc_id: DocId, mut vector: Vec<f32>) {
        assert_eq!(self.dimension, vector.len(), "dimension mismatch");
        if self.metric == DistanceMetric::Cosine {
            normalize_in_place(&mut vector);
        }

        let entries = Arc::make_mut(&mut self.entries);
        let pos = partition_point(entries, |(id, _)| *id < doc_id);
        match entries.get(pos) {
            Some((id, _)) if *id == doc_id => {
                if let Some(slot) = entries.get_mut(pos) {
                    slot.1 = vector;
                }
            }
            _ => entries.insert(pos, (doc_id, vector)),
        }
    }

    /// Removes a vector.
    pub fn remove(&mut self, doc_id: DocId) {
        let entries = Arc::make_mut(&mut self.entries);
        entries.retain(|(id, _)| *id != doc_id);
    }

    fn distance(&self, stored: &[f32], query: &[f32]) -> f64 {
        match self.metric {
            DistanceMetric::L2 => l2_squared(stored, query),
            DistanceMetric::InnerProduct | DistanceMetric::Cosine => 1.0 - dot(stored, query),
        }
    }

    fn query_copy(&self, query: &[f32]) -> Vec<f32> {
        let mut q = query.to_vec();
        if self.metric == DistanceMetric::Cosine {
            normalize_in_place(&mut q);
        }
        q
    }

    fn all_distances(&self, query: &[f32]) -> Vec<(DocId, f64)> {
        let q = self.query_copy(query);
        self.entries
            .iter()
            .map(|(doc_id, stored)| (*doc_id, self.distance(stored, &q)))
            .collect()
    }
}

impl VectorIndex for FlatVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn index_size(&self) -> usize {
        self.entries.len()
    }

    fn top_k(&self, query: &[f32], k: usize, _deadline: &Deadline) -> Vec<(DocId, f64)> {
        let mut scored = self.all_distances(query);
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    fn range_query(&self, query: &[f32], radius: f64, _deadline: &Deadline) -> Vec<(DocId, f64)> {
        let mut hits: Vec<(DocId, f64)> = self
            .all_distances(query)
            .into_iter()
            .filter(|(_, distance)| *distance <= radius)
            .collect();
        hits.sort_by_key(|(doc_id, _)| *doc_id);
        hits
    }

    fn batch_iterator(&self, query: &[f32]) -> Box<dyn BatchIterator> {
        let mut scored = self.all_distances(query);
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Box::new(FlatBatchIterator { scored, offset: 0 })
    }

    fn distance_from(&self, doc_id: DocId, query: &[f32]) -> Option<f64> {
        let pos = partition_point(&self.entries, |(id, _)| *id < doc_id);
        match self.entries.get(pos) {
            Some((id, stored)) if *id == doc_id => Some(self.distance(stored, query)),
            _ => None,
        }
    }

    fn prefer_ad_hoc_search(&self, subset_size: usize, _k: usize, _initial: bool) -> bool {
        // probing pays off once the filter leaves a large share of the index
        subset_size.saturating_mul(7) < self.index_size()
    }
}

struct FlatBatchIterator {
    scored: Vec<(DocId, f64)>,
    offset: usize,
}

impl BatchIterator for FlatBatchIterator {
    fn has_next(&self) -> bool {
        self.offset < self.scored.len()
    }

    fn next_batch(&mut self, n: usize) -> Vec<(DocId, f64)> {
        let end = (self.offset + n).min(self.scored.len());
        let mut batch = self
            .scored
            .get(self.offset..end)
            .unwrap_or_default()
            .to_vec();
        self.offset = end;
        batch.sort_by_key(|(doc_id, _)| *doc_id);
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_index() -> FlatVectorIndex {
        let mut index = FlatVectorIndex::new(2, DistanceMetric::L2);
        index.insert(1, vec![0.0, 0.0]);
        index.insert(2, vec![1.0, 0.0]);
        index.insert(3, vec![0.0, 2.0]);
        index.insert(4, vec![3.0, 3.0]);
        index
    }

    #[test]
    fn top_k_ascending_distance() {
        let index = sample_index();
        let hits = index.top_k(&[0.0, 0.0], 3, &Deadline::none());
        let ids: Vec<DocId> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(vec![1, 2, 3], ids);
        assert_eq!(0.0, hits[0].1);
        assert_eq!(1.0, hits[1].1);
        assert_eq!(4.0, hits[2].1);
    }

    #[test]
    fn range_query_sorted_by_id() {
        let index = sample_index();
        let hits = index.range_query(&[0.0, 0.0], 4.0, &Deadline::none());
        let ids: Vec<DocId> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(vec![1, 2, 3], ids);
    }

    #[test]
    fn distance_from_missing_doc() {
        let index = sample_index();
        assert!(index.distance_from(99, &[0.0, 0.0]).is_none());
        assert_eq!(Some(1.0), index.distance_from(2, &[0.0, 0.0]));
    }

    #[test]
    fn batches_are_distance_ordered_id_sorted() {
        let index = sample_index();
        let mut batches = index.batch_iterator(&[0.0, 0.0]);

        let first = batches.next_batch(2);
        let ids: Vec<DocId> = first.iter().map(|(id, _)| *id).collect();
        assert_eq!(vec![1, 2], ids);

        assert!(batches.has_next());
        let second = batches.next_batch(10);
        let ids: Vec<DocId> = second.iter().map(|(id, _)| *id).collect();
        assert_eq!(vec![3, 4], ids);
        assert!(!batches.has_next());
    }

    #[test]
    fn cosine_vectors_are_normalized() {
        let mut index = FlatVectorIndex::new(2, DistanceMetric::Cosine);
        index.insert(1, vec![3.0, 0.0]);
        index.insert(2, vec![0.0, 5.0]);

        // query gets normalized inside top_k
        let hits = index.top_k(&[10.0, 0.1], 2, &Deadline::none());
        assert_eq!(1, hits[0].0);
        assert!(hits[0].1 < 0.01);
        assert!((hits[1].1 - 1.0).abs() < 0.05);
    }

    #[test]
    fn insert_replaces_existing() {
        let mut index = sample_index();
        index.insert(2, vec![9.0, 9.0]);
        assert_eq!(4, index.index_size());
        let d = index.distance_from(2, &[9.0, 9.0]);
        assert_eq!(Some(0.0), d);
    }
}
