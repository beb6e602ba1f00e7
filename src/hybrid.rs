// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hybrid vector iterator: couples an ANN query with a Boolean sub-query.
//!
//! Modes:
//!
//! - **standard KNN**: no filter; one top-k call, results drained in
//!   ascending distance order
//! - **ad-hoc brute force**: drain the filter, compute the distance of each
//!   survivor, keep the best `k` in a bounded min-max heap
//! - **batches**: pull distance-ordered batches from the ANN index and
//!   merge each against the filter by doc id; between batches the filter's
//!   density is re-estimated and the search may fall back to ad-hoc
//! - **range**: a single range query wrapped in a metric iterator (built by
//!   [`new_hybrid_vector`], no filter participates)
//!
//! Hybrid results surface in *descending* distance order (heap drain);
//! standard KNN in ascending order. Either way every yield carries the
//! distance as a metric under the query's score field.

use crate::error::Error;
use crate::iterators::{
    new_metric, AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate,
};
use crate::record::{AggregateKind, DocId, IndexRecord, MetricKey, RecordData};
use crate::time::Deadline;
use crate::vector::{normalize_in_place, DistanceMetric, VectorIndex, VectorQuery};
use interval_heap::IntervalHeap;
use std::sync::Arc;

/// Hybrid execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Plain top-k, no filter.
    StandardKnn,
    /// Brute force over the filter's survivors.
    AdHocBruteForce,
    /// Batched ANN probing merged with the filter.
    Batches,
    /// Started in batches, fell back to brute force.
    BatchesToAdHoc,
}

/// Everything needed to build a hybrid iterator.
pub struct HybridParams {
    /// The ANN index.
    pub index: Arc<dyn VectorIndex>,
    /// KNN or range query.
    pub query: VectorQuery,
    /// Key under which the distance is attached to results.
    pub score_field: Option<MetricKey>,
    /// The Boolean sub-query ("the filter"), if any.
    pub child: Option<AnyIterator>,
    /// Pins the execution strategy instead of letting the heuristic choose.
    pub mode: Option<SearchMode>,
    /// Pins the ANN batch size in batches mode.
    pub batch_size: Option<usize>,
    /// Yield bare metric records instead of `(distance, filter subtree)`
    /// aggregates; for queries that do not score documents downstream.
    pub ignore_scores: bool,
    /// Query deadline, shared with the ANN library.
    pub deadline: Deadline,
}

struct HeapHit {
    distance: f64,
    doc_id: DocId,
    record: IndexRecord,
}

impl PartialEq for HeapHit {
    fn eq(&self, other: &Self) -> bool {
        self.distance.total_cmp(&other.distance).is_eq() && self.doc_id == other.doc_id
    }
}

impl Eq for HeapHit {}

impl Ord for HeapHit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.doc_id.cmp(&other.doc_id))
    }
}

impl PartialOrd for HeapHit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Hybrid KNN iterator; see the module docs.
pub struct HybridIterator {
    index: Arc<dyn VectorIndex>,
    query_vector: Vec<f32>,
    k: usize,
    pub(crate) child: Option<Box<AnyIterator>>,
    mode: SearchMode,
    mode_pinned: bool,
    fixed_batch_size: Option<usize>,
    ignore_scores: bool,
    score_field: Option<MetricKey>,
    deadline: Deadline,
    prepared: bool,
    timed_out: bool,
    heap: IntervalHeap<HeapHit>,
    knn_list: Vec<(DocId, f64)>,
    knn_pos: usize,
    num_iterations: usize,
    last_id: DocId,
    current: IndexRecord,
    at_end: bool,
}

/// Builds the iterator for a vector query: a [`HybridIterator`] for KNN
/// queries, a metric iterator over the result set for range queries.
///
/// # Errors
///
/// [`Error::BadInput`] on a query vector whose length does not match the
/// index dimension, or a negative range radius.
pub fn new_hybrid_vector(params: HybridParams) -> crate::Result<AnyIterator> {
    if params.query.vector().len() != params.index.dimension() {
        return Err(Error::BadInput(format!(
            "query vector has {} dimensions, index has {}",
            params.query.vector().len(),
            params.index.dimension()
        )));
    }

    match params.query {
        VectorQuery::Range { vector, radius } => {
            if radius < 0.0 {
                return Err(Error::BadInput(format!("negative range radius {radius}")));
            }
            let hits = params.index.range_query(&vector, radius, &params.deadline);
            let (doc_ids, metrics) = hits.into_iter().unzip();
            Ok(new_metric(doc_ids, metrics, params.score_field, true))
        }
        VectorQuery::Knn { vector, k } => {
            let has_filter = params
                .child
                .as_ref()
                .is_some_and(|child| child.kind() != IteratorKind::Empty);

            let mode = if !has_filter || k == 0 {
                SearchMode::StandardKnn
            } else if let Some(mode) = params.mode {
                mode
            } else {
                let subset = params
                    .child
                    .as_ref()
                    .map_or(0, |child| child.num_estimated())
                    .min(params.index.index_size());
                if params.index.prefer_ad_hoc_search(subset, k, true) {
                    SearchMode::AdHocBruteForce
                } else {
                    SearchMode::Batches
                }
            };

            log::debug!("hybrid vector query: k={k}, mode {mode:?}");

            Ok(AnyIterator::Hybrid(HybridIterator {
                index: params.index,
                query_vector: vector,
                k,
                child: params.child.map(Box::new),
                mode,
                mode_pinned: params.mode.is_some(),
                fixed_batch_size: params.batch_size,
                ignore_scores: params.ignore_scores,
                score_field: params.score_field,
                deadline: params.deadline,
                prepared: false,
                timed_out: false,
                heap: IntervalHeap::with_capacity(k + 1),
                knn_list: Vec::new(),
                knn_pos: 0,
                num_iterations: 0,
                last_id: 0,
                current: IndexRecord::metric(),
                at_end: false,
            }))
        }
    }
}

impl HybridIterator {
    /// The strategy the iterator ended up using.
    #[must_use]
    pub fn search_mode(&self) -> SearchMode {
        self.mode
    }

    /// Number of ANN batches pulled (batches mode).
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    fn worst_distance(&self) -> f64 {
        self.heap.max().map_or(f64::INFINITY, |hit| hit.distance)
    }

    /// Builds a result record for one surviving doc and pushes it into the
    /// bounded heap.
    fn insert_result(&mut self, child_record: &IndexRecord, doc_id: DocId, distance: f64) {
        let mut hit = if self.ignore_scores {
            let mut hit = IndexRecord::metric();
            hit.doc_id = doc_id;
            hit.data = RecordData::Metric(distance);
            hit.concat_metrics(child_record);
            hit
        } else {
            // 2-child aggregate: the distance, then the filter subtree for
            // the scorer further down the pipeline
            let mut vec_part = IndexRecord::metric();
            vec_part.doc_id = doc_id;
            vec_part.data = RecordData::Metric(distance);

            let mut hit = IndexRecord::aggregate(AggregateKind::Hybrid, 2, 1.0);
            hit.push_child(&vec_part);
            hit.push_child(child_record);
            hit.doc_id = doc_id;
            hit
        };

        if let Some(key) = &self.score_field {
            hit.add_metric(key.clone(), distance);
        }

        if self.heap.len() >= self.k {
            self.heap.pop_max();
        }
        self.heap.push(HeapHit {
            distance,
            doc_id,
            record: hit,
        });
    }

    /// Ad-hoc brute force: drain the filter, score every survivor.
    fn compute_distances(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        let mut query = self.query_vector.clone();
        if self.index.metric() == DistanceMetric::Cosine {
            normalize_in_place(&mut query);
        }

        loop {
            match child.read() {
                IteratorStatus::Ok => {}
                IteratorStatus::TimedOut => {
                    self.timed_out = true;
                    break;
                }
                _ => break,
            }
            if self.deadline.is_expired() {
                self.timed_out = true;
                break;
            }

            let doc_id = child.last_doc_id();
            // deleted from the vector index but not yet from the filter
            let Some(distance) = self.index.distance_from(doc_id, &query) else {
                continue;
            };
            if distance.is_nan() {
                continue;
            }

            if self.heap.len() < self.k || distance < self.worst_distance() {
                let child_record = child.current().clone();
                self.insert_result(&child_record, doc_id, distance);
            }
        }

        self.child = Some(child);
    }

    /// One batch merged against the filter, both walked by ascending doc id.
    fn alternating_iterate(&mut self, batch: &[(DocId, f64)]) -> IteratorStatus {
        let Some(mut child) = self.child.take() else {
            return IteratorStatus::Eof;
        };
        let status = self.alternate_with(&mut child, batch);
        self.child = Some(child);
        status
    }

    fn alternate_with(&mut self, child: &mut AnyIterator, batch: &[(DocId, f64)]) -> IteratorStatus {
        if child.last_doc_id() == 0 && !child.at_eof() {
            match child.read() {
                IteratorStatus::Ok => {}
                status => return status,
            }
        }

        let mut cursor = 0usize;
        loop {
            let Some(&(vec_id, distance)) = batch.get(cursor) else {
                return IteratorStatus::Ok;
            };
            let child_id = child.last_doc_id();

            if vec_id == child_id {
                if self.heap.len() < self.k || distance < self.worst_distance() {
                    let child_record = child.current().clone();
                    self.insert_result(&child_record, vec_id, distance);
                }
                cursor += 1;
                match child.read() {
                    IteratorStatus::Ok => {}
                    status => return status,
                }
            } else if vec_id > child_id {
                if child.at_eof() {
                    // the filter ran dry; nothing further can match
                    return IteratorStatus::Eof;
                }
                match child.skip_to(vec_id) {
                    IteratorStatus::Ok | IteratorStatus::NotFound => {}
                    status => return status,
                }
            } else {
                cursor += 1;
            }
        }
    }

    /// Batches mode main loop; may switch to ad-hoc brute force between
    /// batches.
    fn run_batches(&mut self) {
        let child_estimate = self.child.as_ref().map_or(0, |c| c.num_estimated());
        if child_estimate == 0 {
            return;
        }

        let index_size = self.index.index_size();
        let mut child_num_estimated = child_estimate.min(index_size);
        let child_upper_bound = child_num_estimated;
        let mut batches = self.index.batch_iterator(&self.query_vector);

        while batches.has_next() {
            self.num_iterations += 1;
            let n_res_left = self.k.saturating_sub(self.heap.len());

            let batch_size = self.fixed_batch_size.unwrap_or_else(|| {
                n_res_left
                    .saturating_mul(index_size)
                    .checked_div(child_num_estimated)
                    .unwrap_or(0)
                    + 1
            });

            let batch = batches.next_batch(batch_size);
            if self.deadline.is_expired() {
                self.timed_out = true;
                return;
            }

            if let Some(child) = self.child.as_mut() {
                child.rewind();
            }
            if self.alternating_iterate(&batch) == IteratorStatus::TimedOut {
                self.timed_out = true;
                return;
            }

            if self.heap.len() == self.k {
                return;
            }
            if self.review_policy(n_res_left, child_upper_bound, &mut child_num_estimated) {
                return;
            }
        }
    }

    /// Re-estimates the filter's density from the batch that just ran and
    /// decides whether to abandon batched probing.
    fn review_policy(
        &mut self,
        n_res_left: usize,
        child_upper_bound: usize,
        child_num_estimated: &mut usize,
    ) -> bool {
        // a user-pinned fixed batch size means: keep batching, no questions
        if self.mode_pinned && self.mode == SearchMode::Batches && self.fixed_batch_size.is_some()
        {
            return false;
        }

        let new_results = self.heap.len().saturating_sub(self.k - n_res_left);
        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let current_estimate = if n_res_left == 0 {
            *child_num_estimated
        } else {
            #[allow(clippy::cast_possible_truncation)]
            {
                ((new_results as f64 / n_res_left as f64) * self.index.index_size() as f64) as usize
            }
        };

        *child_num_estimated = ((*child_num_estimated + current_estimate) / 2).min(child_upper_bound);

        if self.mode_pinned && self.mode == SearchMode::Batches {
            return false;
        }

        if self
            .index
            .prefer_ad_hoc_search(*child_num_estimated, self.k, false)
        {
            log::debug!(
                "hybrid policy switch to ad-hoc after {} batches (estimate {})",
                self.num_iterations,
                child_num_estimated
            );
            self.mode = SearchMode::BatchesToAdHoc;
            while self.heap.pop_min().is_some() {}
            if let Some(child) = self.child.as_mut() {
                child.rewind();
            }
            self.compute_distances();
            return true;
        }
        false
    }

    fn prepare(&mut self) {
        match self.mode {
            SearchMode::StandardKnn => {
                self.knn_list = self
                    .index
                    .top_k(&self.query_vector, self.k, &self.deadline);
                self.knn_pos = 0;
            }
            SearchMode::AdHocBruteForce | SearchMode::BatchesToAdHoc => self.compute_distances(),
            SearchMode::Batches => self.run_batches(),
        }
    }
}

impl QueryIterator for HybridIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        if !self.prepared {
            self.prepare();
            self.prepared = true;
            if self.timed_out {
                self.at_end = true;
                return IteratorStatus::TimedOut;
            }
        }

        if self.mode == SearchMode::StandardKnn {
            let Some(&(doc_id, distance)) = self.knn_list.get(self.knn_pos) else {
                self.at_end = true;
                return IteratorStatus::Eof;
            };
            self.knn_pos += 1;

            self.current.doc_id = doc_id;
            self.current.data = RecordData::Metric(distance);
            self.current.metrics.clear();
            if let Some(key) = &self.score_field {
                self.current.metrics.push((key.clone(), distance));
            }
            self.last_id = doc_id;
            return IteratorStatus::Ok;
        }

        // hybrid modes drain the heap worst-first
        let Some(hit) = self.heap.pop_max() else {
            self.at_end = true;
            return IteratorStatus::Eof;
        };
        self.last_id = hit.doc_id;
        self.current = hit.record;
        IteratorStatus::Ok
    }

    /// Results are score-ordered, so id-order skipping degenerates to a
    /// scan: reads until the requested doc id shows up or the results run
    /// out. Callers wanting an id-ordered view intersect with the filter
    /// instead.
    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        loop {
            match self.read() {
                IteratorStatus::Ok => {
                    if self.last_id == doc_id {
                        return IteratorStatus::Ok;
                    }
                }
                status => return status,
            }
        }
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        self.last_id
    }

    fn num_estimated(&self) -> usize {
        let vec_results = self.k.min(self.index.index_size());
        self.child
            .as_ref()
            .map_or(vec_results, |child| vec_results.min(child.num_estimated()))
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.prepared = false;
        self.timed_out = false;
        self.at_end = false;
        self.last_id = 0;
        self.knn_list.clear();
        self.knn_pos = 0;
        self.num_iterations = 0;
        while self.heap.pop_min().is_some() {}
        if self.mode == SearchMode::BatchesToAdHoc && !self.mode_pinned {
            self.mode = SearchMode::Batches;
        }
        if let Some(child) = self.child.as_mut() {
            child.rewind();
        }
    }

    fn abort(&mut self) {
        self.at_end = true;
        if let Some(child) = self.child.as_mut() {
            child.abort();
        }
    }

    fn revalidate(&mut self) -> Revalidate {
        self.child
            .as_mut()
            .map_or(Revalidate::Ok, |child| child.revalidate())
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Hybrid
    }
}
