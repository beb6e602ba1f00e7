// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The posting record yielded by readers and composed by the iterator
//! algebra.
//!
//! A record is a tagged union: term hits carry an offset vector, numeric hits
//! carry their value, composers build aggregates owning deep copies of their
//! children's current records. A record is only valid until the next
//! `read`/`skip_to` on the iterator that produced it; aggregation therefore
//! clones, never borrows.

use crate::slice::Slice;
use crate::varint::VarintVectorReader;
use std::sync::Arc;

/// Document identifier. Monotonically assigned, never reused within an index
/// lifetime. `0` is reserved as a sentinel.
pub type DocId = u64;

/// One bit per indexed text field.
pub type FieldMask = u128;

/// Matches every field.
pub const FIELD_MASK_ALL: FieldMask = FieldMask::MAX;

/// Index of a field inside the schema.
pub type FieldIndex = u16;

/// Key under which a metric value is attached to a record.
pub type MetricKey = Arc<str>;

/// Metric values contributed by metric iterators (e.g. a vector distance).
pub type Metrics = Vec<(MetricKey, f64)>;

/// A query term as known to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// The term bytes.
    pub text: Slice,
}

impl Term {
    /// Creates a term from its bytes.
    #[must_use]
    pub fn new(text: impl Into<Slice>) -> Self {
        Self { text: text.into() }
    }
}

/// Byte-packed list of ascending token positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetVector(
    /// The delta-varint payload.
    pub Vec<u8>,
);

impl OffsetVector {
    /// Number of encoded bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no positions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the absolute positions.
    #[must_use]
    pub fn iter(&self) -> VarintVectorReader<'_> {
        VarintVectorReader::new(&self.0)
    }
}

/// Aggregate flavor, mirroring the composer that built it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    /// Built by a union iterator.
    Union,
    /// Built by an intersection iterator.
    Intersection,
    /// Built by the hybrid vector iterator (distance + filter subtree).
    Hybrid,
}

/// Payload of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    /// A term posting: the originating query term plus its offset vector.
    Term {
        /// The query term this posting belongs to, if known.
        term: Option<Arc<Term>>,
        /// Token positions of the hit.
        offsets: OffsetVector,
    },

    /// A numeric posting.
    Numeric(f64),

    /// A synthetic hit with no posting behind it (NOT / OPTIONAL misses,
    /// wildcard enumeration).
    Virtual,

    /// A metric-only hit (vector distance).
    Metric(f64),

    /// An ordered list of child records agreeing on the same doc id.
    Aggregate {
        /// Which composer produced this aggregate.
        kind: AggregateKind,
        /// Deep copies of the matching children's current records.
        children: Vec<IndexRecord>,
    },
}

/// A single query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// The document this hit belongs to.
    pub doc_id: DocId,
    /// Term frequency (or 1 where frequencies are not stored).
    pub freq: u32,
    /// Fields the hit occurred in.
    pub field_mask: FieldMask,
    /// Query weight attached by the planner.
    pub weight: f64,
    /// Typed payload.
    pub data: RecordData,
    /// Metric values attached along the way.
    pub metrics: Metrics,
}

impl IndexRecord {
    /// A term record owned by a reader, reused across yields.
    #[must_use]
    pub fn term(term: Option<Arc<Term>>, weight: f64) -> Self {
        Self {
            doc_id: 0,
            freq: 1,
            field_mask: FIELD_MASK_ALL,
            weight,
            data: RecordData::Term {
                term,
                offsets: OffsetVector::default(),
            },
            metrics: Metrics::new(),
        }
    }

    /// A numeric record.
    #[must_use]
    pub fn numeric() -> Self {
        Self {
            doc_id: 0,
            freq: 1,
            field_mask: FIELD_MASK_ALL,
            weight: 1.0,
            data: RecordData::Numeric(0.0),
            metrics: Metrics::new(),
        }
    }

    /// A virtual record (weight-carrying placeholder).
    #[must_use]
    pub fn virt(weight: f64, field_mask: FieldMask) -> Self {
        Self {
            doc_id: 0,
            freq: 1,
            field_mask,
            weight,
            data: RecordData::Virtual,
            metrics: Metrics::new(),
        }
    }

    /// A metric record.
    #[must_use]
    pub fn metric() -> Self {
        Self {
            doc_id: 0,
            freq: 1,
            field_mask: FIELD_MASK_ALL,
            weight: 1.0,
            data: RecordData::Metric(0.0),
            metrics: Metrics::new(),
        }
    }

    /// An empty aggregate of the given flavor.
    #[must_use]
    pub fn aggregate(kind: AggregateKind, capacity: usize, weight: f64) -> Self {
        Self {
            doc_id: 0,
            freq: 0,
            field_mask: 0,
            weight,
            data: RecordData::Aggregate {
                kind,
                children: Vec::with_capacity(capacity),
            },
            metrics: Metrics::new(),
        }
    }

    /// Numeric or metric value carried by this record, if any.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match &self.data {
            RecordData::Numeric(v) | RecordData::Metric(v) => Some(*v),
            _ => None,
        }
    }

    /// The offset vector of a term record.
    #[must_use]
    pub fn offsets(&self) -> Option<&OffsetVector> {
        match &self.data {
            RecordData::Term { offsets, .. } => Some(offsets),
            _ => None,
        }
    }

    /// Child records of an aggregate.
    #[must_use]
    pub fn children(&self) -> &[IndexRecord] {
        match &self.data {
            RecordData::Aggregate { children, .. } => children,
            _ => &[],
        }
    }

    /// Clears an aggregate for the next yield, keeping its allocation.
    pub fn reset_aggregate(&mut self) {
        if let RecordData::Aggregate { children, .. } = &mut self.data {
            children.clear();
        }
        self.freq = 0;
        self.field_mask = 0;
        self.metrics.clear();
    }

    /// Adds a deep copy of `child` to an aggregate, accumulating frequency
    /// and field mask and adopting the child's doc id.
    pub fn push_child(&mut self, child: &IndexRecord) {
        self.doc_id = child.doc_id;
        self.freq += child.freq;
        self.field_mask |= child.field_mask;
        if let RecordData::Aggregate { children, .. } = &mut self.data {
            children.push(child.clone());
        }
    }

    /// Attaches a metric value.
    pub fn add_metric(&mut self, key: MetricKey, value: f64) {
        self.metrics.push((key, value));
    }

    /// Appends another record's metrics to this record.
    pub fn concat_metrics(&mut self, other: &IndexRecord) {
        self.metrics.extend(other.metrics.iter().cloned());
    }

    /// Collects the offset vectors of the term hits in an aggregate, in
    /// child order. Non-positional children (numeric, virtual) contribute
    /// nothing.
    fn leaf_offsets<'a>(&'a self, out: &mut Vec<&'a OffsetVector>) {
        match &self.data {
            RecordData::Term { offsets, .. } => {
                if !offsets.is_empty() {
                    out.push(offsets);
                }
            }
            RecordData::Aggregate { children, .. } => {
                for child in children {
                    child.leaf_offsets(out);
                }
            }
            _ => {}
        }
    }

    /// Positional predicate for intersections: is there a selection of one
    /// offset per positional child whose span fits `max_slop`, optionally
    /// requiring the offsets to be strictly increasing in child order?
    ///
    /// Span is measured as `max - min - (n - 1)`, i.e. the number of
    /// positions foreign tokens could occupy between the chosen ones.
    #[must_use]
    pub fn is_within_range(&self, max_slop: u32, in_order: bool) -> bool {
        let mut vectors = Vec::new();
        self.leaf_offsets(&mut vectors);
        if vectors.len() < 2 {
            return true;
        }

        if in_order {
            offsets_within_range_in_order(&vectors, max_slop)
        } else {
            offsets_within_range_unordered(&vectors, max_slop)
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn span(min: u32, max: u32, n: usize) -> u32 {
    (max - min).saturating_sub(n as u32 - 1)
}

fn offsets_within_range_in_order(vectors: &[&OffsetVector], max_slop: u32) -> bool {
    let mut iters: Vec<VarintVectorReader<'_>> = vectors.iter().map(|v| v.iter()).collect();
    let mut current: Vec<u32> = Vec::with_capacity(iters.len());
    for it in &mut iters {
        match it.next() {
            Some(offset) => current.push(offset),
            None => return false,
        }
    }

    loop {
        // make the chain strictly increasing, left to right
        let mut exhausted = false;
        for i in 1..current.len() {
            // NOTE: indexes are in range by construction
            #[allow(clippy::indexing_slicing)]
            while current[i] <= current[i - 1] {
                match iters[i].next() {
                    Some(offset) => current[i] = offset,
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if exhausted {
                return false;
            }
        }

        let first = current.first().copied().unwrap_or_default();
        let last = current.last().copied().unwrap_or_default();
        if span(first, last, current.len()) <= max_slop {
            return true;
        }

        // tighten the window from the left
        match iters.first_mut().and_then(Iterator::next) {
            Some(offset) => {
                if let Some(slot) = current.first_mut() {
                    *slot = offset;
                }
            }
            None => return false,
        }
    }
}

fn offsets_within_range_unordered(vectors: &[&OffsetVector], max_slop: u32) -> bool {
    let mut iters: Vec<VarintVectorReader<'_>> = vectors.iter().map(|v| v.iter()).collect();
    let mut current: Vec<u32> = Vec::with_capacity(iters.len());
    for it in &mut iters {
        match it.next() {
            Some(offset) => current.push(offset),
            None => return false,
        }
    }

    loop {
        let min = current.iter().copied().min().unwrap_or_default();
        let max = current.iter().copied().max().unwrap_or_default();
        if span(min, max, current.len()) <= max_slop {
            return true;
        }

        // advance the leftmost member of the window
        let min_idx = current
            .iter()
            .enumerate()
            .min_by_key(|(_, &offset)| offset)
            .map_or(0, |(i, _)| i);

        match iters.get_mut(min_idx).and_then(Iterator::next) {
            Some(offset) => {
                if let Some(slot) = current.get_mut(min_idx) {
                    *slot = offset;
                }
            }
            None => return false,
        }
    }
}
