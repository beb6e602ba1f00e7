// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The iterator algebra: composable stepwise cursors over posting lists.
//!
//! Every iterator, from the readers at the leaves to the Boolean composers
//! above them, follows the same contract:
//!
//! - `read` produces the next record in ascending doc-id order
//! - `skip_to(t)`, with `t` greater than the last doc id, lands exactly on
//!   `t` ([`IteratorStatus::Ok`]) or on the first hit beyond it
//!   ([`IteratorStatus::NotFound`])
//! - `current` borrows the record of the last yield; it is only valid until
//!   the next `read`/`skip_to`
//! - `revalidate` reconciles with structural changes under the cursor after
//!   the query was suspended
//!
//! Trees are built by the planner through the `new_*` constructors, which
//! fuse trivial cases (empty children, single-child composers, redundant
//! wildcards) instead of building degenerate nodes.

pub(crate) mod empty;
pub(crate) mod id_list;
pub(crate) mod intersection;
pub(crate) mod metric;
pub(crate) mod negation;
pub(crate) mod optional;
pub(crate) mod profile;
pub(crate) mod union;
pub(crate) mod wildcard;

pub use empty::EmptyIterator;
pub use id_list::IdListIterator;
pub use intersection::IntersectionIterator;
pub use metric::MetricIterator;
pub use negation::NotIterator;
pub use optional::OptionalIterator;
pub use profile::{add_profilers, ProfileIterator, ProfileStats};
pub use union::{UnionIterator, UnionOrigin};
pub use wildcard::WildcardIterator;

use crate::config::Config;
use crate::hybrid::HybridIterator;
use crate::index::{DecoderCtx, IndexReader, SharedInvertedIndex, ValueFilter};
use crate::record::{DocId, FieldMask, IndexRecord, MetricKey, Term};
use crate::time::Deadline;
use enum_dispatch::enum_dispatch;
use std::sync::Arc;

/// Outcome of a `read` or `skip_to` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorStatus {
    /// A record was produced (for `skip_to`: exactly the requested doc id).
    Ok,
    /// `skip_to` landed on a doc id greater than the requested one.
    NotFound,
    /// The cursor is exhausted.
    Eof,
    /// The query deadline was crossed; the cursor is exhausted.
    TimedOut,
}

/// Outcome of a `revalidate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidate {
    /// The cursor is still positioned on a valid result.
    Ok,
    /// The cursor moved; the previous current record is no longer valid.
    Moved,
    /// The underlying structure is gone; the tree must be torn down.
    Aborted,
}

impl Revalidate {
    /// The more severe of two outcomes.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Aborted, _) | (_, Self::Aborted) => Self::Aborted,
            (Self::Moved, _) | (_, Self::Moved) => Self::Moved,
            _ => Self::Ok,
        }
    }
}

/// Discriminates the concrete iterator behind the common contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    /// Posting-list reader.
    Reader,
    /// Union composer.
    Union,
    /// Intersection composer.
    Intersection,
    /// NOT composer.
    Not,
    /// OPTIONAL composer.
    Optional,
    /// Wildcard (all-docs) iterator.
    Wildcard,
    /// Pre-materialized doc-id list.
    IdList,
    /// Doc-id list carrying metric values.
    Metric,
    /// The empty iterator.
    Empty,
    /// Transparent profiling wrapper.
    Profile,
    /// Hybrid vector iterator.
    Hybrid,
}

/// The stepwise cursor contract shared by all iterators.
#[enum_dispatch]
pub trait QueryIterator {
    /// Produces the next record in ascending doc-id order.
    fn read(&mut self) -> IteratorStatus;

    /// Skips to the first record with doc id at or beyond `doc_id`.
    ///
    /// The target must be greater than [`Self::last_doc_id`].
    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus;

    /// The record of the last yield.
    fn current(&self) -> &IndexRecord;

    /// Doc id of the last yield.
    fn last_doc_id(&self) -> DocId;

    /// Upper bound on the number of records this iterator can yield.
    fn num_estimated(&self) -> usize;

    /// Returns `true` if the cursor is exhausted.
    fn at_eof(&self) -> bool;

    /// Resets the cursor to its initial state.
    fn rewind(&mut self);

    /// Exhausts the cursor.
    fn abort(&mut self);

    /// Reconciles with structural changes under the cursor.
    fn revalidate(&mut self) -> Revalidate;

    /// The concrete iterator kind.
    fn kind(&self) -> IteratorKind;
}

/// Any iterator of the algebra; the planner composes trees out of these.
#[enum_dispatch(QueryIterator)]
#[allow(clippy::large_enum_variant)]
pub enum AnyIterator {
    /// Posting-list reader.
    Reader(IndexReader),
    /// Union composer.
    Union(UnionIterator),
    /// Intersection composer.
    Intersection(IntersectionIterator),
    /// NOT composer.
    Not(NotIterator),
    /// OPTIONAL composer.
    Optional(OptionalIterator),
    /// Wildcard iterator.
    Wildcard(WildcardIterator),
    /// Doc-id list.
    IdList(IdListIterator),
    /// Metric-carrying doc-id list.
    Metric(MetricIterator),
    /// Empty iterator.
    Empty(EmptyIterator),
    /// Profiling wrapper.
    Profile(ProfileIterator),
    /// Hybrid vector iterator.
    Hybrid(HybridIterator),
}

impl QueryIterator for IndexReader {
    fn read(&mut self) -> IteratorStatus {
        Self::read(self)
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        Self::skip_to(self, doc_id)
    }

    fn current(&self) -> &IndexRecord {
        Self::current(self)
    }

    fn last_doc_id(&self) -> DocId {
        Self::last_doc_id(self)
    }

    fn num_estimated(&self) -> usize {
        Self::num_estimated(self)
    }

    fn at_eof(&self) -> bool {
        Self::at_eof(self)
    }

    fn rewind(&mut self) {
        Self::rewind(self);
    }

    fn abort(&mut self) {
        Self::abort(self);
    }

    fn revalidate(&mut self) -> Revalidate {
        Self::revalidate(self)
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Reader
    }
}

/// Reader over a term index with a field-mask predicate.
#[must_use]
pub fn new_reader(idx: SharedInvertedIndex, field_mask: FieldMask, weight: f64) -> AnyIterator {
    AnyIterator::Reader(IndexReader::for_term(idx, field_mask, None, weight))
}

/// Reader over a term index, carrying the query term for downstream scoring.
#[must_use]
pub fn new_term_reader(
    idx: SharedInvertedIndex,
    field_mask: FieldMask,
    term: Arc<Term>,
    weight: f64,
) -> AnyIterator {
    AnyIterator::Reader(IndexReader::for_term(idx, field_mask, Some(term), weight))
}

/// Reader over a numeric index with an optional range/geo predicate.
#[must_use]
pub fn new_numeric_reader(
    idx: SharedInvertedIndex,
    filter: Option<ValueFilter>,
    skip_multi: bool,
) -> AnyIterator {
    AnyIterator::Reader(IndexReader::for_numeric(idx, filter, skip_multi))
}

/// Reader with an explicit decoding context.
#[must_use]
pub fn new_generic_reader(
    idx: SharedInvertedIndex,
    ctx: DecoderCtx,
    record: IndexRecord,
    weight: f64,
) -> AnyIterator {
    AnyIterator::Reader(IndexReader::new(idx, ctx, false, record, weight))
}

/// Union of `children`, reduced where possible.
#[must_use]
pub fn new_union(
    children: Vec<AnyIterator>,
    quick_exit: bool,
    weight: f64,
    origin: UnionOrigin,
    source: Option<String>,
    config: &Config,
) -> AnyIterator {
    let mut children: Vec<AnyIterator> = children
        .into_iter()
        .filter(|child| child.kind() != IteratorKind::Empty)
        .collect();

    match children.len() {
        0 => new_empty(),
        1 => children.pop().map_or_else(new_empty, |only| only),
        _ => AnyIterator::Union(UnionIterator::new(
            children, quick_exit, weight, origin, source, config,
        )),
    }
}

/// Intersection of `children`, reduced where possible: any empty child
/// empties the whole intersection, wildcard children are dropped, and a
/// single surviving child replaces the node.
#[must_use]
pub fn new_intersection(
    children: Vec<AnyIterator>,
    max_slop: i32,
    in_order: bool,
    weight: f64,
) -> AnyIterator {
    new_intersection_with_config(children, max_slop, in_order, weight, &Config::default())
}

/// [`new_intersection`] with explicit child-ordering configuration.
#[must_use]
pub fn new_intersection_with_config(
    children: Vec<AnyIterator>,
    max_slop: i32,
    in_order: bool,
    weight: f64,
    config: &Config,
) -> AnyIterator {
    if children
        .iter()
        .any(|child| child.kind() == IteratorKind::Empty)
    {
        return new_empty();
    }

    let positional = max_slop >= 0 || in_order;
    let (mut wildcards, mut rest): (Vec<AnyIterator>, Vec<AnyIterator>) = children
        .into_iter()
        .partition(|child| child.kind() == IteratorKind::Wildcard);

    if rest.is_empty() {
        // an intersection of wildcards is just one of them
        return wildcards.pop().map_or_else(new_empty, |wc| wc);
    }

    if rest.len() == 1 && !positional {
        if let Some(only) = rest.pop() {
            return only;
        }
    }

    AnyIterator::Intersection(IntersectionIterator::new(
        rest, max_slop, in_order, weight, config,
    ))
}

/// NOT over `child` within `[1, max_doc_id]`. When `existing_docs` is given
/// (indexes tracking all documents), the candidate universe is taken from it
/// instead of the dense range.
#[must_use]
pub fn new_not(
    child: Option<AnyIterator>,
    max_doc_id: DocId,
    weight: f64,
    deadline: Deadline,
    existing_docs: Option<AnyIterator>,
) -> AnyIterator {
    AnyIterator::Not(NotIterator::new(
        child.unwrap_or_else(new_empty),
        max_doc_id,
        weight,
        deadline,
        existing_docs,
    ))
}

/// OPTIONAL over `child` within `[1, max_doc_id]`.
#[must_use]
pub fn new_optional(
    child: Option<AnyIterator>,
    max_doc_id: DocId,
    weight: f64,
    existing_docs: Option<AnyIterator>,
) -> AnyIterator {
    AnyIterator::Optional(OptionalIterator::new(
        child.unwrap_or_else(new_empty),
        max_doc_id,
        weight,
        existing_docs,
    ))
}

/// Wildcard over the dense range `[1, top_id]`.
#[must_use]
pub fn new_wildcard(top_id: DocId, num_docs: usize) -> AnyIterator {
    AnyIterator::Wildcard(WildcardIterator::dense(top_id, num_docs))
}

/// Wildcard backed by an "existing docs" posting list.
#[must_use]
pub fn new_wildcard_reader(existing_docs: SharedInvertedIndex) -> AnyIterator {
    AnyIterator::Wildcard(WildcardIterator::over_existing(existing_docs))
}

/// Iterator over a pre-materialized doc-id list (sorted and deduplicated
/// internally).
#[must_use]
pub fn new_id_list(doc_ids: Vec<DocId>, weight: f64) -> AnyIterator {
    if doc_ids.is_empty() {
        return new_empty();
    }
    AnyIterator::IdList(IdListIterator::new(doc_ids, weight))
}

/// Iterator over parallel `(doc_id, metric)` arrays, attaching the metric to
/// every yield under `key`.
#[must_use]
pub fn new_metric(
    doc_ids: Vec<DocId>,
    metrics: Vec<f64>,
    key: Option<MetricKey>,
    yields_metric: bool,
) -> AnyIterator {
    AnyIterator::Metric(MetricIterator::new(doc_ids, metrics, key, yields_metric))
}

/// The empty iterator.
#[must_use]
pub fn new_empty() -> AnyIterator {
    AnyIterator::Empty(EmptyIterator::new())
}
