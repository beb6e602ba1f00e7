// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Union of N child iterators.
//!
//! Two representations share the same semantics: a flat child array scanned
//! linearly (cheap for a handful of children) and a min-heap keyed by each
//! child's current doc id, used above `Config::min_union_iterator_heap`
//! children so each step costs `log N` instead of `N`.
//!
//! Two behavioral modes: *full* aggregates every child sitting on the
//! yielded doc id into the result; *quick* stops at the first one, for
//! callers that only need the doc id.

use super::{AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::config::Config;
use crate::record::{AggregateKind, DocId, IndexRecord};
use crate::time::{Deadline, TimeoutCounter};
use interval_heap::IntervalHeap;

/// What kind of query node expanded into this union; carried for profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnionOrigin {
    /// A plain OR node.
    #[default]
    Union,
    /// A tag field lookup.
    Tag,
    /// A numeric range split over index partitions.
    Numeric,
    /// A geo query.
    Geo,
    /// A prefix expansion.
    Prefix,
    /// A fuzzy expansion.
    Fuzzy,
    /// A lexicographic range expansion.
    Lexrange,
    /// A wildcard-pattern expansion.
    WildcardQuery,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    doc_id: DocId,
    idx: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.doc_id, self.idx).cmp(&(other.doc_id, other.idx))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Union iterator; see the module docs.
pub struct UnionIterator {
    pub(crate) children: Vec<AnyIterator>,
    active: Vec<usize>,
    current: IndexRecord,
    last_id: DocId,
    at_end: bool,
    quick_exit: bool,
    num_expected: usize,
    origin: UnionOrigin,
    source: Option<String>,
    use_heap: bool,
    heap: IntervalHeap<HeapEntry>,
    timeout: TimeoutCounter,
    round_robin: Option<usize>,
}

impl UnionIterator {
    pub(crate) fn new(
        children: Vec<AnyIterator>,
        quick_exit: bool,
        weight: f64,
        origin: UnionOrigin,
        source: Option<String>,
        config: &Config,
    ) -> Self {
        let num_expected = children.iter().map(QueryIterator::num_estimated).sum();
        let use_heap = children.len() > config.min_union_iterator_heap;

        let mut union = Self {
            active: (0..children.len()).collect(),
            current: IndexRecord::aggregate(AggregateKind::Union, children.len(), weight),
            last_id: 0,
            at_end: false,
            quick_exit,
            num_expected,
            origin,
            source,
            use_heap,
            heap: IntervalHeap::with_capacity(children.len()),
            timeout: TimeoutCounter::new(Deadline::none()),
            round_robin: None,
            children,
        };
        union.reset_heap();
        union
    }

    /// Attaches a query deadline, checked at coarse granularity inside the
    /// heap loop.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.timeout = TimeoutCounter::new(deadline);
        self
    }

    /// What the planner expanded into this union.
    #[must_use]
    pub fn origin(&self) -> UnionOrigin {
        self.origin
    }

    /// The original query string of a prefix/fuzzy/wildcard expansion.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Number of child iterators.
    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    fn reset_heap(&mut self) {
        while self.heap.pop_min().is_some() {}
        if self.use_heap {
            for &idx in &self.active {
                self.heap.push(HeapEntry { doc_id: 0, idx });
            }
        }
    }

    /// Restores the active child list after the tree was rewritten around
    /// the children (profiling interposers).
    pub(crate) fn resync(&mut self) {
        self.active = (0..self.children.len()).collect();
        self.reset_heap();
    }

    /// Caps the number of children consulted once at most `offset + limit`
    /// results are needed, and switches to unsorted round-robin reads.
    /// Applicable when downstream neither sorts nor intersects.
    pub fn trim(&mut self, offset: usize, limit: usize, ascending: bool) {
        if self.children.len() <= 2 {
            return;
        }

        if offset == 0 {
            let mut total = 0usize;
            if ascending {
                let mut keep = self.active.len();
                for (i, &idx) in self.active.iter().enumerate().skip(1) {
                    total += self.children.get(idx).map_or(0, QueryIterator::num_estimated);
                    if total > limit {
                        keep = i + 1;
                        break;
                    }
                }
                self.active.truncate(keep);
            } else {
                let mut cut = 0usize;
                for i in (1..self.active.len().saturating_sub(1)).rev() {
                    let idx = self.active.get(i).copied().unwrap_or_default();
                    total += self.children.get(idx).map_or(0, QueryIterator::num_estimated);
                    if total > limit {
                        cut = i;
                        break;
                    }
                }
                self.active.drain(..cut);
            }
        } else {
            self.active = (0..self.children.len()).collect();
        }

        self.round_robin = Some(0);
    }

    fn set_eof(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }

    /// Advances every active child sitting below `target`, dropping
    /// exhausted ones, and records the new minimum as the union position.
    fn advance_lagging(&mut self, target: DocId, use_skip: bool) -> IteratorStatus {
        let mut min = DocId::MAX;
        let mut i = 0;
        while i < self.active.len() {
            let idx = self.active.get(i).copied().unwrap_or_default();
            let Some(child) = self.children.get_mut(idx) else {
                i += 1;
                continue;
            };

            if child.last_doc_id() < target {
                let status = if use_skip {
                    child.skip_to(target)
                } else {
                    child.read()
                };
                match status {
                    IteratorStatus::Eof => {
                        self.active.remove(i);
                        continue;
                    }
                    IteratorStatus::TimedOut => return IteratorStatus::TimedOut,
                    IteratorStatus::Ok | IteratorStatus::NotFound => {}
                }
            }

            min = min.min(child.last_doc_id());
            i += 1;
        }

        if self.active.is_empty() {
            return self.set_eof();
        }
        self.last_id = min;
        IteratorStatus::Ok
    }

    /// Builds the aggregate out of every child (or the first, on quick exit)
    /// sitting on the union's current doc id.
    fn collect_flat(&mut self) {
        self.current.reset_aggregate();
        for &idx in &self.active {
            let Some(child) = self.children.get(idx) else {
                continue;
            };
            if child.last_doc_id() == self.last_id {
                self.current.push_child(child.current());
                if self.quick_exit {
                    break;
                }
            }
        }
        self.current.doc_id = self.last_id;
    }

    fn read_flat(&mut self) -> IteratorStatus {
        let next = self.last_id + 1;
        match self.advance_lagging(next, false) {
            IteratorStatus::Ok => {}
            status => return status,
        }
        self.collect_flat();
        IteratorStatus::Ok
    }

    fn skip_flat(&mut self, target: DocId) -> IteratorStatus {
        match self.advance_lagging(target, true) {
            IteratorStatus::Ok => {}
            status => return status,
        }
        self.collect_flat();
        if self.last_id == target {
            IteratorStatus::Ok
        } else {
            IteratorStatus::NotFound
        }
    }

    /// Pops and re-inserts heap entries until the root sits at or beyond
    /// `target`.
    fn advance_heap(&mut self, target: DocId) -> IteratorStatus {
        loop {
            let Some(&root) = self.heap.min() else {
                return self.set_eof();
            };
            if root.doc_id >= target {
                return IteratorStatus::Ok;
            }

            let Some(entry) = self.heap.pop_min() else {
                return self.set_eof();
            };
            let Some(child) = self.children.get_mut(entry.idx) else {
                continue;
            };
            match child.skip_to(target) {
                IteratorStatus::Eof => {} // exhausted child leaves the heap
                IteratorStatus::TimedOut => {
                    self.at_end = true;
                    return IteratorStatus::TimedOut;
                }
                IteratorStatus::Ok | IteratorStatus::NotFound => {
                    let doc_id = child.last_doc_id();
                    self.heap.push(HeapEntry {
                        doc_id,
                        idx: entry.idx,
                    });
                }
            }

            if self.timeout.tick() {
                self.at_end = true;
                return IteratorStatus::TimedOut;
            }
        }
    }

    fn collect_heap(&mut self) {
        self.current.reset_aggregate();
        let doc_id = self.last_id;

        if self.quick_exit {
            if let Some(&root) = self.heap.min() {
                if let Some(child) = self.children.get(root.idx) {
                    self.current.push_child(child.current());
                }
            }
        } else {
            let mut stash = Vec::new();
            while let Some(&root) = self.heap.min() {
                if root.doc_id != doc_id {
                    break;
                }
                let Some(entry) = self.heap.pop_min() else {
                    break;
                };
                if let Some(child) = self.children.get(entry.idx) {
                    self.current.push_child(child.current());
                }
                stash.push(entry);
            }
            for entry in stash {
                self.heap.push(entry);
            }
        }
        self.current.doc_id = doc_id;
    }

    fn step_heap(&mut self, target: DocId, exact_wanted: bool) -> IteratorStatus {
        match self.advance_heap(target) {
            IteratorStatus::Ok => {}
            status => return status,
        }
        let Some(&root) = self.heap.min() else {
            return self.set_eof();
        };
        self.last_id = root.doc_id;
        self.collect_heap();

        if !exact_wanted || self.last_id == target {
            IteratorStatus::Ok
        } else {
            IteratorStatus::NotFound
        }
    }

    /// Order-free reads after [`Self::trim`]: children are drained one after
    /// another.
    fn read_unsorted(&mut self) -> IteratorStatus {
        let mut cursor = self.round_robin.unwrap_or(0);
        while cursor < self.active.len() {
            let idx = self.active.get(cursor).copied().unwrap_or_default();
            let Some(child) = self.children.get_mut(idx) else {
                cursor += 1;
                continue;
            };
            match child.read() {
                IteratorStatus::Ok => {
                    self.last_id = child.last_doc_id();
                    self.current.reset_aggregate();
                    let Some(child) = self.children.get(idx) else {
                        continue;
                    };
                    self.current.push_child(child.current());
                    self.round_robin = Some(cursor);
                    return IteratorStatus::Ok;
                }
                IteratorStatus::TimedOut => return IteratorStatus::TimedOut,
                _ => cursor += 1,
            }
        }
        self.round_robin = Some(cursor);
        self.set_eof()
    }
}

impl QueryIterator for UnionIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end || self.active.is_empty() {
            return self.set_eof();
        }
        if self.round_robin.is_some() {
            return self.read_unsorted();
        }
        if self.use_heap {
            return self.step_heap(self.last_id + 1, false);
        }
        self.read_flat()
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end || self.active.is_empty() {
            return self.set_eof();
        }
        self.last_id = doc_id;
        if self.use_heap {
            return self.step_heap(doc_id, true);
        }
        self.skip_flat(doc_id)
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        self.last_id
    }

    fn num_estimated(&self) -> usize {
        self.num_expected
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.last_id = 0;
        self.current.reset_aggregate();
        self.current.doc_id = 0;
        self.active = (0..self.children.len()).collect();
        for child in &mut self.children {
            child.rewind();
        }
        self.reset_heap();
        self.timeout.reset();
    }

    fn abort(&mut self) {
        self.at_end = true;
        for child in &mut self.children {
            child.abort();
        }
    }

    fn revalidate(&mut self) -> Revalidate {
        let mut worst = Revalidate::Ok;
        for child in &mut self.children {
            worst = worst.worst(child.revalidate());
        }
        worst
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Union
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{drain, ids};
    use super::super::{new_union, AnyIterator, IteratorStatus, QueryIterator};
    use super::UnionOrigin;
    use crate::config::Config;
    use test_log::test;

    fn union_of(lists: &[&[u64]], config: &Config) -> AnyIterator {
        let children = lists.iter().map(|l| ids(l)).collect();
        new_union(children, false, 1.0, UnionOrigin::Union, None, config)
    }

    #[test]
    fn union_is_sorted_set_union() {
        let mut it = union_of(
            &[&[2, 4, 6, 8, 10], &[3, 6, 9], &[1, 10, 11]],
            &Config::default(),
        );
        assert_eq!(vec![1, 2, 3, 4, 6, 8, 9, 10, 11], drain(&mut it));
        assert_eq!(IteratorStatus::Eof, it.read());
    }

    #[test]
    fn union_aggregates_all_matching_children() {
        let mut it = union_of(&[&[5, 7], &[5, 9]], &Config::default());
        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(5, it.last_doc_id());
        assert_eq!(2, it.current().children().len());

        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(7, it.last_doc_id());
        assert_eq!(1, it.current().children().len());
    }

    #[test]
    fn union_quick_exit_takes_first() {
        let children = vec![ids(&[5, 7]), ids(&[5, 9])];
        let mut it = new_union(
            children,
            true,
            1.0,
            UnionOrigin::Union,
            None,
            &Config::default(),
        );
        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(1, it.current().children().len());
    }

    #[test]
    fn union_skip_to() {
        let mut it = union_of(&[&[2, 4, 6], &[3, 9]], &Config::default());
        assert_eq!(IteratorStatus::Ok, it.skip_to(4));
        assert_eq!(IteratorStatus::NotFound, it.skip_to(7));
        assert_eq!(9, it.last_doc_id());
        assert_eq!(IteratorStatus::Eof, it.skip_to(10));
    }

    #[test]
    fn union_heap_matches_flat() {
        let lists: Vec<Vec<u64>> = (0..8u64)
            .map(|i| (1..100).filter(|d| d % (i + 2) == 0).collect())
            .collect();
        let refs: Vec<&[u64]> = lists.iter().map(Vec::as_slice).collect();

        let flat = {
            let mut it = union_of(&refs, &Config::default().with_union_heap_threshold(100));
            drain(&mut it)
        };
        let heap = {
            let mut it = union_of(&refs, &Config::default().with_union_heap_threshold(4));
            drain(&mut it)
        };
        assert_eq!(flat, heap);
    }

    #[test]
    fn union_heap_skip_to() {
        let lists: Vec<Vec<u64>> = (0..6u64).map(|i| vec![i * 10 + 5, i * 10 + 105]).collect();
        let refs: Vec<&[u64]> = lists.iter().map(Vec::as_slice).collect();

        let mut it = union_of(&refs, &Config::default().with_union_heap_threshold(2));
        assert_eq!(IteratorStatus::Ok, it.skip_to(25));
        assert_eq!(25, it.last_doc_id());
        assert_eq!(IteratorStatus::NotFound, it.skip_to(26));
        assert_eq!(35, it.last_doc_id());
    }

    #[test]
    fn union_rewind() {
        let mut it = union_of(&[&[1, 3], &[2]], &Config::default());
        assert_eq!(vec![1, 2, 3], drain(&mut it));
        it.rewind();
        assert_eq!(vec![1, 2, 3], drain(&mut it));
    }

    #[test]
    fn union_reduces_trivially() {
        use super::super::IteratorKind;

        let single = new_union(
            vec![ids(&[1, 2])],
            false,
            1.0,
            UnionOrigin::Union,
            None,
            &Config::default(),
        );
        assert_eq!(IteratorKind::IdList, single.kind());

        let none = new_union(
            vec![],
            false,
            1.0,
            UnionOrigin::Union,
            None,
            &Config::default(),
        );
        assert_eq!(IteratorKind::Empty, none.kind());
    }
}
