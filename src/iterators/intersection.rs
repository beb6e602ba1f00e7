// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Intersection of N child iterators.
//!
//! The children chase each other towards a common doc id: the first child
//! proposes a candidate, every lagging child skips to it, and any overshoot
//! restarts the round at the higher id. Children are stepped cheapest-first
//! (by estimated cardinality) unless positional order matters.
//!
//! With a positional constraint (`max_slop` / `in_order`), agreeing on a doc
//! id is not enough: the children's offset vectors must admit a selection
//! within the slop window, or the candidate is discarded.

use super::{AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::config::Config;
use crate::record::{AggregateKind, DocId, IndexRecord};

/// Intersection iterator; see the module docs.
pub struct IntersectionIterator {
    pub(crate) children: Vec<AnyIterator>,
    current: IndexRecord,
    last_id: DocId,
    at_end: bool,
    max_slop: i32,
    in_order: bool,
    num_expected: usize,
}

fn sort_weight(child: &AnyIterator, config: &Config) -> usize {
    let estimate = child.num_estimated();
    match child {
        // an intersection filters its own children down, so its estimate
        // overshoots by roughly its fan-out
        AnyIterator::Intersection(it) => estimate / it.children.len().max(1),
        AnyIterator::Union(it) if config.prioritize_intersect_union_children => {
            estimate.saturating_mul(it.num_children())
        }
        _ => estimate,
    }
}

impl IntersectionIterator {
    pub(crate) fn new(
        mut children: Vec<AnyIterator>,
        max_slop: i32,
        in_order: bool,
        weight: f64,
        config: &Config,
    ) -> Self {
        let num_expected = children
            .iter()
            .map(QueryIterator::num_estimated)
            .min()
            .unwrap_or(0);

        // stepping the cheapest child first minimizes skip work; positional
        // predicates need the children in query order
        if !in_order && max_slop < 0 {
            children.sort_by_key(|child| sort_weight(child, config));
        }

        Self {
            current: IndexRecord::aggregate(AggregateKind::Intersection, children.len(), weight),
            last_id: 0,
            at_end: false,
            max_slop,
            in_order,
            num_expected,
            children,
        }
    }

    fn set_eof(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }

    /// Drives every child to `self.last_id`. `NotFound` raises the candidate
    /// and asks the caller to retry.
    fn agree_on_doc_id(&mut self) -> IteratorStatus {
        let target = self.last_id;
        for child in &mut self.children {
            if child.last_doc_id() >= target {
                continue;
            }
            match child.skip_to(target) {
                IteratorStatus::Ok => {}
                IteratorStatus::NotFound => {
                    self.last_id = child.last_doc_id();
                    return IteratorStatus::NotFound;
                }
                IteratorStatus::Eof => return self.set_eof(),
                IteratorStatus::TimedOut => return IteratorStatus::TimedOut,
            }
        }
        IteratorStatus::Ok
    }

    fn build_result(&mut self) {
        self.current.reset_aggregate();
        for child in &self.children {
            self.current.push_child(child.current());
        }
        self.current.doc_id = self.last_id;
    }

    fn result_is_relevant(&self) -> bool {
        if self.max_slop < 0 && !self.in_order {
            return true;
        }
        #[allow(clippy::cast_sign_loss)]
        let slop = if self.max_slop < 0 {
            u32::MAX
        } else {
            self.max_slop as u32
        };
        self.current.is_within_range(slop, self.in_order)
    }

    /// Advances past a positionally-rejected candidate by stepping the first
    /// child and restarting the chase from its new id.
    fn advance_leader(&mut self) -> IteratorStatus {
        let Some(leader) = self.children.first_mut() else {
            return self.set_eof();
        };
        match leader.read() {
            IteratorStatus::Ok => {
                self.last_id = leader.last_doc_id();
                IteratorStatus::Ok
            }
            IteratorStatus::Eof => self.set_eof(),
            status => status,
        }
    }

    fn read_internal(&mut self) -> IteratorStatus {
        loop {
            match self.agree_on_doc_id() {
                IteratorStatus::Ok => {}
                IteratorStatus::NotFound => continue,
                status => return status,
            }

            self.build_result();
            if self.result_is_relevant() {
                return IteratorStatus::Ok;
            }

            match self.advance_leader() {
                IteratorStatus::Ok => {}
                status => return status,
            }
        }
    }
}

impl QueryIterator for IntersectionIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        self.last_id += 1;
        self.read_internal()
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        self.last_id = doc_id;

        match self.agree_on_doc_id() {
            IteratorStatus::Ok => {
                self.build_result();
                if self.result_is_relevant() {
                    return IteratorStatus::Ok;
                }
                match self.advance_leader() {
                    IteratorStatus::Ok => {}
                    status => return status,
                }
            }
            IteratorStatus::NotFound => {}
            status => return status,
        }

        // the exact target is gone; surface the next agreement instead
        match self.read_internal() {
            IteratorStatus::Ok => IteratorStatus::NotFound,
            status => status,
        }
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
        for child in &mut self.children {
            child.rewind();
        }
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
        IteratorKind::Intersection
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{drain, ids};
    use super::super::{new_empty, new_intersection, IteratorKind, IteratorStatus, QueryIterator};
    use crate::index::{IndexFlags, InvertedIndex};
    use crate::iterators::new_reader;
    use crate::record::{IndexRecord, OffsetVector, RecordData, FIELD_MASK_ALL};
    use crate::varint::VarintVectorWriter;
    use test_log::test;

    #[test]
    fn intersection_is_set_intersection() {
        let mut it = new_intersection(
            vec![ids(&[1, 3, 5, 7, 9, 11]), ids(&[2, 3, 6, 9, 12]), ids(&[3, 9, 27])],
            -1,
            false,
            1.0,
        );
        assert_eq!(vec![3, 9], drain(&mut it));
    }

    #[test]
    fn intersection_skip_to() {
        let mut it = new_intersection(vec![ids(&[2, 4, 6, 8]), ids(&[4, 8, 12])], -1, false, 1.0);
        assert_eq!(IteratorStatus::Ok, it.skip_to(4));
        assert_eq!(IteratorStatus::NotFound, it.skip_to(5));
        assert_eq!(8, it.last_doc_id());
        assert_eq!(IteratorStatus::Eof, it.skip_to(9));
    }

    #[test]
    fn intersection_reductions() {
        // any empty child kills the node
        let it = new_intersection(vec![ids(&[1, 2]), new_empty()], -1, false, 1.0);
        assert_eq!(IteratorKind::Empty, it.kind());

        // a single child replaces the node
        let it = new_intersection(vec![ids(&[1, 2])], -1, false, 1.0);
        assert_eq!(IteratorKind::IdList, it.kind());
    }

    #[test]
    fn intersection_aggregate_children() {
        let mut it = new_intersection(vec![ids(&[7]), ids(&[7]), ids(&[7])], -1, false, 1.0);
        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(3, it.current().children().len());
        assert_eq!(7, it.current().doc_id);
    }

    fn positional_index(postings: &[(u64, &[u32])]) -> crate::index::SharedInvertedIndex {
        let mut idx = InvertedIndex::new(
            IndexFlags::STORE_FREQS
                | IndexFlags::STORE_FIELD_FLAGS
                | IndexFlags::STORE_TERM_OFFSETS,
        );
        for &(doc_id, positions) in postings {
            let mut w = VarintVectorWriter::with_capacity(8);
            for &p in positions {
                w.write(p);
            }
            let mut record = IndexRecord::term(None, 1.0);
            record.doc_id = doc_id;
            record.freq = positions.len() as u32;
            record.field_mask = 1;
            record.data = RecordData::Term {
                term: None,
                offsets: OffsetVector(w.bytes().to_vec()),
            };
            idx.add_entry(doc_id, &record);
        }
        idx.into_shared()
    }

    #[test]
    fn phrase_match_with_slop() {
        // doc 1: "quick brown fox", doc 2: "quick stole the brown dog"
        let quick = positional_index(&[(1, &[0]), (2, &[0])]);
        let brown = positional_index(&[(1, &[1]), (2, &[3])]);

        let exact = |max_slop| {
            let mut it = new_intersection(
                vec![
                    new_reader(quick.clone(), FIELD_MASK_ALL, 1.0),
                    new_reader(brown.clone(), FIELD_MASK_ALL, 1.0),
                ],
                max_slop,
                true,
                1.0,
            );
            drain(&mut it)
        };

        assert_eq!(vec![1], exact(0));
        assert_eq!(vec![1, 2], exact(2));
    }

    #[test]
    fn in_order_rejects_swapped_terms() {
        // doc 1: "fox quick"
        let quick = positional_index(&[(1, &[1])]);
        let fox = positional_index(&[(1, &[0])]);

        let mut ordered = new_intersection(
            vec![
                new_reader(quick.clone(), FIELD_MASK_ALL, 1.0),
                new_reader(fox.clone(), FIELD_MASK_ALL, 1.0),
            ],
            1,
            true,
            1.0,
        );
        assert!(drain(&mut ordered).is_empty());

        let mut unordered = new_intersection(
            vec![
                new_reader(quick, FIELD_MASK_ALL, 1.0),
                new_reader(fox, FIELD_MASK_ALL, 1.0),
            ],
            1,
            false,
            1.0,
        );
        assert_eq!(vec![1], drain(&mut unordered));
    }
}
