// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! NOT iterator: the complement of its child within `[1, max_doc_id]`.
//!
//! The plain variant walks the dense id range, skipping ids the child
//! yields. When an "existing docs" iterator is supplied, the candidate
//! universe is that iterator's output instead, so deleted ids are never
//! surfaced. Both variants scan in lock-step and consult the query deadline
//! at coarse granularity.

use super::{AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::record::{DocId, IndexRecord, FIELD_MASK_ALL};
use crate::time::{Deadline, TimeoutCounter};

/// NOT iterator; see the module docs.
pub struct NotIterator {
    pub(crate) child: Box<AnyIterator>,
    wildcard: Option<Box<AnyIterator>>,
    current: IndexRecord,
    last_id: DocId,
    max_doc_id: DocId,
    at_end: bool,
    timeout: TimeoutCounter,
}

impl NotIterator {
    pub(crate) fn new(
        child: AnyIterator,
        max_doc_id: DocId,
        weight: f64,
        deadline: Deadline,
        existing_docs: Option<AnyIterator>,
    ) -> Self {
        Self {
            child: Box::new(child),
            wildcard: existing_docs.map(Box::new),
            current: IndexRecord::virt(weight, FIELD_MASK_ALL),
            last_id: 0,
            max_doc_id,
            at_end: false,
            timeout: TimeoutCounter::new(deadline),
        }
    }

    fn set_eof(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }

    fn yield_at(&mut self, doc_id: DocId) -> IteratorStatus {
        self.last_id = doc_id;
        self.current.doc_id = doc_id;
        IteratorStatus::Ok
    }

    /// Dense variant: the smallest id `>= candidate` the child lacks.
    ///
    /// A child cursor sitting on its final element is exhausted but its last
    /// id still anti-matches, so the id comparison comes before the EOF
    /// check throughout.
    fn next_missing_dense(&mut self, mut candidate: DocId) -> IteratorStatus {
        loop {
            if candidate > self.max_doc_id {
                return self.set_eof();
            }

            if self.child.last_doc_id() == candidate {
                // anti-match, try the next id
                candidate += 1;
                if !self.child.at_eof() && self.child.read() == IteratorStatus::TimedOut {
                    self.at_end = true;
                    return IteratorStatus::TimedOut;
                }
            } else if self.child.at_eof() || self.child.last_doc_id() > candidate {
                return self.yield_at(candidate);
            } else {
                // the child lags behind the candidate; the next round
                // resolves against its new position
                if self.child.skip_to(candidate) == IteratorStatus::TimedOut {
                    self.at_end = true;
                    return IteratorStatus::TimedOut;
                }
            }

            if self.timeout.tick() {
                self.at_end = true;
                return IteratorStatus::TimedOut;
            }
        }
    }

    /// Wildcard-backed variant: the smallest existing id `>= start` the
    /// child lacks. The wildcard iterator must already sit at or beyond
    /// `start`, or be advanceable to it.
    fn next_missing_existing(&mut self, start: DocId) -> IteratorStatus {
        let Some(wildcard) = self.wildcard.as_mut() else {
            return self.set_eof();
        };

        if wildcard.last_doc_id() < start {
            match wildcard.skip_to(start) {
                IteratorStatus::Eof => return self.set_eof(),
                IteratorStatus::TimedOut => {
                    self.at_end = true;
                    return IteratorStatus::TimedOut;
                }
                IteratorStatus::Ok | IteratorStatus::NotFound => {}
            }
        }

        loop {
            let candidate = wildcard.last_doc_id();
            if candidate > self.max_doc_id {
                return self.set_eof();
            }

            if self.child.last_doc_id() == candidate {
                // anti-match: advance the universe
                match wildcard.read() {
                    IteratorStatus::Eof => return self.set_eof(),
                    IteratorStatus::TimedOut => {
                        self.at_end = true;
                        return IteratorStatus::TimedOut;
                    }
                    IteratorStatus::Ok | IteratorStatus::NotFound => {}
                }
            } else if self.child.at_eof() || self.child.last_doc_id() > candidate {
                return self.yield_at(candidate);
            } else {
                // ids deleted from the universe may linger in the child
                match self.child.skip_to(candidate) {
                    IteratorStatus::NotFound | IteratorStatus::Eof => {
                        return self.yield_at(candidate);
                    }
                    IteratorStatus::TimedOut => {
                        self.at_end = true;
                        return IteratorStatus::TimedOut;
                    }
                    IteratorStatus::Ok => {}
                }
            }

            if self.timeout.tick() {
                self.at_end = true;
                return IteratorStatus::TimedOut;
            }
        }
    }
}

impl QueryIterator for NotIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end || self.last_id >= self.max_doc_id {
            return self.set_eof();
        }

        let start = self.last_id + 1;
        if self.wildcard.is_some() {
            self.next_missing_existing(start)
        } else {
            self.next_missing_dense(start)
        }
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        if doc_id > self.max_doc_id {
            return self.set_eof();
        }

        // is the target in the child? three cases: the child sits exactly on
        // it (anti-match), it is already past it (free), or it must be asked
        let anti_match = if self.child.last_doc_id() == doc_id {
            true
        } else if self.child.at_eof() || self.child.last_doc_id() > doc_id {
            false
        } else {
            match self.child.skip_to(doc_id) {
                IteratorStatus::Ok => true,
                IteratorStatus::NotFound | IteratorStatus::Eof => false,
                IteratorStatus::TimedOut => {
                    self.at_end = true;
                    return IteratorStatus::TimedOut;
                }
            }
        };

        if self.wildcard.is_some() {
            if anti_match {
                // surface the next existing id the child lacks
                return match self.next_missing_existing(doc_id + 1) {
                    IteratorStatus::Ok => IteratorStatus::NotFound,
                    status => status,
                };
            }
            // the target is free, but it must actually exist
            let Some(wildcard) = self.wildcard.as_mut() else {
                return self.set_eof();
            };
            let status = if wildcard.last_doc_id() < doc_id {
                wildcard.skip_to(doc_id)
            } else if wildcard.last_doc_id() == doc_id {
                IteratorStatus::Ok
            } else {
                IteratorStatus::NotFound
            };
            return match status {
                IteratorStatus::Ok => self.yield_at(doc_id),
                IteratorStatus::NotFound => {
                    let next = self.wildcard.as_ref().map_or(doc_id, |w| w.last_doc_id());
                    match self.next_missing_existing(next) {
                        IteratorStatus::Ok => IteratorStatus::NotFound,
                        other => other,
                    }
                }
                IteratorStatus::Eof => self.set_eof(),
                IteratorStatus::TimedOut => {
                    self.at_end = true;
                    IteratorStatus::TimedOut
                }
            };
        }

        if anti_match {
            match self.next_missing_dense(doc_id + 1) {
                IteratorStatus::Ok => IteratorStatus::NotFound,
                status => status,
            }
        } else {
            self.yield_at(doc_id)
        }
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        self.last_id
    }

    fn num_estimated(&self) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let universe = self.max_doc_id as usize;
        universe.saturating_sub(self.child.num_estimated())
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.last_id = 0;
        self.current.doc_id = 0;
        self.child.rewind();
        if let Some(wildcard) = self.wildcard.as_mut() {
            wildcard.rewind();
        }
        self.timeout.reset();
    }

    fn abort(&mut self) {
        self.at_end = true;
        self.child.abort();
        if let Some(wildcard) = self.wildcard.as_mut() {
            wildcard.abort();
        }
    }

    fn revalidate(&mut self) -> Revalidate {
        let mut worst = self.child.revalidate();
        if let Some(wildcard) = self.wildcard.as_mut() {
            worst = worst.worst(wildcard.revalidate());
        }
        worst
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Not
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{drain, ids};
    use super::super::{new_not, IteratorStatus, QueryIterator};
    use crate::time::Deadline;
    use test_log::test;

    #[test]
    fn not_is_complement() {
        let mut it = new_not(Some(ids(&[2, 4, 6])), 8, 1.0, Deadline::none(), None);
        assert_eq!(vec![1, 3, 5, 7, 8], drain(&mut it));
    }

    #[test]
    fn not_with_empty_child_is_everything() {
        let mut it = new_not(None, 5, 1.0, Deadline::none(), None);
        assert_eq!(vec![1, 2, 3, 4, 5], drain(&mut it));
    }

    #[test]
    fn not_skip_to() {
        let mut it = new_not(Some(ids(&[3, 6, 9])), 10, 1.0, Deadline::none(), None);

        assert_eq!(IteratorStatus::Ok, it.skip_to(2));
        assert_eq!(2, it.last_doc_id());

        // 3 is in the child; the next free id is 4
        assert_eq!(IteratorStatus::NotFound, it.skip_to(3));
        assert_eq!(4, it.last_doc_id());

        assert_eq!(IteratorStatus::Ok, it.skip_to(7));
        assert_eq!(IteratorStatus::Eof, it.skip_to(11));
    }

    #[test]
    fn not_with_existing_docs_universe() {
        // universe lacks 4 and 7 (deleted docs)
        let universe = ids(&[1, 2, 3, 5, 6, 8, 9, 10]);
        let mut it = new_not(
            Some(ids(&[2, 5, 6])),
            10,
            1.0,
            Deadline::none(),
            Some(universe),
        );
        assert_eq!(vec![1, 3, 8, 9, 10], drain(&mut it));
    }

    #[test]
    fn not_optimized_skip_to_deleted_target() {
        let universe = ids(&[1, 3, 5, 7]);
        let mut it = new_not(Some(ids(&[3])), 7, 1.0, Deadline::none(), Some(universe));

        // 2 does not exist; the next existing free id is 5 (3 is anti-matched)
        assert_eq!(IteratorStatus::NotFound, it.skip_to(2));
        assert_eq!(5, it.last_doc_id());

        assert_eq!(IteratorStatus::Ok, it.skip_to(7));
        assert_eq!(7, it.last_doc_id());
    }

    #[test]
    fn not_child_covering_everything_is_empty() {
        let mut it = new_not(Some(ids(&[1, 2, 3, 4, 5])), 5, 1.0, Deadline::none(), None);
        assert!(drain(&mut it).is_empty());
        assert!(it.at_eof());
    }

    #[test]
    fn not_rewind() {
        let mut it = new_not(Some(ids(&[2])), 3, 1.0, Deadline::none(), None);
        assert_eq!(vec![1, 3], drain(&mut it));
        it.rewind();
        assert_eq!(vec![1, 3], drain(&mut it));
    }
}
