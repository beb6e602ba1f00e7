// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! OPTIONAL iterator: yields every candidate doc id; where the child also
//! matches, the yield carries the child's record at the query weight,
//! otherwise a zero-weight virtual record. The candidate universe is the
//! dense range `[1, max_doc_id]`, or an "existing docs" iterator when one is
//! supplied.

use super::{AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::record::{DocId, IndexRecord, FIELD_MASK_ALL};

/// OPTIONAL iterator; see the module docs.
pub struct OptionalIterator {
    pub(crate) child: Box<AnyIterator>,
    wildcard: Option<Box<AnyIterator>>,
    virt: IndexRecord,
    hit: IndexRecord,
    use_child: bool,
    last_id: DocId,
    max_doc_id: DocId,
    at_end: bool,
    weight: f64,
}

impl OptionalIterator {
    pub(crate) fn new(
        child: AnyIterator,
        max_doc_id: DocId,
        weight: f64,
        existing_docs: Option<AnyIterator>,
    ) -> Self {
        let mut virt = IndexRecord::virt(0.0, FIELD_MASK_ALL);
        virt.freq = 1;

        Self {
            child: Box::new(child),
            wildcard: existing_docs.map(Box::new),
            hit: virt.clone(),
            virt,
            use_child: false,
            last_id: 0,
            max_doc_id,
            at_end: false,
            weight,
        }
    }

    fn set_eof(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }

    fn yield_at(&mut self, doc_id: DocId) -> IteratorStatus {
        self.last_id = doc_id;
        self.use_child = !self.child.at_eof() && self.child.last_doc_id() == doc_id;
        if self.use_child {
            self.hit = self.child.current().clone();
            self.hit.weight = self.weight;
        } else {
            self.virt.doc_id = doc_id;
            self.virt.weight = 0.0;
        }
        IteratorStatus::Ok
    }

    fn read_dense(&mut self) -> IteratorStatus {
        let candidate = self.last_id + 1;

        if candidate > self.child.last_doc_id() && !self.child.at_eof() {
            // the candidate only ever advances one past the previous yield,
            // so a single child step is enough to catch up
            if self.child.read() == IteratorStatus::TimedOut {
                return IteratorStatus::TimedOut;
            }
        }
        self.yield_at(candidate)
    }

    fn read_existing(&mut self) -> IteratorStatus {
        let Some(wildcard) = self.wildcard.as_mut() else {
            return self.set_eof();
        };

        match wildcard.read() {
            IteratorStatus::Ok | IteratorStatus::NotFound => {}
            IteratorStatus::Eof => return self.set_eof(),
            IteratorStatus::TimedOut => {
                self.at_end = true;
                return IteratorStatus::TimedOut;
            }
        }
        let candidate = wildcard.last_doc_id();

        if candidate > self.child.last_doc_id() && !self.child.at_eof() {
            match self.child.skip_to(candidate) {
                IteratorStatus::TimedOut => return IteratorStatus::TimedOut,
                _ => {}
            }
        }
        self.yield_at(candidate)
    }
}

impl QueryIterator for OptionalIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end || self.last_id >= self.max_doc_id {
            return self.set_eof();
        }
        if self.wildcard.is_some() {
            self.read_existing()
        } else {
            self.read_dense()
        }
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end || doc_id > self.max_doc_id {
            return self.set_eof();
        }

        if doc_id > self.child.last_doc_id() && !self.child.at_eof() {
            match self.child.skip_to(doc_id) {
                IteratorStatus::TimedOut => return IteratorStatus::TimedOut,
                _ => {}
            }
        }

        if let Some(wildcard) = self.wildcard.as_mut() {
            if doc_id > wildcard.last_doc_id() {
                match wildcard.skip_to(doc_id) {
                    IteratorStatus::Eof => return self.set_eof(),
                    IteratorStatus::TimedOut => {
                        self.at_end = true;
                        return IteratorStatus::TimedOut;
                    }
                    IteratorStatus::Ok | IteratorStatus::NotFound => {}
                }
            }
            let landed = wildcard.last_doc_id();
            let status = self.yield_at(landed);
            debug_assert_eq!(IteratorStatus::Ok, status);
            return if landed == doc_id {
                IteratorStatus::Ok
            } else {
                // the requested doc no longer exists
                IteratorStatus::NotFound
            };
        }

        self.yield_at(doc_id)
    }

    fn current(&self) -> &IndexRecord {
        if self.use_child {
            &self.hit
        } else {
            &self.virt
        }
    }

    fn last_doc_id(&self) -> DocId {
        self.last_id
    }

    fn num_estimated(&self) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.max_doc_id as usize
        }
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.last_id = 0;
        self.use_child = false;
        self.virt.doc_id = 0;
        self.child.rewind();
        if let Some(wildcard) = self.wildcard.as_mut() {
            wildcard.rewind();
        }
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
        IteratorKind::Optional
    }
}

/// Weight applied to child hits; exposed for result processors that score
/// optional branches.
impl OptionalIterator {
    /// The query weight carried by real (non-virtual) hits.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }
}
