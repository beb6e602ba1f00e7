// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Wildcard iterator: the universe of documents.
//!
//! Without an "existing docs" index the universe is the dense range
//! `[1, top_id]`: cheap, but it surfaces ids of deleted documents. Indexes
//! that track all existing documents in a dedicated posting list get the
//! precise variant, which is just a reader in disguise.

use super::{IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::index::{DecoderCtx, IndexReader, SharedInvertedIndex};
use crate::record::{DocId, IndexRecord, FIELD_MASK_ALL};

enum Universe {
    Dense { top_id: DocId, num_docs: usize },
    Existing(IndexReader),
}

/// Wildcard iterator; see the module docs.
pub struct WildcardIterator {
    universe: Universe,
    current: IndexRecord,
    last_id: DocId,
    at_end: bool,
}

impl WildcardIterator {
    /// Universe as the dense range `[1, top_id]`.
    #[must_use]
    pub fn dense(top_id: DocId, num_docs: usize) -> Self {
        let mut current = IndexRecord::virt(1.0, FIELD_MASK_ALL);
        current.freq = 1;
        Self {
            universe: Universe::Dense { top_id, num_docs },
            current,
            last_id: 0,
            at_end: false,
        }
    }

    /// Universe read from an "existing docs" posting list.
    #[must_use]
    pub fn over_existing(existing_docs: SharedInvertedIndex) -> Self {
        let record = IndexRecord::virt(1.0, FIELD_MASK_ALL);
        let reader = IndexReader::new(existing_docs, DecoderCtx::None, false, record, 1.0);
        Self {
            universe: Universe::Existing(reader),
            current: IndexRecord::virt(1.0, FIELD_MASK_ALL),
            last_id: 0,
            at_end: false,
        }
    }
}

impl QueryIterator for WildcardIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        match &mut self.universe {
            Universe::Dense { top_id, .. } => {
                if self.last_id >= *top_id {
                    self.at_end = true;
                    return IteratorStatus::Eof;
                }
                self.last_id += 1;
                self.current.doc_id = self.last_id;
                IteratorStatus::Ok
            }
            Universe::Existing(reader) => {
                let status = reader.read();
                self.last_id = reader.last_doc_id();
                if status != IteratorStatus::Ok {
                    self.at_end = true;
                }
                status
            }
        }
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        match &mut self.universe {
            Universe::Dense { top_id, .. } => {
                if doc_id > *top_id {
                    self.at_end = true;
                    return IteratorStatus::Eof;
                }
                self.last_id = doc_id;
                self.current.doc_id = doc_id;
                IteratorStatus::Ok
            }
            Universe::Existing(reader) => {
                let status = reader.skip_to(doc_id);
                self.last_id = reader.last_doc_id();
                if matches!(status, IteratorStatus::Eof | IteratorStatus::TimedOut) {
                    self.at_end = true;
                }
                status
            }
        }
    }

    fn current(&self) -> &IndexRecord {
        match &self.universe {
            Universe::Dense { .. } => &self.current,
            Universe::Existing(reader) => reader.current(),
        }
    }

    fn last_doc_id(&self) -> DocId {
        self.last_id
    }

    fn num_estimated(&self) -> usize {
        match &self.universe {
            Universe::Dense { num_docs, .. } => *num_docs,
            Universe::Existing(reader) => reader.num_estimated(),
        }
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.last_id = 0;
        self.current.doc_id = 0;
        if let Universe::Existing(reader) = &mut self.universe {
            reader.rewind();
        }
    }

    fn abort(&mut self) {
        self.at_end = true;
        if let Universe::Existing(reader) = &mut self.universe {
            reader.abort();
        }
    }

    fn revalidate(&mut self) -> Revalidate {
        match &mut self.universe {
            Universe::Dense { .. } => Revalidate::Ok,
            Universe::Existing(reader) => {
                let outcome = reader.revalidate();
                if outcome == Revalidate::Aborted {
                    self.at_end = true;
                }
                outcome
            }
        }
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Wildcard
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::drain;
    use super::super::{new_wildcard, new_wildcard_reader, IteratorStatus, QueryIterator};
    use crate::index::{IndexFlags, InvertedIndex};
    use test_log::test;

    #[test]
    fn dense_wildcard_counts_up() {
        let mut it = new_wildcard(5, 5);
        assert_eq!(vec![1, 2, 3, 4, 5], drain(&mut it));
        assert_eq!(IteratorStatus::Eof, it.read());
    }

    #[test]
    fn dense_wildcard_skip() {
        let mut it = new_wildcard(10, 10);
        assert_eq!(IteratorStatus::Ok, it.skip_to(7));
        assert_eq!(7, it.last_doc_id());
        assert_eq!(IteratorStatus::Eof, it.skip_to(11));
    }

    #[test]
    fn existing_docs_wildcard() {
        let mut idx = InvertedIndex::new(IndexFlags::DOC_IDS_ONLY);
        for doc_id in [1u64, 5, 9, 12] {
            idx.add_record(doc_id, 1);
        }
        let mut it = new_wildcard_reader(idx.into_shared());
        assert_eq!(vec![1, 5, 9, 12], drain(&mut it));
    }
}
