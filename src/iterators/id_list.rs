// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Iterator over a pre-materialized doc-id list.

use super::{IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::binary_search::partition_point;
use crate::record::{DocId, IndexRecord, FIELD_MASK_ALL};

/// Iterator over a sorted, unique doc-id array.
pub struct IdListIterator {
    doc_ids: Vec<DocId>,
    offset: usize,
    current: IndexRecord,
    at_end: bool,
}

impl IdListIterator {
    /// Creates the iterator, sorting and deduplicating the input so callers
    /// do not have to.
    pub(crate) fn new(mut doc_ids: Vec<DocId>, weight: f64) -> Self {
        doc_ids.sort_unstable();
        doc_ids.dedup();

        Self {
            doc_ids,
            offset: 0,
            current: IndexRecord::virt(weight, FIELD_MASK_ALL),
            at_end: false,
        }
    }

    fn set_eof(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }
}

impl QueryIterator for IdListIterator {
    fn read(&mut self) -> IteratorStatus {
        let Some(&doc_id) = self.doc_ids.get(self.offset) else {
            return self.set_eof();
        };
        if self.at_end {
            return IteratorStatus::Eof;
        }

        self.offset += 1;
        self.current.doc_id = doc_id;
        if self.offset >= self.doc_ids.len() {
            self.at_end = true;
        }
        IteratorStatus::Ok
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        if self.doc_ids.last().is_some_and(|&max| doc_id > max) {
            return self.set_eof();
        }

        // bounded binary search from the current offset
        let tail = self.doc_ids.get(self.offset..).unwrap_or_default();
        let rel = partition_point(tail, |&id| id < doc_id);
        self.offset += rel;

        let Some(&landed) = self.doc_ids.get(self.offset) else {
            return self.set_eof();
        };
        self.offset += 1;
        self.current.doc_id = landed;
        if self.offset >= self.doc_ids.len() {
            self.at_end = true;
        }

        if landed == doc_id {
            IteratorStatus::Ok
        } else {
            IteratorStatus::NotFound
        }
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        self.current.doc_id
    }

    fn num_estimated(&self) -> usize {
        self.doc_ids.len()
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.offset = 0;
        self.current.doc_id = 0;
    }

    fn abort(&mut self) {
        self.at_end = true;
    }

    fn revalidate(&mut self) -> Revalidate {
        Revalidate::Ok
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::IdList
    }
}
