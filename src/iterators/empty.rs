// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::record::{DocId, IndexRecord, FIELD_MASK_ALL};

/// The iterator over nothing; every operation is a no-op at EOF.
pub struct EmptyIterator {
    current: IndexRecord,
}

impl EmptyIterator {
    pub(crate) fn new() -> Self {
        Self {
            current: IndexRecord::virt(1.0, FIELD_MASK_ALL),
        }
    }
}

impl QueryIterator for EmptyIterator {
    fn read(&mut self) -> IteratorStatus {
        IteratorStatus::Eof
    }

    fn skip_to(&mut self, _doc_id: DocId) -> IteratorStatus {
        IteratorStatus::Eof
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        0
    }

    fn num_estimated(&self) -> usize {
        0
    }

    fn at_eof(&self) -> bool {
        true
    }

    fn rewind(&mut self) {}

    fn abort(&mut self) {}

    fn revalidate(&mut self) -> Revalidate {
        Revalidate::Ok
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Empty
    }
}
