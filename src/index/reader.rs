// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Stateful cursor over one inverted index.
//!
//! The reader takes the index's read lock once per `read`/`skip_to` call;
//! writers run between calls. On every lock acquisition the reader reconciles
//! with whatever happened while it was suspended: a retired index aborts the
//! cursor, a bumped GC marker forces a rewind and a re-seek to the last
//! yielded doc id (appends keep the saved offset valid and need nothing).

use super::decoder::{DecoderCtx, ValueFilter};
use super::{IndexBlock, InvertedIndex, Layout, SharedInvertedIndex};
use crate::binary_search::partition_point;
use crate::buffer::BufferReader;
use crate::iterators::{IteratorStatus, Revalidate};
use crate::record::{DocId, FieldMask, IndexRecord, Term};
use std::sync::Arc;

/// Cursor over an inverted index, yielding records in ascending doc-id
/// order.
#[derive(Debug)]
pub struct IndexReader {
    idx: SharedInvertedIndex,
    layout: Layout,
    ctx: DecoderCtx,
    record: IndexRecord,
    current_block: usize,
    pos: usize,
    /// Decode anchor: absolute doc id the next delta applies to. Starts at
    /// the first block's first id, which is not a yield yet.
    last_id: DocId,
    has_yielded: bool,
    gc_marker: u32,
    at_end: bool,
    aborted: bool,
    skip_multi: bool,
    same_id: DocId,
    len: usize,
    weight: f64,
    estimated: usize,
}

impl IndexReader {
    /// Creates a reader with an explicit decoding context and record buffer.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(
        idx: SharedInvertedIndex,
        ctx: DecoderCtx,
        skip_multi: bool,
        record: IndexRecord,
        weight: f64,
    ) -> Self {
        let (layout, gc_marker, first_id, estimated) = {
            let guard = idx.read().expect("lock poisoned");
            (
                guard.layout(),
                guard.gc_marker(),
                guard.blocks().first().map_or(0, IndexBlock::first_id),
                guard.num_docs() as usize,
            )
        };

        Self {
            idx,
            layout,
            ctx,
            record,
            current_block: 0,
            pos: 0,
            last_id: first_id,
            has_yielded: false,
            gc_marker,
            at_end: false,
            aborted: false,
            skip_multi,
            same_id: 0,
            len: 0,
            weight,
            estimated,
        }
    }

    /// Reader over a term index, filtered by field mask.
    #[must_use]
    pub fn for_term(
        idx: SharedInvertedIndex,
        field_mask: FieldMask,
        term: Option<Arc<Term>>,
        weight: f64,
    ) -> Self {
        let record = IndexRecord::term(term, weight);
        Self::new(idx, DecoderCtx::FieldMask(field_mask), false, record, weight)
    }

    /// Reader over a numeric index with an optional value predicate.
    #[must_use]
    pub fn for_numeric(
        idx: SharedInvertedIndex,
        filter: Option<ValueFilter>,
        skip_multi: bool,
    ) -> Self {
        let record = IndexRecord::numeric();
        Self::new(idx, DecoderCtx::Numeric(filter), skip_multi, record, 1.0)
    }

    /// Last yielded doc id, or 0 if nothing has been yielded yet.
    #[must_use]
    pub fn last_doc_id(&self) -> DocId {
        if self.has_yielded {
            self.last_id
        } else {
            0
        }
    }

    /// Borrow of the current record; valid until the next `read`/`skip_to`.
    #[must_use]
    pub fn current(&self) -> &IndexRecord {
        &self.record
    }

    /// Upper bound on the number of records this reader can yield.
    #[must_use]
    pub fn num_estimated(&self) -> usize {
        self.estimated
    }

    /// Number of records actually yielded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been yielded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the cursor is exhausted.
    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.at_end
    }

    /// Exhausts the cursor.
    pub fn abort(&mut self) {
        self.at_end = true;
    }

    /// Produces the next record.
    #[allow(clippy::expect_used)]
    pub fn read(&mut self) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }

        let idx = Arc::clone(&self.idx);
        let guard = idx.read().expect("lock poisoned");
        if !self.reopen(&guard) {
            return IteratorStatus::Eof;
        }
        self.read_inner(&guard)
    }

    /// Skips to the first record with `doc_id >= target`.
    #[allow(clippy::expect_used)]
    pub fn skip_to(&mut self, target: DocId) -> IteratorStatus {
        if target == 0 {
            return self.read();
        }
        if self.at_end {
            return IteratorStatus::Eof;
        }

        let idx = Arc::clone(&self.idx);
        let guard = idx.read().expect("lock poisoned");
        if !self.reopen(&guard) {
            return IteratorStatus::Eof;
        }
        self.skip_inner(&guard, target)
    }

    /// Resets the cursor to the start.
    #[allow(clippy::expect_used)]
    pub fn rewind(&mut self) {
        let idx = Arc::clone(&self.idx);
        let guard = idx.read().expect("lock poisoned");
        self.rewind_inner(&guard);
    }

    /// Checks whether the underlying index is still compatible with this
    /// cursor, re-seeking if GC rewrote blocks underneath it.
    #[allow(clippy::expect_used)]
    pub fn revalidate(&mut self) -> Revalidate {
        let idx = Arc::clone(&self.idx);
        let guard = idx.read().expect("lock poisoned");

        if guard.is_retired() {
            self.at_end = true;
            self.aborted = true;
            return Revalidate::Aborted;
        }
        if self.gc_marker == guard.gc_marker() || self.at_end {
            self.gc_marker = guard.gc_marker();
            return Revalidate::Ok;
        }

        let resume = self.last_doc_id();
        self.rewind_inner(&guard);
        if resume == 0 {
            return Revalidate::Ok;
        }

        match self.skip_inner(&guard, resume) {
            IteratorStatus::Ok => Revalidate::Ok,
            _ => Revalidate::Moved,
        }
    }

    fn set_at_end(&mut self) -> IteratorStatus {
        self.at_end = true;
        IteratorStatus::Eof
    }

    /// Reconciliation with concurrent writers, run under the read lock.
    fn reopen(&mut self, idx: &InvertedIndex) -> bool {
        if idx.is_retired() {
            log::debug!("reader aborted: index was retired");
            self.at_end = true;
            self.aborted = true;
            return false;
        }

        if self.gc_marker != idx.gc_marker() {
            let resume = self.last_doc_id();
            log::debug!(
                "gc marker moved {} -> {}, re-seeking to {resume}",
                self.gc_marker,
                idx.gc_marker(),
            );
            self.rewind_inner(idx);
            if resume != 0 {
                let _ = self.skip_inner(idx, resume);
            }
        }
        !self.at_end
    }

    fn rewind_inner(&mut self, idx: &InvertedIndex) {
        self.current_block = 0;
        self.pos = 0;
        self.at_end = false;
        self.aborted = false;
        self.gc_marker = idx.gc_marker();
        self.last_id = idx.blocks().first().map_or(0, IndexBlock::first_id);
        self.has_yielded = false;
        self.same_id = 0;
        self.len = 0;
    }

    fn advance_block(&mut self, idx: &InvertedIndex) {
        self.current_block += 1;
        self.pos = 0;
        self.last_id = idx
            .blocks()
            .get(self.current_block)
            .map_or(self.last_id, IndexBlock::first_id);
    }

    fn read_inner(&mut self, idx: &InvertedIndex) -> IteratorStatus {
        loop {
            // skip past consumed and empty blocks (GC may leave those)
            loop {
                let Some(block) = idx.blocks().get(self.current_block) else {
                    return self.set_at_end();
                };
                if self.pos < block.buf.len() {
                    break;
                }
                if self.current_block + 1 == idx.blocks().len() {
                    return self.set_at_end();
                }
                self.advance_block(idx);
            }

            let Some(block) = idx.blocks().get(self.current_block) else {
                return self.set_at_end();
            };
            let mut r = BufferReader::at(block.buf.as_slice(), self.pos);
            let passed = self.layout.decode(&mut r, &self.ctx, &mut self.record);
            self.pos = r.position();

            let delta = self.record.doc_id;
            self.last_id = if self.layout.anchors_on_first_id() {
                block.first_id + delta
            } else {
                self.last_id + delta
            };
            self.record.doc_id = self.last_id;

            if !passed {
                continue;
            }

            if self.skip_multi {
                // multi-value docs yield once
                if self.same_id == self.last_id {
                    continue;
                }
                self.same_id = self.last_id;
            }

            self.record.weight = self.weight;
            self.has_yielded = true;
            self.len += 1;
            return IteratorStatus::Ok;
        }
    }

    fn skip_to_block(&mut self, idx: &InvertedIndex, target: DocId) {
        let blocks = idx.blocks();
        let tail = blocks.get(self.current_block..).unwrap_or_default();
        let rel = partition_point(tail, |b| b.last_id < target);
        self.current_block = (self.current_block + rel).min(blocks.len().saturating_sub(1));
        self.pos = 0;
        self.last_id = blocks
            .get(self.current_block)
            .map_or(0, IndexBlock::first_id);
    }

    fn skip_inner(&mut self, idx: &InvertedIndex, target: DocId) -> IteratorStatus {
        if target > idx.last_id() || idx.blocks().is_empty() {
            return self.set_at_end();
        }

        let in_current = idx
            .blocks()
            .get(self.current_block)
            .is_some_and(|b| b.contains(target));
        if !in_current {
            self.skip_to_block(idx, target);
        }

        if self.layout.has_seeker() {
            loop {
                loop {
                    let Some(block) = idx.blocks().get(self.current_block) else {
                        return self.set_at_end();
                    };
                    if self.pos < block.buf.len() {
                        break;
                    }
                    if self.current_block + 1 == idx.blocks().len() {
                        return self.set_at_end();
                    }
                    self.advance_block(idx);
                }

                let Some(block) = idx.blocks().get(self.current_block) else {
                    return self.set_at_end();
                };
                let mut r = BufferReader::at(block.buf.as_slice(), self.pos);
                let mut running = self.last_id;
                let found = self.layout.seek(
                    &mut r,
                    &self.ctx,
                    block.first_id,
                    &mut running,
                    target,
                    &mut self.record,
                );
                self.pos = r.position();
                self.last_id = running;

                if found {
                    self.last_id = self.record.doc_id;
                    self.record.weight = self.weight;
                    self.has_yielded = true;
                    return if self.record.doc_id == target {
                        IteratorStatus::Ok
                    } else {
                        IteratorStatus::NotFound
                    };
                }
                // block consumed without a hit; the outer loop advances
            }
        } else {
            loop {
                match self.read_inner(idx) {
                    IteratorStatus::Ok => {
                        if self.last_id < target {
                            continue;
                        }
                        return if self.last_id == target {
                            IteratorStatus::Ok
                        } else {
                            IteratorStatus::NotFound
                        };
                    }
                    status => return status,
                }
            }
        }
    }
}
