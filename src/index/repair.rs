// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block repair: dropping postings of deleted documents.
//!
//! Each block is decoded record by record against a doc-existence predicate.
//! Up to the first deletion the block is untouched; from there on surviving
//! records are rewritten into a scratch buffer: copied verbatim when the
//! preceding record also survived (the stored delta is still right),
//! re-encoded against the new predecessor otherwise. Afterwards the scratch
//! buffer replaces the block and the index's GC marker is bumped so
//! suspended readers re-seek.

use super::decoder::DecoderCtx;
use super::{IndexBlock, InvertedIndex, Layout};
use crate::buffer::{Buffer, BufferReader};
use crate::record::{DocId, IndexRecord};

/// Statistics and hooks for one repair run.
#[derive(Default)]
pub struct RepairParams<'a> {
    /// Bytes held by block buffers before the run.
    pub bytes_before: usize,
    /// Bytes held by block buffers after the run.
    pub bytes_after: usize,
    /// Encoded bytes dropped.
    pub bytes_collected: usize,
    /// Records dropped.
    pub entries_collected: usize,
    /// Invoked for every surviving record.
    pub on_surviving: Option<&'a mut dyn FnMut(&IndexRecord, &IndexBlock)>,
}

impl std::fmt::Debug for RepairParams<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairParams")
            .field("bytes_before", &self.bytes_before)
            .field("bytes_after", &self.bytes_after)
            .field("bytes_collected", &self.bytes_collected)
            .field("entries_collected", &self.entries_collected)
            .finish_non_exhaustive()
    }
}

impl InvertedIndex {
    /// Rewrites all blocks, dropping records whose document no longer
    /// exists. Returns the number of distinct documents collected.
    pub fn repair<F>(&mut self, doc_exists: F, params: &mut RepairParams<'_>) -> usize
    where
        F: Fn(DocId) -> bool,
    {
        let layout = self.layout();
        let compress = self.compress_floats;

        params.bytes_before = self.blocks.iter().map(|b| b.buf.len()).sum();

        let mut total_docs_collected = 0usize;
        let mut total_entries_collected = 0usize;
        for block in &mut self.blocks {
            total_docs_collected +=
                repair_block(block, layout, compress, &doc_exists, params);
            total_entries_collected = params.entries_collected;
        }

        // drop blocks emptied by the repair, keeping at least one
        if total_docs_collected > 0 {
            self.blocks.retain(|b| b.num_entries > 0);
            if self.blocks.is_empty() {
                self.blocks.push(IndexBlock::default());
            }
            self.last_id = self.blocks.last().map_or(0, |b| b.last_id);

            #[allow(clippy::cast_possible_truncation)]
            {
                self.num_docs = self.num_docs.saturating_sub(total_docs_collected as u32);
            }
            if layout.is_numeric() {
                if let super::Tail::NumEntries(n) = &mut self.tail {
                    *n = n.saturating_sub(total_entries_collected as u64);
                }
            }
            self.gc_marker += 1;

            log::debug!(
                "repair collected {} docs / {} entries, marker now {}",
                total_docs_collected,
                params.entries_collected,
                self.gc_marker
            );
        }

        params.bytes_after = self.blocks.iter().map(|b| b.buf.len()).sum();
        total_docs_collected
    }
}

fn repair_ctx(layout: Layout) -> DecoderCtx {
    if layout.is_numeric() {
        DecoderCtx::Numeric(None)
    } else {
        DecoderCtx::None
    }
}

#[allow(clippy::too_many_lines)]
fn repair_block<F>(
    block: &mut IndexBlock,
    layout: Layout,
    compress_floats: bool,
    doc_exists: &F,
    params: &mut RepairParams<'_>,
) -> usize
where
    F: Fn(DocId) -> bool,
{
    let first_read_id = block.first_id;
    let mut last_read_id = block.first_id;
    let mut is_first = true;

    let old_first = block.first_id;
    let old_last = block.last_id;
    block.first_id = 0;
    block.last_id = 0;

    let ctx = repair_ctx(layout);
    let mut record = if layout.is_numeric() {
        IndexRecord::numeric()
    } else {
        IndexRecord::term(None, 1.0)
    };

    let mut scratch = Buffer::new();
    let mut r = BufferReader::new(block.buf.as_slice());

    let mut docs_collected = 0usize;
    let mut entries_collected = 0usize;
    let mut last_was_valid = false;
    let mut exists = false;

    while !r.at_end() {
        let start = r.position();
        layout.decode(&mut r, &ctx, &mut record);
        let sz = r.position() - start;

        let delta = record.doc_id;
        let absolute = if layout.anchors_on_first_id() {
            first_read_id + delta
        } else {
            last_read_id + delta
        };

        // multi-value numeric entries share a doc id; only count the doc once
        let new_doc = is_first || last_read_id != absolute;
        is_first = false;
        last_read_id = absolute;
        record.doc_id = absolute;

        if new_doc {
            exists = doc_exists(absolute);
        }

        if exists {
            if let Some(callback) = params.on_surviving.as_mut() {
                callback(&record, block);
            }

            if docs_collected + entries_collected > 0 {
                // already rewriting; append this record to the scratch buffer
                if layout.anchors_on_first_id() {
                    if block.first_id == 0 {
                        block.first_id = absolute;
                    }
                    layout.encode(&mut scratch, absolute - block.first_id, &record, compress_floats);
                } else if last_was_valid {
                    // predecessor survived, the stored delta is still right
                    scratch.write(
                        block
                            .buf
                            .as_slice()
                            .get(start..start + sz)
                            .unwrap_or_default(),
                    );
                } else {
                    if block.last_id == 0 {
                        block.last_id = absolute;
                    }
                    layout.encode(&mut scratch, absolute - block.last_id, &record, compress_floats);
                }
            }

            if block.first_id == 0 {
                block.first_id = absolute;
            }
            block.last_id = absolute;
            last_was_valid = true;
        } else {
            if docs_collected + entries_collected == 0 {
                // first hole: everything before it is kept verbatim
                scratch.write(block.buf.as_slice().get(..start).unwrap_or_default());
            }
            if new_doc {
                docs_collected += 1;
            }
            entries_collected += 1;
            params.bytes_collected += sz;
            last_was_valid = false;
        }
    }

    params.entries_collected += entries_collected;

    if docs_collected + entries_collected > 0 {
        #[allow(clippy::cast_possible_truncation)]
        {
            block.num_entries = block.num_entries.saturating_sub(entries_collected as u32);
        }
        scratch.shrink_to_fit();
        block.buf = scratch;
    } else {
        block.first_id = old_first;
        block.last_id = old_last;
    }

    docs_collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexFlags, IndexReader, SharedInvertedIndex};
    use crate::iterators::IteratorStatus;
    use crate::record::{OffsetVector, RecordData, FIELD_MASK_ALL};
    use test_log::test;

    fn full_index(n: u64) -> InvertedIndex {
        let mut idx = InvertedIndex::new(
            IndexFlags::STORE_FREQS
                | IndexFlags::STORE_FIELD_FLAGS
                | IndexFlags::STORE_TERM_OFFSETS,
        );
        for doc_id in 1..=n {
            let mut record = IndexRecord::term(None, 1.0);
            record.doc_id = doc_id;
            record.freq = (doc_id % 10) as u32 + 1;
            record.field_mask = 1 << (doc_id % 8);
            record.data = RecordData::Term {
                term: None,
                offsets: OffsetVector(vec![doc_id as u8]),
            };
            idx.add_entry(doc_id, &record);
        }
        idx
    }

    fn drain(shared: &SharedInvertedIndex) -> Vec<(u64, u32)> {
        let mut reader = IndexReader::for_term(shared.clone(), FIELD_MASK_ALL, None, 1.0);
        let mut out = vec![];
        while reader.read() == IteratorStatus::Ok {
            out.push((reader.last_doc_id(), reader.current().freq));
        }
        out
    }

    #[test]
    fn repair_drops_deleted_docs() {
        let mut idx = full_index(250);
        let mut params = RepairParams::default();

        // delete every doc divisible by 3
        let collected = idx.repair(|doc_id| doc_id % 3 != 0, &mut params);
        assert_eq!(83, collected);
        assert_eq!(83, params.entries_collected);
        assert_eq!(250 - 83, idx.num_docs());
        assert_eq!(1, idx.gc_marker());
        assert!(params.bytes_after < params.bytes_before);

        let shared = idx.into_shared();
        let docs = drain(&shared);
        assert_eq!(250 - 83, docs.len());
        for (doc_id, freq) in docs {
            assert_ne!(0, doc_id % 3);
            // surviving records keep their payload
            assert_eq!((doc_id % 10) as u32 + 1, freq);
        }
    }

    #[test]
    fn repair_without_deletions_is_noop() {
        let mut idx = full_index(50);
        let before: Vec<_> = idx.blocks().iter().map(|b| b.buf.as_slice().to_vec()).collect();

        let mut params = RepairParams::default();
        assert_eq!(0, idx.repair(|_| true, &mut params));
        assert_eq!(0, idx.gc_marker());
        let after: Vec<_> = idx.blocks().iter().map(|b| b.buf.as_slice().to_vec()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn repair_deleting_everything_leaves_empty_index() {
        let mut idx = full_index(10);
        let mut params = RepairParams::default();
        assert_eq!(10, idx.repair(|_| false, &mut params));
        assert_eq!(0, idx.num_docs());

        let shared = idx.into_shared();
        assert!(drain(&shared).is_empty());
    }

    #[test]
    fn repair_counts_surviving_records() {
        let mut idx = full_index(20);
        let mut seen = 0usize;
        let mut callback = |_: &IndexRecord, _: &IndexBlock| seen += 1;
        let mut params = RepairParams {
            on_surviving: Some(&mut callback),
            ..RepairParams::default()
        };
        idx.repair(|doc_id| doc_id <= 15, &mut params);
        assert_eq!(15, seen);
    }

    #[test]
    fn suspended_reader_reseeks_after_repair() {
        let idx = full_index(100).into_shared();
        let mut reader = IndexReader::for_term(idx.clone(), FIELD_MASK_ALL, None, 1.0);

        for _ in 0..10 {
            assert_eq!(IteratorStatus::Ok, reader.read());
        }
        assert_eq!(10, reader.last_doc_id());

        {
            let mut guard = idx.write().expect("lock poisoned");
            let mut params = RepairParams::default();
            guard.repair(|doc_id| doc_id % 2 == 0, &mut params);
        }

        // reader re-seeks to its last id and continues with survivors only
        let mut rest = vec![];
        while reader.read() == IteratorStatus::Ok {
            rest.push(reader.last_doc_id());
        }
        assert_eq!((12..=100).step_by(2).collect::<Vec<u64>>(), rest);
    }

    #[test]
    fn numeric_multi_value_repair() {
        let mut idx = InvertedIndex::new(IndexFlags::STORE_NUMERIC);
        for doc_id in 1..=10u64 {
            idx.add_numeric(doc_id, doc_id as f64);
            idx.add_numeric(doc_id, doc_id as f64 + 0.5);
        }
        assert_eq!(20, idx.num_entries());

        let mut params = RepairParams::default();
        let collected = idx.repair(|doc_id| doc_id != 5, &mut params);
        assert_eq!(1, collected);
        assert_eq!(2, params.entries_collected);
        assert_eq!(18, idx.num_entries());
        assert_eq!(9, idx.num_docs());
    }
}
