// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-document term aggregator.
//!
//! While a document is tokenized, every distinct term accumulates its
//! frequency, field mask and position vector here. On commit the entries
//! are appended to the posting lists of their terms in one pass. Position
//! writers are recycled through a pool across documents.

use crate::config::Config;
use crate::index::{IndexFlags, InvertedIndex, SharedInvertedIndex};
use crate::mempool::Pool;
use crate::record::{DocId, FieldIndex, FieldMask, IndexRecord, OffsetVector, RecordData};
use crate::slice::Slice;
use crate::tokenizer::Tokenizer;
use crate::trie::TrieMap;
use crate::varint::VarintVectorWriter;
use rustc_hash::FxHashMap;

/// Tokens whose surface form is a stem variant score lower than the raw
/// word.
const STEM_TOKEN_FACTOR: f32 = 0.2;

/// Bucket estimate: one distinct term per roughly this many input bytes.
const CHARS_PER_TERM: usize = 5;

/// fnv-1a over `bytes`, the term fingerprint stored in every entry.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = 0x811c_9dc5u32;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Accumulated occurrence data of one term in one document.
#[derive(Debug)]
pub struct ForwardIndexEntry {
    /// The term bytes.
    pub term: Slice,
    /// fnv-1a fingerprint of the term.
    pub hash: u32,
    /// Accumulated frequency.
    pub freq: u32,
    /// Fields the term occurred in.
    pub field_mask: FieldMask,
    /// Token positions, when the schema stores offsets.
    pub positions: Option<VarintVectorWriter>,
}

/// Per-document forward index; see the module docs.
pub struct ForwardIndex {
    hits: FxHashMap<Slice, ForwardIndexEntry>,
    vvw_pool: Pool<VarintVectorWriter>,
    store_offsets: bool,
    /// Highest per-term frequency in the document (scoring normalization).
    pub max_freq: u32,
    /// Sum of all raw token frequencies (document length).
    pub total_freq: u64,
}

impl ForwardIndex {
    /// Creates a forward index for a schema with the given flags.
    #[must_use]
    pub fn new(flags: IndexFlags) -> Self {
        Self::with_size_hint(flags, 0)
    }

    /// Creates a forward index sized for a document of `total_chars` bytes.
    #[must_use]
    pub fn with_size_hint(flags: IndexFlags, total_chars: usize) -> Self {
        let mut hits = FxHashMap::default();
        hits.reserve(total_chars / CHARS_PER_TERM);

        Self {
            hits,
            vvw_pool: Pool::new(
                || VarintVectorWriter::with_capacity(64),
                VarintVectorWriter::reset,
            ),
            store_offsets: flags.contains(IndexFlags::STORE_TERM_OFFSETS),
            max_freq: 0,
            total_freq: 0,
        }
    }

    /// Number of distinct terms aggregated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns `true` if no terms were aggregated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Records one occurrence of `term` at `position` in field `field_id`.
    pub fn handle_token(
        &mut self,
        term: &[u8],
        position: u32,
        field_score: f32,
        field_id: FieldIndex,
        is_stem: bool,
    ) {
        let score = if is_stem {
            field_score * STEM_TOKEN_FACTOR
        } else {
            field_score
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let freq_incr = (score as u32).max(1);

        if !self.hits.contains_key(term) {
            let positions = self.store_offsets.then(|| self.vvw_pool.get());
            let key = Slice::from(term);
            self.hits.insert(
                key.clone(),
                ForwardIndexEntry {
                    term: key,
                    hash: fnv1a(term),
                    freq: 0,
                    field_mask: 0,
                    positions,
                },
            );
        }
        let Some(entry) = self.hits.get_mut(term) else {
            return;
        };

        entry.field_mask |= FieldMask::from(1u8) << field_id;
        entry.freq += freq_incr;
        if let Some(writer) = entry.positions.as_mut() {
            writer.write(position);
        }

        self.max_freq = self.max_freq.max(entry.freq);
        if !is_stem {
            self.total_freq += u64::from(freq_incr);
        }
    }

    /// Tokenizes one document field into the index. Stem variants emitted by
    /// the tokenizer are aggregated at a reduced score.
    pub fn index_field<T: Tokenizer>(
        &mut self,
        tokenizer: &mut T,
        text: &str,
        field_id: FieldIndex,
        field_score: f32,
    ) {
        tokenizer.start(text);
        loop {
            let (term, stem, position) = {
                let Some(token) = tokenizer.next_token() else {
                    break;
                };
                (
                    token.token.as_bytes().to_vec(),
                    token.stem.map(|s| s.as_bytes().to_vec()),
                    token.position,
                )
            };

            self.handle_token(&term, position, field_score, field_id, false);
            if let Some(stem) = stem {
                self.handle_token(&stem, position, field_score, field_id, true);
            }
        }
    }

    /// Looks up a term's entry.
    #[must_use]
    pub fn find(&self, term: &[u8]) -> Option<&ForwardIndexEntry> {
        self.hits.get(term)
    }

    /// Iterates all aggregated entries (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &ForwardIndexEntry> {
        self.hits.values()
    }

    /// Appends every entry to its term's posting list in `dictionary`,
    /// creating missing inverted indexes with `flags`. Returns the number of
    /// bytes written.
    pub fn commit(
        &self,
        doc_id: DocId,
        dictionary: &mut TrieMap<SharedInvertedIndex>,
        flags: IndexFlags,
        config: &Config,
    ) -> usize {
        let mut bytes = 0usize;
        for entry in self.hits.values() {
            if !dictionary.contains_key(&entry.term) {
                dictionary.insert(
                    &entry.term,
                    InvertedIndex::with_config(flags, config).into_shared(),
                );
            }
            let Some(shared) = dictionary.get(&entry.term) else {
                continue;
            };

            let mut record = IndexRecord::term(None, 1.0);
            record.doc_id = doc_id;
            record.freq = entry.freq;
            record.field_mask = entry.field_mask;
            record.data = RecordData::Term {
                term: None,
                offsets: OffsetVector(
                    entry
                        .positions
                        .as_ref()
                        .map(|w| w.bytes().to_vec())
                        .unwrap_or_default(),
                ),
            };

            #[allow(clippy::expect_used)]
            let mut idx = shared.write().expect("lock poisoned");
            bytes += idx.add_entry(doc_id, &record);
        }
        bytes
    }

    /// Clears the aggregator for the next document, recycling position
    /// writers.
    pub fn reset(&mut self) {
        for (_, mut entry) in self.hits.drain() {
            if let Some(writer) = entry.positions.take() {
                self.vvw_pool.put(writer);
            }
        }
        self.max_freq = 0;
        self.total_freq = 0;
    }
}
