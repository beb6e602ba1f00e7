// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block-structured posting-list storage.
//!
//! An inverted index is a sequence of capacity-bounded blocks, each holding
//! the encoded postings of a contiguous doc-id range. Records are stored as
//! deltas from a per-block anchor: the previous record's doc id for every
//! layout except raw doc-ids, which anchors on the block's first id. The
//! record wire format is selected once, from the index flags, out of the
//! layouts in [`Layout`].

pub(crate) mod decoder;
pub(crate) mod encoder;
mod reader;
mod repair;

pub use decoder::{DecoderCtx, ValueFilter};
pub use reader::IndexReader;
pub use repair::RepairParams;

use crate::buffer::Buffer;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::config::Config;
use crate::record::{DocId, FieldMask, IndexRecord};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};
use varint_rs::{VarintReader, VarintWriter};

/// Entries per block for indexes that store anything besides doc ids.
pub const BLOCK_SIZE: u32 = 100;

/// Entries per block for doc-ids-only indexes.
pub const BLOCK_SIZE_DOC_IDS_ONLY: u32 = 1_000;

/// Initial capacity of a fresh block buffer.
const BLOCK_INITIAL_CAP: usize = 6;

/// Selects which record fields are stored and how they are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexFlags(u32);

impl IndexFlags {
    /// Store nothing but doc ids.
    pub const DOC_IDS_ONLY: Self = Self(0);
    /// Store term frequencies.
    pub const STORE_FREQS: Self = Self(1);
    /// Store per-record field masks.
    pub const STORE_FIELD_FLAGS: Self = Self(2);
    /// Store token position vectors.
    pub const STORE_TERM_OFFSETS: Self = Self(4);
    /// Store a numeric value per record (multi-value per doc allowed).
    pub const STORE_NUMERIC: Self = Self(8);
    /// Field masks wider than 32 bits (varint-encoded).
    pub const WIDE_SCHEMA: Self = Self(16);

    const STORAGE_MASK: u32 = 0x1F;

    /// Raw bit representation.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstructs flags from bits, rejecting unknown bits.
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !Self::STORAGE_MASK == 0).then_some(Self(bits))
    }

    /// Returns `true` if all bits of `other` are set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn storage(self) -> u32 {
        self.0 & Self::STORAGE_MASK
    }
}

impl std::ops::BitOr for IndexFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for IndexFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The record wire format of an index. Exactly one layout exists per legal
/// flag combination; doc-ids-only indexes pick raw or varint deltas from the
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub enum Layout {
    /// delta, freq, field mask, offsets, stored as qint4 + raw bytes
    FreqsFieldsOffsets,
    /// wide variant, stored as qint3 + varint mask + raw bytes
    FreqsFieldsOffsetsWide,
    /// delta, freq, field mask, stored as qint3
    FreqsFields,
    /// wide variant, stored as qint2 + varint mask
    FreqsFieldsWide,
    /// delta, freq, stored as qint2
    FreqsOnly,
    /// delta, field mask, stored as qint2
    FieldsOnly,
    /// wide variant, stored as qint1 + varint mask
    FieldsOnlyWide,
    /// delta, field mask, offsets, stored as qint3 + raw bytes
    FieldsOffsets,
    /// wide variant, stored as qint2 + varint mask + raw bytes
    FieldsOffsetsWide,
    /// delta, offsets, stored as qint2 + raw bytes
    OffsetsOnly,
    /// delta, freq, offsets, stored as qint3 + raw bytes
    FreqsOffsets,
    /// delta alone, stored as a varint
    DocIdsOnly,
    /// delta from the block first id, stored as 4 little-endian bytes
    RawDocIdsOnly,
    /// delta and numeric value behind a tagged header byte
    Numeric,
}

impl Layout {
    /// Resolves the layout for a flag combination, or `None` if the
    /// combination is not encodable.
    #[must_use]
    pub fn for_flags(flags: IndexFlags, raw_doc_ids: bool) -> Option<Self> {
        use IndexFlags as F;

        let storage = flags.storage();
        let freqs = F::STORE_FREQS.0;
        let fields = F::STORE_FIELD_FLAGS.0;
        let offsets = F::STORE_TERM_OFFSETS.0;
        let numeric = F::STORE_NUMERIC.0;
        let wide = F::WIDE_SCHEMA.0;

        let layout = match storage {
            s if s == freqs | fields | offsets => Self::FreqsFieldsOffsets,
            s if s == freqs | fields | offsets | wide => Self::FreqsFieldsOffsetsWide,
            s if s == freqs | fields => Self::FreqsFields,
            s if s == freqs | fields | wide => Self::FreqsFieldsWide,
            s if s == freqs => Self::FreqsOnly,
            s if s == fields => Self::FieldsOnly,
            s if s == fields | wide => Self::FieldsOnlyWide,
            s if s == fields | offsets => Self::FieldsOffsets,
            s if s == fields | offsets | wide => Self::FieldsOffsetsWide,
            s if s == offsets => Self::OffsetsOnly,
            s if s == freqs | offsets => Self::FreqsOffsets,
            s if s == numeric => Self::Numeric,
            0 => {
                if raw_doc_ids {
                    Self::RawDocIdsOnly
                } else {
                    Self::DocIdsOnly
                }
            }
            _ => return None,
        };
        Some(layout)
    }

    /// Raw layouts anchor deltas on the block's first id instead of the
    /// previous record.
    #[must_use]
    pub fn anchors_on_first_id(self) -> bool {
        self == Self::RawDocIdsOnly
    }

    /// Whether this layout allows several records for the same doc.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self == Self::Numeric
    }
}

/// One capacity-bounded chunk of an inverted index.
#[derive(Debug, Clone, Default)]
pub struct IndexBlock {
    pub(crate) first_id: DocId,
    pub(crate) last_id: DocId,
    pub(crate) num_entries: u32,
    pub(crate) buf: Buffer,
}

impl IndexBlock {
    fn new(anchor: DocId) -> Self {
        Self {
            first_id: anchor,
            last_id: anchor,
            num_entries: 0,
            buf: Buffer::with_capacity(BLOCK_INITIAL_CAP),
        }
    }

    /// First doc id stored in the block.
    #[must_use]
    pub fn first_id(&self) -> DocId {
        self.first_id
    }

    /// Last doc id stored in the block.
    #[must_use]
    pub fn last_id(&self) -> DocId {
        self.last_id
    }

    /// Number of encoded records.
    #[must_use]
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    pub(crate) fn contains(&self, doc_id: DocId) -> bool {
        self.first_id <= doc_id && doc_id <= self.last_id
    }
}

/// Either the union of stored field masks or, for numeric indexes, the total
/// entry count : which one exists is fixed by the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    FieldMask(FieldMask),
    NumEntries(u64),
}

/// An inverted index shared between one writer and any number of readers.
pub type SharedInvertedIndex = Arc<RwLock<InvertedIndex>>;

/// Block-structured container of encoded postings for one term, numeric
/// field or tag.
#[derive(Debug, Clone)]
pub struct InvertedIndex {
    blocks: Vec<IndexBlock>,
    flags: IndexFlags,
    layout: Layout,
    last_id: DocId,
    num_docs: u32,
    tail: Tail,
    gc_marker: u32,
    retired: bool,
    compress_floats: bool,
}

impl InvertedIndex {
    /// Creates an index with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the flag combination has no encoder.
    #[must_use]
    pub fn new(flags: IndexFlags) -> Self {
        Self::with_config(flags, &Config::default())
    }

    /// Creates an index, resolving the doc-ids-only encoding from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the flag combination has no encoder.
    #[must_use]
    pub fn with_config(flags: IndexFlags, config: &Config) -> Self {
        #[allow(clippy::expect_used)]
        let layout = Layout::for_flags(flags, config.raw_doc_id_encoding)
            .expect("flag combination has no encoder");

        let tail = if flags.contains(IndexFlags::STORE_FIELD_FLAGS) {
            Tail::FieldMask(0)
        } else {
            Tail::NumEntries(0)
        };

        Self {
            blocks: vec![IndexBlock::new(0)],
            flags,
            layout,
            last_id: 0,
            num_docs: 0,
            tail,
            gc_marker: 0,
            retired: false,
            compress_floats: config.compress_floats,
        }
    }

    /// Wraps the index for shared reader/writer access.
    #[must_use]
    pub fn into_shared(self) -> SharedInvertedIndex {
        Arc::new(RwLock::new(self))
    }

    /// The flags this index was created with.
    #[must_use]
    pub fn flags(&self) -> IndexFlags {
        self.flags
    }

    /// The resolved record layout.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Number of distinct documents.
    #[must_use]
    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Total number of entries (differs from [`Self::num_docs`] only for
    /// multi-value numeric indexes).
    #[must_use]
    pub fn num_entries(&self) -> u64 {
        match self.tail {
            Tail::NumEntries(n) if self.layout.is_numeric() => n,
            _ => u64::from(self.num_docs),
        }
    }

    /// Union of all field masks stored, where field flags are stored.
    #[must_use]
    pub fn field_mask(&self) -> FieldMask {
        match self.tail {
            Tail::FieldMask(mask) => mask,
            Tail::NumEntries(_) => 0,
        }
    }

    /// Highest doc id written.
    #[must_use]
    pub fn last_id(&self) -> DocId {
        self.last_id
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// GC generation counter; incremented whenever blocks are rewritten.
    #[must_use]
    pub fn gc_marker(&self) -> u32 {
        self.gc_marker
    }

    /// Returns `true` if a writer has replaced this index; suspended readers
    /// abort instead of resuming.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Marks the index as replaced.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// Approximate heap usage of the posting data.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.buf.capacity() + std::mem::size_of::<IndexBlock>())
            .sum()
    }

    pub(crate) fn blocks(&self) -> &[IndexBlock] {
        &self.blocks
    }

    fn block_capacity(&self) -> u32 {
        if self.flags.storage() == 0 {
            BLOCK_SIZE_DOC_IDS_ONLY
        } else {
            BLOCK_SIZE
        }
    }

    #[allow(clippy::expect_used)]
    fn add_block(&mut self, anchor: DocId) -> &mut IndexBlock {
        self.blocks.push(IndexBlock::new(anchor));
        self.blocks.last_mut().expect("just pushed")
    }

    /// Appends one record, returning the number of bytes written.
    ///
    /// A doc id equal to the last one written is rejected (returns 0) unless
    /// the index is numeric, where same-doc entries form multi-values: they
    /// bump the entry count but not the doc count, and never span blocks.
    pub fn add_entry(&mut self, doc_id: DocId, record: &IndexRecord) -> usize {
        let mut same_doc = false;
        if self.last_id != 0 && self.last_id == doc_id {
            if self.layout.is_numeric() {
                same_doc = true;
            } else {
                return 0;
            }
        }

        let capacity = self.block_capacity();
        let layout = self.layout;

        if self.blocks.is_empty() {
            self.add_block(doc_id);
        }

        #[allow(clippy::expect_used)]
        let block_full = {
            let block = self.blocks.last().expect("at least one block");
            block.num_entries >= capacity && !same_doc
        };
        if block_full {
            self.add_block(doc_id);
        }

        let mut delta = {
            #[allow(clippy::expect_used)]
            let block = self.blocks.last_mut().expect("at least one block");
            if block.num_entries == 0 {
                block.first_id = doc_id;
                block.last_id = doc_id;
            }

            let anchor = if layout.anchors_on_first_id() {
                block.first_id
            } else {
                block.last_id
            };
            doc_id - anchor
        };

        // Non-numeric layouts carry the delta in 32 bits; the numeric header
        // carries up to 7 delta bytes. Either way, an overflowing delta
        // starts a fresh block anchored at this doc.
        let delta_limit = if layout.is_numeric() {
            (1 << 56) - 1
        } else {
            u64::from(u32::MAX)
        };
        if delta > delta_limit {
            delta = 0;
            self.add_block(doc_id);
        }

        #[allow(clippy::expect_used)]
        let block = self.blocks.last_mut().expect("at least one block");
        if block.num_entries == 0 {
            block.first_id = doc_id;
            block.last_id = doc_id;
        }

        let sz = layout.encode(&mut block.buf, delta, record, self.compress_floats);

        block.last_id = doc_id;
        block.num_entries += 1;
        self.last_id = doc_id;
        if !same_doc {
            self.num_docs += 1;
        }
        match &mut self.tail {
            Tail::NumEntries(n) if layout.is_numeric() => *n += 1,
            Tail::FieldMask(mask) => *mask |= record.field_mask,
            Tail::NumEntries(_) => {}
        }

        sz
    }

    /// Appends a term posting with the given frequency and a full field
    /// mask. Convenience for tests and doc-id-only feeds.
    pub fn add_record(&mut self, doc_id: DocId, freq: u32) -> usize {
        let mut record = IndexRecord::term(None, 1.0);
        record.doc_id = doc_id;
        record.freq = freq;
        self.add_entry(doc_id, &record)
    }

    /// Appends a numeric entry.
    pub fn add_numeric(&mut self, doc_id: DocId, value: f64) -> usize {
        let mut record = IndexRecord::numeric();
        record.doc_id = doc_id;
        record.data = crate::record::RecordData::Numeric(value);
        self.add_entry(doc_id, &record)
    }
}

impl Encode for InvertedIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.flags.bits())?;
        writer.write_u8(u8::from(self.layout.anchors_on_first_id()))?;
        writer.write_u32_varint(self.num_docs)?;
        writer.write_u64_varint(self.last_id)?;

        match self.tail {
            Tail::FieldMask(mask) => {
                writer.write_u8(0)?;
                writer.write_u128::<LittleEndian>(mask)?;
            }
            Tail::NumEntries(n) => {
                writer.write_u8(1)?;
                writer.write_u64_varint(n)?;
            }
        }

        // NOTE: block count is bounded well below u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32_varint(self.blocks.len() as u32)?;

        for block in &self.blocks {
            writer.write_u64_varint(block.first_id)?;
            writer.write_u64_varint(block.last_id)?;
            writer.write_u32_varint(block.num_entries)?;

            // the payload is exactly the byte stream the encoder produced
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32_varint(block.buf.len() as u32)?;
            writer.write_all(block.buf.as_slice())?;
        }

        Ok(())
    }
}

impl Decode for InvertedIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let bits = reader.read_u32::<LittleEndian>()?;
        let flags = IndexFlags::from_bits(bits).ok_or(DecodeError::InvalidFlags(bits))?;
        let raw_doc_ids = reader.read_u8()? != 0;
        let layout =
            Layout::for_flags(flags, raw_doc_ids).ok_or(DecodeError::InvalidFlags(bits))?;

        let num_docs = reader.read_u32_varint()?;
        let last_id = reader.read_u64_varint()?;

        let tail = match reader.read_u8()? {
            0 => Tail::FieldMask(reader.read_u128::<LittleEndian>()?),
            1 => Tail::NumEntries(reader.read_u64_varint()?),
            tag => return Err(DecodeError::InvalidTag(("IndexTail", tag))),
        };

        let num_blocks = reader.read_u32_varint()? as usize;
        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let first_id = reader.read_u64_varint()?;
            let block_last_id = reader.read_u64_varint()?;
            let num_entries = reader.read_u32_varint()?;
            if first_id > block_last_id {
                return Err(DecodeError::InvalidBlockHeader);
            }

            let len = reader.read_u32_varint()? as usize;
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;

            blocks.push(IndexBlock {
                first_id,
                last_id: block_last_id,
                num_entries,
                buf: Buffer::from(data),
            });
        }

        if blocks.is_empty() {
            blocks.push(IndexBlock::new(0));
        }

        Ok(Self {
            blocks,
            flags,
            layout,
            last_id,
            num_docs,
            tail,
            gc_marker: 0,
            retired: false,
            compress_floats: false,
        })
    }
}
