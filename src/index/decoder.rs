// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Record decoders, paired one-to-one with the encoders.
//!
//! A decoder reads exactly one record, leaves the doc-id *delta* in the
//! record (the reader resolves it against its running anchor) and applies its
//! inline filter: field-mask intersection for term layouts, range or
//! geo-radius for the numeric layout. A `false` return tells the reader to
//! advance without yielding.
//!
//! The hottest layouts additionally expose a *seeker* that walks forward
//! inside the block until it reaches a passing record with a doc id at or
//! beyond a target, without bouncing back to the reader for every record.

use super::encoder::{
    unpack_header, FLOAT_DOUBLE, FLOAT_INF, FLOAT_NEG, NUM_TYPE_FLOAT, NUM_TYPE_NEG_INT,
    NUM_TYPE_TINY,
};
use super::Layout;
use crate::buffer::BufferReader;
use crate::filter::{GeoFilter, NumericFilter};
use crate::qint;
use crate::record::{DocId, FieldMask, IndexRecord, RecordData, FIELD_MASK_ALL};
use crate::varint::{read_varint, read_varint_field_mask};

/// Value predicate applied by the numeric decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueFilter {
    /// Numeric range.
    Range(NumericFilter),
    /// Geo radius over cell-encoded values; on a hit the record's value is
    /// replaced with the distance in meters.
    Geo(GeoFilter),
}

/// Per-reader decoding context.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DecoderCtx {
    /// No filtering.
    #[default]
    None,
    /// Yield only records intersecting this field mask.
    FieldMask(FieldMask),
    /// Numeric decoding with an optional value predicate.
    Numeric(Option<ValueFilter>),
}

impl DecoderCtx {
    fn mask(&self) -> FieldMask {
        match self {
            Self::FieldMask(mask) => *mask,
            _ => FIELD_MASK_ALL,
        }
    }
}

fn set_offsets(record: &mut IndexRecord, bytes: &[u8]) {
    if let RecordData::Term { offsets, .. } = &mut record.data {
        offsets.0.clear();
        offsets.0.extend_from_slice(bytes);
    }
}

fn check_mask(record: &IndexRecord, ctx: &DecoderCtx) -> bool {
    record.field_mask & ctx.mask() != 0
}

impl Layout {
    /// Decodes one record, leaving the doc-id delta in `record.doc_id`.
    /// Returns `false` if the record is filtered out.
    pub(crate) fn decode(
        self,
        r: &mut BufferReader<'_>,
        ctx: &DecoderCtx,
        record: &mut IndexRecord,
    ) -> bool {
        match self {
            Self::FreqsFieldsOffsets => {
                let [delta, freq, mask, offsets_len] = qint::decode4(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                record.field_mask = FieldMask::from(mask);
                set_offsets(record, r.read_bytes(offsets_len as usize));
                check_mask(record, ctx)
            }

            Self::FreqsFieldsOffsetsWide => {
                let [delta, freq, offsets_len] = qint::decode3(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                record.field_mask = read_varint_field_mask(r);
                set_offsets(record, r.read_bytes(offsets_len as usize));
                check_mask(record, ctx)
            }

            Self::FreqsFields => {
                let [delta, freq, mask] = qint::decode3(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                record.field_mask = FieldMask::from(mask);
                check_mask(record, ctx)
            }

            Self::FreqsFieldsWide => {
                let [delta, freq] = qint::decode2(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                record.field_mask = read_varint_field_mask(r);
                check_mask(record, ctx)
            }

            Self::FreqsOnly => {
                let [delta, freq] = qint::decode2(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                true
            }

            Self::FieldsOnly => {
                let [delta, mask] = qint::decode2(r);
                record.doc_id = DocId::from(delta);
                record.field_mask = FieldMask::from(mask);
                check_mask(record, ctx)
            }

            Self::FieldsOnlyWide => {
                let [delta] = qint::decode1(r);
                record.doc_id = DocId::from(delta);
                record.field_mask = read_varint_field_mask(r);
                check_mask(record, ctx)
            }

            Self::FieldsOffsets => {
                let [delta, mask, offsets_len] = qint::decode3(r);
                record.doc_id = DocId::from(delta);
                record.field_mask = FieldMask::from(mask);
                set_offsets(record, r.read_bytes(offsets_len as usize));
                check_mask(record, ctx)
            }

            Self::FieldsOffsetsWide => {
                let [delta, offsets_len] = qint::decode2(r);
                record.doc_id = DocId::from(delta);
                record.field_mask = read_varint_field_mask(r);
                set_offsets(record, r.read_bytes(offsets_len as usize));
                check_mask(record, ctx)
            }

            Self::OffsetsOnly => {
                let [delta, offsets_len] = qint::decode2(r);
                record.doc_id = DocId::from(delta);
                set_offsets(record, r.read_bytes(offsets_len as usize));
                true
            }

            Self::FreqsOffsets => {
                let [delta, freq, offsets_len] = qint::decode3(r);
                record.doc_id = DocId::from(delta);
                record.freq = freq;
                set_offsets(record, r.read_bytes(offsets_len as usize));
                true
            }

            Self::DocIdsOnly => {
                record.doc_id = DocId::from(read_varint(r));
                record.freq = 1;
                true
            }

            Self::RawDocIdsOnly => {
                record.doc_id = r.read_uint_le(4);
                record.freq = 1;
                true
            }

            Self::Numeric => decode_numeric(r, ctx, record),
        }
    }

    /// Whether [`Self::seek`] is implemented for this layout.
    pub(crate) fn has_seeker(self) -> bool {
        matches!(self, Self::FreqsFieldsOffsets | Self::RawDocIdsOnly)
    }

    /// Walks forward within the current block until a filter-passing record
    /// with `doc_id >= target` is found. On success the record holds the
    /// *absolute* doc id and `true` is returned; on failure the block is
    /// consumed.
    pub(crate) fn seek(
        self,
        r: &mut BufferReader<'_>,
        ctx: &DecoderCtx,
        block_first_id: DocId,
        last_id: &mut DocId,
        target: DocId,
        record: &mut IndexRecord,
    ) -> bool {
        match self {
            Self::FreqsFieldsOffsets => {
                let mask = ctx.mask();
                while !r.at_end() {
                    let [delta, freq, fm, offsets_len] = qint::decode4(r);
                    let offset_bytes = r.read_bytes(offsets_len as usize);
                    *last_id += DocId::from(delta);

                    if FieldMask::from(fm) & mask == 0 {
                        continue;
                    }
                    if *last_id >= target {
                        record.doc_id = *last_id;
                        record.freq = freq;
                        record.field_mask = FieldMask::from(fm);
                        set_offsets(record, offset_bytes);
                        return true;
                    }
                }
                false
            }

            Self::RawDocIdsOnly => {
                let delta = target.saturating_sub(block_first_id);
                let bytes = r.remaining();
                let word = |i: usize| -> u64 {
                    let mut quad = [0u8; 4];
                    if let Some(src) = bytes.get(i * 4..i * 4 + 4) {
                        quad.copy_from_slice(src);
                    }
                    u64::from(u32::from_le_bytes(quad))
                };

                let n = bytes.len() / 4;
                let mut lo = 0usize;
                let mut hi = n;
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    if word(mid) < delta {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }

                if lo == n {
                    r.skip(bytes.len());
                    return false;
                }

                let found = block_first_id + word(lo);
                r.skip((lo + 1) * 4);
                record.doc_id = found;
                record.freq = 1;
                *last_id = found;
                true
            }

            _ => false,
        }
    }
}

fn decode_numeric(r: &mut BufferReader<'_>, ctx: &DecoderCtx, record: &mut IndexRecord) -> bool {
    let (delta_bytes, num_type, specific) = unpack_header(r.read_u8());

    record.doc_id = r.read_uint_le(usize::from(delta_bytes));

    let mut value = match num_type {
        NUM_TYPE_TINY => f64::from(specific),
        NUM_TYPE_FLOAT => {
            let mut v = if specific & FLOAT_INF != 0 {
                f64::INFINITY
            } else if specific & FLOAT_DOUBLE != 0 {
                f64::from_bits(r.read_uint_le(8))
            } else {
                // NOTE: 4-byte reads cannot exceed u32
                #[allow(clippy::cast_possible_truncation)]
                let bits = r.read_uint_le(4) as u32;
                f64::from(f32::from_bits(bits))
            };
            if specific & FLOAT_NEG != 0 {
                v = -v;
            }
            v
        }
        // positive or negative whole number, zero is tiny
        _ => {
            #[allow(clippy::cast_precision_loss)]
            let v = r.read_uint_le(usize::from(specific) + 1) as f64;
            if num_type == NUM_TYPE_NEG_INT {
                -v
            } else {
                v
            }
        }
    };

    let passes = match ctx {
        DecoderCtx::Numeric(Some(ValueFilter::Range(filter))) => filter.matches(value),
        DecoderCtx::Numeric(Some(ValueFilter::Geo(filter))) => {
            match filter.distance_if_within(value) {
                Some(distance) => {
                    value = distance;
                    true
                }
                None => false,
            }
        }
        _ => true,
    };

    record.data = RecordData::Numeric(value);
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::record::OffsetVector;
    use test_log::test;

    const ALL_TERM_LAYOUTS: &[Layout] = &[
        Layout::FreqsFieldsOffsets,
        Layout::FreqsFieldsOffsetsWide,
        Layout::FreqsFields,
        Layout::FreqsFieldsWide,
        Layout::FreqsOnly,
        Layout::FieldsOnly,
        Layout::FieldsOnlyWide,
        Layout::FieldsOffsets,
        Layout::FieldsOffsetsWide,
        Layout::OffsetsOnly,
        Layout::FreqsOffsets,
        Layout::DocIdsOnly,
        Layout::RawDocIdsOnly,
    ];

    fn stores_freqs(layout: Layout) -> bool {
        matches!(
            layout,
            Layout::FreqsFieldsOffsets
                | Layout::FreqsFieldsOffsetsWide
                | Layout::FreqsFields
                | Layout::FreqsFieldsWide
                | Layout::FreqsOnly
                | Layout::FreqsOffsets
        )
    }

    fn stores_mask(layout: Layout) -> bool {
        matches!(
            layout,
            Layout::FreqsFieldsOffsets
                | Layout::FreqsFieldsOffsetsWide
                | Layout::FreqsFields
                | Layout::FreqsFieldsWide
                | Layout::FieldsOnly
                | Layout::FieldsOnlyWide
                | Layout::FieldsOffsets
                | Layout::FieldsOffsetsWide
        )
    }

    fn stores_offsets(layout: Layout) -> bool {
        matches!(
            layout,
            Layout::FreqsFieldsOffsets
                | Layout::FreqsFieldsOffsetsWide
                | Layout::FieldsOffsets
                | Layout::FieldsOffsetsWide
                | Layout::OffsetsOnly
                | Layout::FreqsOffsets
        )
    }

    fn is_wide(layout: Layout) -> bool {
        matches!(
            layout,
            Layout::FreqsFieldsOffsetsWide
                | Layout::FreqsFieldsWide
                | Layout::FieldsOnlyWide
                | Layout::FieldsOffsetsWide
        )
    }

    #[test]
    fn roundtrip_every_term_layout() {
        for &layout in ALL_TERM_LAYOUTS {
            let mut source = IndexRecord::term(None, 1.0);
            source.doc_id = 42; // the delta
            source.freq = 17;
            source.field_mask = if is_wide(layout) { 1 << 90 } else { 0xAB };
            source.data = RecordData::Term {
                term: None,
                offsets: OffsetVector(vec![1, 2, 3, 4]),
            };

            let mut buf = Buffer::new();
            let sz = layout.encode(&mut buf, 42, &source, false);
            assert_eq!(sz, buf.len(), "{layout:?}");

            let mut decoded = IndexRecord::term(None, 1.0);
            let mut r = buf.reader();
            assert!(layout.decode(&mut r, &DecoderCtx::None, &mut decoded), "{layout:?}");
            assert!(r.at_end(), "{layout:?}");

            assert_eq!(42, decoded.doc_id, "{layout:?}");
            if stores_freqs(layout) {
                assert_eq!(17, decoded.freq, "{layout:?}");
            }
            if stores_mask(layout) {
                assert_eq!(source.field_mask, decoded.field_mask, "{layout:?}");
            }
            if stores_offsets(layout) {
                assert_eq!(
                    Some(&OffsetVector(vec![1, 2, 3, 4])),
                    decoded.offsets(),
                    "{layout:?}"
                );
            }
        }
    }

    #[test]
    fn field_mask_filter_rejects() {
        let mut source = IndexRecord::term(None, 1.0);
        source.field_mask = 0b0100;

        let mut buf = Buffer::new();
        Layout::FieldsOnly.encode(&mut buf, 1, &source, false);

        let mut decoded = IndexRecord::term(None, 1.0);
        let mut r = buf.reader();
        assert!(!Layout::FieldsOnly.decode(&mut r, &DecoderCtx::FieldMask(0b0011), &mut decoded));
        // the record was still fully consumed
        assert!(r.at_end());

        let mut r = buf.reader();
        assert!(Layout::FieldsOnly.decode(&mut r, &DecoderCtx::FieldMask(0b0110), &mut decoded));
    }

    #[test]
    fn numeric_roundtrip_values() {
        let values = [
            0.0,
            0.13,
            0.001,
            -0.1,
            1.0,
            5.0,
            4.323,
            65_535.0,
            65_535.53,
            32_768.432,
            4_294_967_296.0,
            -4_294_967_296.0,
            1_099_511_627_776.0,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];

        for value in values {
            let mut source = IndexRecord::numeric();
            source.data = RecordData::Numeric(value);

            let mut buf = Buffer::new();
            Layout::Numeric.encode(&mut buf, 3, &source, false);

            let mut decoded = IndexRecord::numeric();
            let mut r = buf.reader();
            assert!(Layout::Numeric.decode(&mut r, &DecoderCtx::Numeric(None), &mut decoded));
            assert!(r.at_end());
            assert_eq!(3, decoded.doc_id);
            assert_eq!(Some(value), decoded.value(), "value {value}");
        }
    }

    #[test]
    fn numeric_compressed_float_within_tolerance() {
        let value = 65_535.53;
        let mut source = IndexRecord::numeric();
        source.data = RecordData::Numeric(value);

        let mut buf = Buffer::new();
        Layout::Numeric.encode(&mut buf, 0, &source, true);
        // header + 4-byte float
        assert_eq!(5, buf.len());

        let mut decoded = IndexRecord::numeric();
        let mut r = buf.reader();
        Layout::Numeric.decode(&mut r, &DecoderCtx::Numeric(None), &mut decoded);
        let got = decoded.value().unwrap_or(f64::NAN);
        assert!((got - value).abs() / value < 0.01, "got {got}");
    }

    #[test]
    fn numeric_range_filter() {
        let mut buf = Buffer::new();
        for (delta, value) in [(0u64, 1.0), (1, 5.5), (1, 9.0)] {
            let mut source = IndexRecord::numeric();
            source.data = RecordData::Numeric(value);
            Layout::Numeric.encode(&mut buf, delta, &source, false);
        }

        let ctx = DecoderCtx::Numeric(Some(ValueFilter::Range(NumericFilter::new(2.0, 8.0))));
        let mut r = buf.reader();
        let mut decoded = IndexRecord::numeric();

        assert!(!Layout::Numeric.decode(&mut r, &ctx, &mut decoded));
        assert!(Layout::Numeric.decode(&mut r, &ctx, &mut decoded));
        assert_eq!(Some(5.5), decoded.value());
        assert!(!Layout::Numeric.decode(&mut r, &ctx, &mut decoded));
    }

    #[test]
    fn seeker_full_layout() {
        let mut buf = Buffer::new();
        // doc ids 10, 20, 30 with masks 1, 2, 1
        let mut last = 0u64;
        for (doc_id, mask) in [(10u64, 1u128), (20, 2), (30, 1)] {
            let mut source = IndexRecord::term(None, 1.0);
            source.freq = 9;
            source.field_mask = mask;
            source.data = RecordData::Term {
                term: None,
                offsets: OffsetVector(vec![7]),
            };
            Layout::FreqsFieldsOffsets.encode(&mut buf, doc_id - last, &source, false);
            last = doc_id;
        }

        // seek to 15 with mask 1: lands on 30, because 20 is masked out
        let mut record = IndexRecord::term(None, 1.0);
        let mut r = buf.reader();
        let mut last_id = 0u64;
        let found = Layout::FreqsFieldsOffsets.seek(
            &mut r,
            &DecoderCtx::FieldMask(1),
            0,
            &mut last_id,
            15,
            &mut record,
        );
        assert!(found);
        assert_eq!(30, record.doc_id);
        assert_eq!(30, last_id);
    }

    #[test]
    fn seeker_raw_doc_ids() {
        let mut buf = Buffer::new();
        let first_id = 100u64;
        let mut record = IndexRecord::term(None, 1.0);
        for doc_id in (100u64..200).step_by(2) {
            Layout::RawDocIdsOnly.encode(&mut buf, doc_id - first_id, &record, false);
        }

        // exact hit
        let mut r = buf.reader();
        let mut last_id = 0;
        assert!(Layout::RawDocIdsOnly.seek(
            &mut r,
            &DecoderCtx::None,
            first_id,
            &mut last_id,
            150,
            &mut record,
        ));
        assert_eq!(150, record.doc_id);

        // miss lands on the next even id
        let mut r = buf.reader();
        assert!(Layout::RawDocIdsOnly.seek(
            &mut r,
            &DecoderCtx::None,
            first_id,
            &mut last_id,
            151,
            &mut record,
        ));
        assert_eq!(152, record.doc_id);

        // beyond the block
        let mut r = buf.reader();
        assert!(!Layout::RawDocIdsOnly.seek(
            &mut r,
            &DecoderCtx::None,
            first_id,
            &mut last_id,
            500,
            &mut record,
        ));
        assert!(r.at_end());
    }
}
