// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Record encoders, one per [`Layout`].
//!
//! Numeric header byte, bit positions from LSB:
//! `delta-bytes:3 | type:2 | type-specific:3`
//!
//! - tiny: the value (0..=7) lives in the specific bits, zero data bytes
//! - posint / negint: specific bits hold the byte count minus one, value
//!   follows in 1..=8 little-endian bytes
//! - float: specific bits are `{is-inf, sign, is-double}`; infinities carry
//!   no data bytes, finite floats 4 or 8 little-endian IEEE 754 bytes

use super::Layout;
use crate::buffer::Buffer;
use crate::qint;
use crate::record::IndexRecord;
use crate::varint::{write_varint, write_varint_field_mask};

pub(crate) const NUM_TYPE_TINY: u8 = 0;
pub(crate) const NUM_TYPE_FLOAT: u8 = 1;
pub(crate) const NUM_TYPE_POS_INT: u8 = 2;
pub(crate) const NUM_TYPE_NEG_INT: u8 = 3;

pub(crate) const FLOAT_INF: u8 = 1;
pub(crate) const FLOAT_NEG: u8 = 2;
pub(crate) const FLOAT_DOUBLE: u8 = 4;

pub(crate) fn pack_header(delta_bytes: u8, num_type: u8, specific: u8) -> u8 {
    delta_bytes | (num_type << 3) | (specific << 5)
}

pub(crate) fn unpack_header(header: u8) -> (u8, u8, u8) {
    (header & 0x07, (header >> 3) & 0x03, header >> 5)
}

fn offsets_of(record: &IndexRecord) -> &[u8] {
    record.offsets().map_or(&[], |offsets| offsets.0.as_slice())
}

#[allow(clippy::cast_possible_truncation)]
fn mask32(record: &IndexRecord) -> u32 {
    record.field_mask as u32
}

#[allow(clippy::cast_possible_truncation)]
fn offsets_len(record: &IndexRecord) -> u32 {
    offsets_of(record).len() as u32
}

impl Layout {
    /// Appends one encoded record, returning the number of bytes written.
    ///
    /// `delta` is the doc-id delta from the block anchor; callers guarantee
    /// it fits 32 bits for every layout except the numeric one.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn encode(
        self,
        buf: &mut Buffer,
        delta: u64,
        record: &IndexRecord,
        compress_floats: bool,
    ) -> usize {
        let delta32 = delta as u32;
        match self {
            Self::FreqsFieldsOffsets => {
                let offsets = offsets_of(record);
                let sz = qint::encode4(
                    buf,
                    [delta32, record.freq, mask32(record), offsets_len(record)],
                );
                sz + buf.write(offsets)
            }

            Self::FreqsFieldsOffsetsWide => {
                let offsets = offsets_of(record);
                let mut sz = qint::encode3(buf, [delta32, record.freq, offsets_len(record)]);
                sz += write_varint_field_mask(record.field_mask, buf);
                sz + buf.write(offsets)
            }

            Self::FreqsFields => qint::encode3(buf, [delta32, record.freq, mask32(record)]),

            Self::FreqsFieldsWide => {
                let sz = qint::encode2(buf, [delta32, record.freq]);
                sz + write_varint_field_mask(record.field_mask, buf)
            }

            Self::FreqsOnly => qint::encode2(buf, [delta32, record.freq]),

            Self::FieldsOnly => qint::encode2(buf, [delta32, mask32(record)]),

            Self::FieldsOnlyWide => {
                let sz = qint::encode1(buf, [delta32]);
                sz + write_varint_field_mask(record.field_mask, buf)
            }

            Self::FieldsOffsets => {
                let offsets = offsets_of(record);
                let sz = qint::encode3(buf, [delta32, mask32(record), offsets_len(record)]);
                sz + buf.write(offsets)
            }

            Self::FieldsOffsetsWide => {
                let offsets = offsets_of(record);
                let mut sz = qint::encode2(buf, [delta32, offsets_len(record)]);
                sz += write_varint_field_mask(record.field_mask, buf);
                sz + buf.write(offsets)
            }

            Self::OffsetsOnly => {
                let offsets = offsets_of(record);
                let sz = qint::encode2(buf, [delta32, offsets_len(record)]);
                sz + buf.write(offsets)
            }

            Self::FreqsOffsets => {
                let offsets = offsets_of(record);
                let sz = qint::encode3(buf, [delta32, record.freq, offsets_len(record)]);
                sz + buf.write(offsets)
            }

            Self::DocIdsOnly => write_varint(delta32, buf),

            Self::RawDocIdsOnly => buf.write(&delta32.to_le_bytes()),

            Self::Numeric => {
                encode_numeric(buf, delta, record.value().unwrap_or(0.0), compress_floats)
            }
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
fn encode_numeric(buf: &mut Buffer, delta: u64, value: f64, compress_floats: bool) -> usize {
    let abs = value.abs();

    // placeholder for the header, patched below
    let header_pos = buf.len();
    let mut sz = buf.write_u8(0);

    let mut delta_bytes = 0u8;
    let mut d = delta;
    while d != 0 {
        sz += buf.write_u8((d & 0xFF) as u8);
        d >>= 8;
        delta_bytes += 1;
    }

    let tiny = (abs as u8) & 0x07;
    let header = if f64::from(tiny) == value {
        pack_header(delta_bytes, NUM_TYPE_TINY, tiny)
    } else if value.is_finite() && abs.trunc() == abs && abs < 18_446_744_073_709_551_616.0 {
        // whole number, 1..=8 little-endian bytes
        let num_type = if value < 0.0 {
            NUM_TYPE_NEG_INT
        } else {
            NUM_TYPE_POS_INT
        };

        let mut whole = abs as u64;
        let mut count = 0u8;
        loop {
            sz += buf.write_u8((whole & 0xFF) as u8);
            whole >>= 8;
            count += 1;
            if whole == 0 {
                break;
            }
        }
        pack_header(delta_bytes, num_type, count - 1)
    } else if !value.is_finite() {
        let mut specific = FLOAT_INF;
        if value == f64::NEG_INFINITY {
            specific |= FLOAT_NEG;
        }
        pack_header(delta_bytes, NUM_TYPE_FLOAT, specific)
    } else {
        let narrow = abs as f32;
        let mut specific = 0u8;
        if value < 0.0 {
            specific |= FLOAT_NEG;
        }

        if f64::from(narrow) == abs || (compress_floats && (abs - f64::from(narrow)).abs() < 0.01)
        {
            sz += buf.write(&narrow.to_le_bytes());
        } else {
            specific |= FLOAT_DOUBLE;
            sz += buf.write(&abs.to_le_bytes());
        }
        pack_header(delta_bytes, NUM_TYPE_FLOAT, specific)
    };

    buf.write_at(header_pos, &[header]);
    sz
}
