use talus::index::{IndexFlags, IndexReader, InvertedIndex, BLOCK_SIZE};
use talus::iterators::IteratorStatus;
use talus::record::{IndexRecord, OffsetVector, RecordData, FIELD_MASK_ALL};
use talus::varint::VarintVectorWriter;
use test_log::test;

fn all_storage_combinations() -> Vec<IndexFlags> {
    let f = IndexFlags::STORE_FREQS;
    let m = IndexFlags::STORE_FIELD_FLAGS;
    let o = IndexFlags::STORE_TERM_OFFSETS;
    let w = IndexFlags::WIDE_SCHEMA;

    vec![
        f | o | m,
        f | o | m | w,
        f | m,
        f | m | w,
        f,
        m,
        m | w,
        m | o,
        m | o | w,
        o,
        f | o,
        IndexFlags::DOC_IDS_ONLY,
    ]
}

fn entry(doc_id: u64) -> IndexRecord {
    let mut offsets = VarintVectorWriter::with_capacity(8);
    for n in 0..(doc_id % 4) {
        offsets.write(n as u32);
    }

    let mut record = IndexRecord::term(None, 1.0);
    record.doc_id = doc_id;
    record.freq = (1 + doc_id % 100) as u32;
    record.field_mask = 0xFF;
    record.data = RecordData::Term {
        term: None,
        offsets: OffsetVector(offsets.bytes().to_vec()),
    };
    record
}

/// 200 entries span two blocks at the standard capacity, and a reader walks
/// all of them back in order, for every record layout.
#[test]
fn write_and_read_back_under_every_layout() {
    for flags in all_storage_combinations() {
        let mut idx = InvertedIndex::new(flags);
        for doc_id in 1..=200u64 {
            assert!(idx.add_entry(doc_id, &entry(doc_id)) > 0, "{flags:?}");
        }

        assert_eq!(200, idx.num_docs(), "{flags:?}");
        assert_eq!(200, idx.last_id(), "{flags:?}");
        if flags == IndexFlags::DOC_IDS_ONLY {
            // doc-ids-only blocks hold 1000 entries
            assert_eq!(1, idx.num_blocks(), "{flags:?}");
        } else {
            assert_eq!(2, idx.num_blocks(), "{flags:?}");
        }

        let shared = idx.into_shared();
        let mut reader = IndexReader::for_term(shared, FIELD_MASK_ALL, None, 1.0);
        let mut expected = 1u64;
        while reader.read() == IteratorStatus::Ok {
            assert_eq!(expected, reader.last_doc_id(), "{flags:?}");
            expected += 1;
        }
        assert_eq!(201, expected, "{flags:?}");
    }
}

#[test]
fn block_boundary_is_exact() {
    let mut idx = InvertedIndex::new(IndexFlags::STORE_FREQS);
    for doc_id in 1..=u64::from(BLOCK_SIZE) {
        idx.add_record(doc_id, 1);
    }
    assert_eq!(1, idx.num_blocks());
    idx.add_record(u64::from(BLOCK_SIZE) + 1, 1);
    assert_eq!(2, idx.num_blocks());
}

#[test]
fn field_mask_filtering_on_read() {
    let mut idx = InvertedIndex::new(IndexFlags::STORE_FREQS | IndexFlags::STORE_FIELD_FLAGS);
    for doc_id in 1..=60u64 {
        let mut record = IndexRecord::term(None, 1.0);
        record.doc_id = doc_id;
        record.freq = 1;
        record.field_mask = 1 << (doc_id % 3);
        idx.add_entry(doc_id, &record);
    }

    let shared = idx.into_shared();
    let mut reader = IndexReader::for_term(shared, 0b001, None, 1.0);
    let mut hits = vec![];
    while reader.read() == IteratorStatus::Ok {
        hits.push(reader.last_doc_id());
    }
    // only docs with doc_id % 3 == 0 carry field bit 0
    assert_eq!((3..=60).step_by(3).collect::<Vec<u64>>(), hits);
}

#[test]
fn wide_masks_survive_the_roundtrip() {
    let mut idx = InvertedIndex::new(
        IndexFlags::STORE_FREQS | IndexFlags::STORE_FIELD_FLAGS | IndexFlags::WIDE_SCHEMA,
    );
    let wide_bit = 1u128 << 100;
    let mut record = IndexRecord::term(None, 1.0);
    record.doc_id = 1;
    record.field_mask = wide_bit | 1;
    idx.add_entry(1, &record);

    let shared = idx.into_shared();
    let mut reader = IndexReader::for_term(shared, wide_bit, None, 1.0);
    assert_eq!(IteratorStatus::Ok, reader.read());
    assert_eq!(wide_bit | 1, reader.current().field_mask);
}

#[test]
fn offsets_travel_with_records() {
    let mut idx = InvertedIndex::new(IndexFlags::STORE_TERM_OFFSETS);
    let mut w = VarintVectorWriter::with_capacity(8);
    for position in [3u32, 9, 27] {
        w.write(position);
    }
    let mut record = IndexRecord::term(None, 1.0);
    record.doc_id = 1;
    record.data = RecordData::Term {
        term: None,
        offsets: OffsetVector(w.bytes().to_vec()),
    };
    idx.add_entry(1, &record);

    let shared = idx.into_shared();
    let mut reader = IndexReader::for_term(shared, FIELD_MASK_ALL, None, 1.0);
    assert_eq!(IteratorStatus::Ok, reader.read());
    let positions: Vec<u32> = reader
        .current()
        .offsets()
        .map(|o| o.iter().collect())
        .unwrap_or_default();
    assert_eq!(vec![3, 9, 27], positions);
}
