use std::collections::BTreeMap;
use talus::trie::{RangeBound, TrieMap};
use test_log::test;

/// S5: 100 numbered keys plus the empty key.
#[test]
fn hundred_keys_plus_empty() {
    let mut trie = TrieMap::new();
    for i in 0..100u32 {
        trie.insert(format!("key{i}").as_bytes(), i);
    }
    trie.insert(b"", 1000);
    assert_eq!(101, trie.len());

    // "key1", "key10" .. "key19"
    let hits: Vec<String> = trie
        .iter_prefix(b"key1")
        .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
        .collect();
    assert_eq!(11, hits.len());

    assert!(trie.remove(b""));
    assert_eq!(100, trie.len());
    assert_eq!(None, trie.get(b""));
}

/// Property 9: after interleaved inserts and deletes the enumerated set
/// equals a reference map.
#[test]
fn key_set_matches_reference_model() {
    let mut trie = TrieMap::new();
    let mut model: BTreeMap<Vec<u8>, u32> = BTreeMap::new();

    let keys: Vec<String> = (0..300u32)
        .map(|i| match i % 4 {
            0 => format!("alpha/{i}"),
            1 => format!("alpha/{}/sub", i / 2),
            2 => format!("beta{i}"),
            _ => format!("{i}"),
        })
        .collect();

    for (i, key) in keys.iter().enumerate() {
        trie.insert(key.as_bytes(), i as u32);
        model.insert(key.as_bytes().to_vec(), i as u32);
    }
    // delete every third key
    for key in keys.iter().step_by(3) {
        trie.remove(key.as_bytes());
        model.remove(key.as_bytes());
    }
    // re-insert a few deleted ones
    for key in keys.iter().step_by(9) {
        trie.insert(key.as_bytes(), 7);
        model.insert(key.as_bytes().to_vec(), 7);
    }

    assert_eq!(model.len(), trie.len());

    let enumerated: BTreeMap<Vec<u8>, u32> = trie
        .iter()
        .map(|(key, &value)| (key.as_ref().to_vec(), value))
        .collect();
    assert_eq!(model, enumerated);
}

/// Property 10: range enumeration equals the reference model's range, in
/// lexicographic order.
#[test]
fn range_matches_reference_model() {
    let mut trie = TrieMap::new();
    let mut model: BTreeMap<Vec<u8>, u32> = BTreeMap::new();
    for i in 0..200u32 {
        let key = format!("{:04}", i * 7 % 1000);
        trie.insert(key.as_bytes(), i);
        model.insert(key.as_bytes().to_vec(), i);
    }

    let min = b"0100".as_slice();
    let max = b"0700".as_slice();

    let expected: Vec<Vec<u8>> = model
        .range(min.to_vec()..=max.to_vec())
        .map(|(k, _)| k.clone())
        .collect();
    let got: Vec<Vec<u8>> = trie
        .range(RangeBound::inclusive(min), RangeBound::inclusive(max))
        .into_iter()
        .map(|(k, _)| k.as_ref().to_vec())
        .collect();

    assert_eq!(expected, got);
}

#[test]
fn wildcard_over_number_keys() {
    let mut trie = TrieMap::new();
    for i in 0..100u32 {
        trie.insert(format!("key{i}").as_bytes(), i);
    }

    assert_eq!(10, trie.iter_wildcard(b"key1?").count());
    assert_eq!(100, trie.iter_wildcard(b"key*").count());
    // key7, key17, ..., key97 plus key70..78 (key77 counts once)
    assert_eq!(19, trie.iter_wildcard(b"*7*").count());
    assert_eq!(0, trie.iter_wildcard(b"nope*").count());
}

#[test]
fn suffix_and_contains_over_number_keys() {
    let mut trie = TrieMap::new();
    for i in 0..100u32 {
        trie.insert(format!("key{i}").as_bytes(), i);
    }

    // keys ending in 9: key9, key19 .. key99
    assert_eq!(10, trie.iter_suffix(b"9").count());

    // keys containing "9": those plus key90..key98
    let mut containing: Vec<String> = trie
        .iter_contains(b"9")
        .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
        .collect();
    containing.sort();
    containing.dedup();
    assert_eq!(19, containing.len());
}

#[test]
fn values_survive_structure_changes() {
    let mut trie = TrieMap::new();
    trie.insert(b"test", 1u32);
    trie.insert(b"testing", 2);
    trie.insert(b"tester", 3);
    // splits "test" -> "test" + "ing"/"er"
    assert_eq!(Some(&1), trie.get(b"test"));

    trie.remove(b"test");
    // fold happens only when a single child remains
    trie.remove(b"tester");
    assert_eq!(Some(&2), trie.get(b"testing"));
    assert_eq!(1, trie.len());
}
