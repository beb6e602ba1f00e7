// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embeddable query-execution core for full-text, numeric, tag and vector
//! search.
//!
//! ##### NOTE
//!
//! > This crate only provides the execution substrate of a search engine:
//! > posting-list storage, the iterator algebra that evaluates Boolean trees
//! > over it, a radix-trie term dictionary, and the hybrid coupling of an ANN
//! > index with a Boolean filter. Query parsing, scoring and the serving
//! > layer are deliberately out of scope.
//!
//! ##### About
//!
//! Documents are identified by a monotonically increasing [`DocId`]. At index
//! time, a per-document [`ForwardIndex`] aggregates tokens and their
//! positions; on commit each entry is appended to the [`InvertedIndex`] of
//! its term through one of ten flag-selected record codecs. At query time, a
//! planner builds a tree of [`AnyIterator`]s (readers at the leaves, union /
//! intersection / NOT / OPTIONAL composers above them) and drains the root.
//!
//! All iterators follow the same stepwise cursor contract: `read` yields the
//! next record in ascending doc-id order, `skip_to` jumps forward, and both
//! report [`IteratorStatus`]. Term dictionaries are held in a [`TrieMap`]
//! supporting prefix, range, wildcard, contains and suffix iteration.
//!
//! # Example usage
//!
//! ```
//! use talus::{
//!     index::{IndexFlags, InvertedIndex},
//!     iterators::{new_intersection, new_reader, QueryIterator, IteratorStatus},
//!     record::FIELD_MASK_ALL,
//! };
//!
//! let quick = InvertedIndex::new(IndexFlags::STORE_FREQS).into_shared();
//! let fox = InvertedIndex::new(IndexFlags::STORE_FREQS).into_shared();
//!
//! for doc_id in [1, 2, 5, 9] {
//!     quick.write().expect("lock poisoned").add_record(doc_id, 1);
//! }
//! for doc_id in [2, 3, 9] {
//!     fox.write().expect("lock poisoned").add_record(doc_id, 1);
//! }
//!
//! let mut it = new_intersection(
//!     vec![
//!         new_reader(quick, FIELD_MASK_ALL, 1.0),
//!         new_reader(fox, FIELD_MASK_ALL, 1.0),
//!     ],
//!     -1,    // no positional constraint
//!     false, // order does not matter
//!     1.0,
//! );
//!
//! let mut hits = vec![];
//! while it.read() == IteratorStatus::Ok {
//!     hits.push(it.last_doc_id());
//! }
//! assert_eq!(vec![2, 9], hits);
//! ```

#![doc(html_root_url = "https://docs.rs/talus/0.1.0")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod binary_search;

#[doc(hidden)]
pub mod buffer;

pub mod coding;
mod config;
mod error;

#[doc(hidden)]
pub mod filter;

pub mod forward_index;

pub mod hybrid;

pub mod index;

pub mod iterators;

mod mempool;

#[doc(hidden)]
pub mod qint;

pub mod record;

mod slice;

mod time;

pub mod tokenizer;

pub mod trie;

#[doc(hidden)]
pub mod varint;

pub mod vector;

pub use {
    config::Config,
    error::{Error, Result},
    forward_index::ForwardIndex,
    index::{IndexFlags, InvertedIndex, SharedInvertedIndex},
    iterators::{AnyIterator, IteratorStatus, QueryIterator, Revalidate},
    record::{DocId, FieldMask, IndexRecord},
    slice::Slice,
    time::Deadline,
    trie::TrieMap,
};
