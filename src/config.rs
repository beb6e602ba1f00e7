// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Runtime tunables for the query core.
///
/// One instance is typically created at process startup and shared by
/// reference into the constructors that consult it.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Unions with more children than this switch from the flat child array
    /// to a min-heap keyed by each child's current doc id.
    pub min_union_iterator_heap: usize,

    /// Store doc-ids-only indexes as raw 4-byte little-endian deltas from the
    /// block anchor instead of varints. Denser skips, larger blocks.
    pub raw_doc_id_encoding: bool,

    /// Allow the numeric codec to store a float as 4 bytes when the absolute
    /// error of the narrowing is below 0.01.
    pub compress_floats: bool,

    /// When sorting intersection children by estimated cardinality, weigh a
    /// union child by its fan-out so wide unions are stepped last.
    pub prioritize_intersect_union_children: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_union_iterator_heap: 20,
            raw_doc_id_encoding: false,
            compress_floats: false,
            prioritize_intersect_union_children: false,
        }
    }
}

impl Config {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the union heap threshold.
    #[must_use]
    pub fn with_union_heap_threshold(mut self, n: usize) -> Self {
        self.min_union_iterator_heap = n;
        self
    }

    /// Toggles raw doc-id encoding for doc-ids-only indexes.
    #[must_use]
    pub fn with_raw_doc_id_encoding(mut self, enabled: bool) -> Self {
        self.raw_doc_id_encoding = enabled;
        self
    }

    /// Toggles lossy 4-byte float compression.
    #[must_use]
    pub fn with_float_compression(mut self, enabled: bool) -> Self {
        self.compress_floats = enabled;
        self
    }
}
