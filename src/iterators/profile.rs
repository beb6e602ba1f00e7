// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transparent profiling wrapper.
//!
//! `read` and `skip_to` delegate to the wrapped iterator, counting calls and
//! accumulating wall time; everything else is forwarded untouched, so the
//! wrapped tree behaves exactly as if the profiler were absent.

use super::{AnyIterator, IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::record::{DocId, IndexRecord};
use std::time::{Duration, Instant};

/// Counters accumulated by a [`ProfileIterator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileStats {
    /// Number of `read` calls.
    pub read_count: usize,
    /// Number of `skip_to` calls.
    pub skip_count: usize,
    /// Whether the child reported EOF.
    pub reached_eof: bool,
    /// Wall time spent inside the child.
    pub wall_time: Duration,
}

/// Profiling wrapper; see the module docs.
pub struct ProfileIterator {
    child: Box<AnyIterator>,
    stats: ProfileStats,
}

impl ProfileIterator {
    /// Wraps a single iterator.
    #[must_use]
    pub fn wrap(child: AnyIterator) -> Self {
        Self {
            child: Box::new(child),
            stats: ProfileStats::default(),
        }
    }

    /// The counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> ProfileStats {
        self.stats
    }

    /// The wrapped iterator.
    #[must_use]
    pub fn child(&self) -> &AnyIterator {
        &self.child
    }
}

impl QueryIterator for ProfileIterator {
    fn read(&mut self) -> IteratorStatus {
        self.stats.read_count += 1;
        let begin = Instant::now();
        let status = self.child.read();
        self.stats.wall_time += begin.elapsed();
        if status == IteratorStatus::Eof {
            self.stats.reached_eof = true;
        }
        status
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        self.stats.skip_count += 1;
        let begin = Instant::now();
        let status = self.child.skip_to(doc_id);
        self.stats.wall_time += begin.elapsed();
        if status == IteratorStatus::Eof {
            self.stats.reached_eof = true;
        }
        status
    }

    fn current(&self) -> &IndexRecord {
        self.child.current()
    }

    fn last_doc_id(&self) -> DocId {
        self.child.last_doc_id()
    }

    fn num_estimated(&self) -> usize {
        self.child.num_estimated()
    }

    fn at_eof(&self) -> bool {
        self.child.at_eof()
    }

    fn rewind(&mut self) {
        self.child.rewind();
    }

    fn abort(&mut self) {
        self.child.abort();
    }

    fn revalidate(&mut self) -> Revalidate {
        self.child.revalidate()
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Profile
    }
}

/// Interposes a profiler above every node of the tree, returning the wrapped
/// root.
#[must_use]
pub fn add_profilers(it: AnyIterator) -> AnyIterator {
    let rewired = match it {
        AnyIterator::Union(mut union) => {
            let children = std::mem::take(&mut union.children);
            union.children = children.into_iter().map(add_profilers).collect();
            union.resync();
            AnyIterator::Union(union)
        }
        AnyIterator::Intersection(mut intersection) => {
            let children = std::mem::take(&mut intersection.children);
            intersection.children = children.into_iter().map(add_profilers).collect();
            AnyIterator::Intersection(intersection)
        }
        AnyIterator::Not(mut not) => {
            not.child = Box::new(add_profilers(*not.child));
            AnyIterator::Not(not)
        }
        AnyIterator::Optional(mut optional) => {
            optional.child = Box::new(add_profilers(*optional.child));
            AnyIterator::Optional(optional)
        }
        AnyIterator::Hybrid(mut hybrid) => {
            if let Some(child) = hybrid.child.take() {
                hybrid.child = Some(Box::new(add_profilers(*child)));
            }
            AnyIterator::Hybrid(hybrid)
        }
        leaf => leaf,
    };

    AnyIterator::Profile(ProfileIterator::wrap(rewired))
}
