// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Range iteration over `[min, max]` with inclusivity flags.
//!
//! The DFS prunes by comparing the key prefix built so far against the
//! bounds: a child whose extended prefix already exceeds `max` cuts off all
//! its later siblings (children are sorted), and a child whose extended
//! prefix can never reach `min` is skipped outright. Comparison is raw
//! byte-wise lexicographic; case folding is the caller's normalization job.

use super::{Node, TrieMap};
use std::cmp::Ordering;

/// Bounds of a range query.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeBound<'k> {
    /// Bounding key, or unbounded when `None`.
    pub key: Option<&'k [u8]>,
    /// Whether the bounding key itself is part of the range.
    pub inclusive: bool,
}

impl<'k> RangeBound<'k> {
    /// An inclusive bound at `key`.
    #[must_use]
    pub fn inclusive(key: &'k [u8]) -> Self {
        Self {
            key: Some(key),
            inclusive: true,
        }
    }

    /// An exclusive bound at `key`.
    #[must_use]
    pub fn exclusive(key: &'k [u8]) -> Self {
        Self {
            key: Some(key),
            inclusive: false,
        }
    }

    /// No bound on this side.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            key: None,
            inclusive: true,
        }
    }
}

/// Can some extension of `prefix` still be `>= min`?
fn can_reach_min(prefix: &[u8], min: &[u8]) -> bool {
    let n = prefix.len().min(min.len());
    match prefix.get(..n).cmp(&min.get(..n)) {
        Ordering::Less => false,
        // equal prefixes: appending bytes can always climb to min
        _ => true,
    }
}

/// Can some extension of `prefix` still be `<= max`?
fn can_stay_below_max(prefix: &[u8], max: &[u8]) -> bool {
    let n = prefix.len().min(max.len());
    match prefix.get(..n).cmp(&max.get(..n)) {
        Ordering::Greater => false,
        Ordering::Less => true,
        // prefix == max[..n]: extensions only work while the prefix has not
        // outgrown max
        Ordering::Equal => prefix.len() <= max.len(),
    }
}

fn within(key: &[u8], min: RangeBound<'_>, max: RangeBound<'_>) -> bool {
    let above = min.key.is_none_or(|m| match key.cmp(m) {
        Ordering::Greater => true,
        Ordering::Equal => min.inclusive,
        Ordering::Less => false,
    });
    let below = max.key.is_none_or(|m| match key.cmp(m) {
        Ordering::Less => true,
        Ordering::Equal => max.inclusive,
        Ordering::Greater => false,
    });
    above && below
}

fn visit<'a, V, F>(
    node: &'a Node<V>,
    buf: &mut Vec<u8>,
    min: RangeBound<'_>,
    max: RangeBound<'_>,
    f: &mut F,
) where
    F: FnMut(&[u8], &'a V),
{
    buf.extend_from_slice(&node.edge);

    if node.is_live_terminal() && within(buf, min, max) {
        if let Some(value) = node.value.as_ref() {
            f(buf, value);
        }
    }

    for (i, child) in node.children.iter().enumerate() {
        let first = node.child_keys.get(i).copied().unwrap_or_default();
        buf.push(first);
        let viable_low = min.key.is_none_or(|m| can_reach_min(buf, m));
        let viable_high = max.key.is_none_or(|m| can_stay_below_max(buf, m));
        buf.pop();

        if !viable_high {
            // children are sorted; later siblings are even larger
            break;
        }
        if !viable_low {
            continue;
        }
        visit(child, buf, min, max, f);
    }

    buf.truncate(buf.len().saturating_sub(node.edge.len()));
}

impl<V> TrieMap<V> {
    /// Invokes `f` for every `(key, value)` with `min <= key <= max`
    /// (bounds per the inclusivity flags), in lexicographic key order.
    pub fn for_each_in_range<'a, F>(&'a self, min: RangeBound<'_>, max: RangeBound<'_>, mut f: F)
    where
        F: FnMut(&[u8], &'a V),
    {
        if let (Some(lo), Some(hi)) = (min.key, max.key) {
            match lo.cmp(hi) {
                Ordering::Greater => return,
                Ordering::Equal => {
                    // degenerate range: a point query
                    if min.inclusive && max.inclusive {
                        if let Some(value) = self.get(lo) {
                            f(lo, value);
                        }
                    }
                    return;
                }
                Ordering::Less => {}
            }
        }

        let mut buf = Vec::with_capacity(16);
        visit(self.root(), &mut buf, min, max, &mut f);
    }

    /// Collects every `(key, value)` in the range; see
    /// [`Self::for_each_in_range`].
    #[must_use]
    pub fn range(
        &self,
        min: RangeBound<'_>,
        max: RangeBound<'_>,
    ) -> Vec<(crate::slice::Slice, &V)> {
        let mut out = Vec::new();
        self.for_each_in_range(min, max, |key, value| {
            out.push((crate::slice::Slice::from(key), value));
        });
        out
    }
}
