// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Trie iteration: prefix, wildcard, contains and suffix modes.
//!
//! All modes run a stack-based DFS sharing one key buffer. Each frame tracks
//! how many bytes it contributed, so popping trims the buffer back without
//! reallocation. Yields hand out an owned copy of the key; values borrow
//! from the trie.

use super::wildcard::{fixed_match_len, has_trailing_star, match_prefix, MatchResult};
use super::Node;
use crate::slice::Slice;
use crate::time::{Deadline, TimeoutCounter};

#[derive(PartialEq, Eq, Clone, Copy)]
enum Step {
    Edge,
    Children,
}

struct Frame<'a, V> {
    node: &'a Node<V>,
    state: Step,
    /// Bytes of this node's edge consumed (and pushed onto the shared
    /// buffer) so far; popping trims exactly this many.
    string_offset: usize,
    child_offset: usize,
    found: bool,
}

impl<'a, V> Frame<'a, V> {
    fn new(node: &'a Node<V>, found: bool) -> Self {
        Self {
            node,
            state: Step::Edge,
            string_offset: 0,
            child_offset: 0,
            found,
        }
    }
}

fn pop_frame<V>(stack: &mut Vec<Frame<'_, V>>, buf: &mut Vec<u8>) {
    if let Some(frame) = stack.pop() {
        buf.truncate(buf.len().saturating_sub(frame.string_offset));
    }
}

/// DFS over all keys sharing a prefix, in lexicographic order.
pub struct PrefixIter<'a, V> {
    prefix: Vec<u8>,
    buf: Vec<u8>,
    stack: Vec<Frame<'a, V>>,
    timeout: TimeoutCounter,
}

impl<'a, V> PrefixIter<'a, V> {
    pub(crate) fn new(root: &'a Node<V>, prefix: &[u8]) -> Self {
        Self {
            prefix: prefix.to_vec(),
            buf: Vec::with_capacity(16),
            stack: vec![Frame::new(root, false)],
            timeout: TimeoutCounter::default(),
        }
    }

    /// Fan-out construction: iterate every descendant of `node`, with the
    /// key buffer pre-seeded (the node's own edge included).
    pub(crate) fn seeded(node: &'a Node<V>, buf: Vec<u8>) -> Self {
        let mut frame = Frame::new(node, true);
        frame.string_offset = node.edge.len();
        Self {
            prefix: Vec::new(),
            buf,
            stack: vec![frame],
            timeout: TimeoutCounter::default(),
        }
    }

    /// Attaches a deadline; iteration stops (yields `None`) once crossed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.timeout = TimeoutCounter::new(deadline);
        self
    }
}

impl<'a, V> Iterator for PrefixIter<'a, V> {
    type Item = (Slice, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        'outer: while !self.stack.is_empty() {
            if self.timeout.tick() {
                return None;
            }

            // edge phase: consume the node's edge while verifying the prefix
            {
                let frame = self.stack.last_mut()?;
                if frame.state == Step::Edge {
                    while frame.string_offset < frame.node.edge.len() {
                        let byte = frame
                            .node
                            .edge
                            .get(frame.string_offset)
                            .copied()
                            .unwrap_or_default();
                        if !frame.found {
                            if self.prefix.get(self.buf.len()) != Some(&byte) {
                                pop_frame(&mut self.stack, &mut self.buf);
                                continue 'outer;
                            }
                            if self.buf.len() + 1 == self.prefix.len() {
                                frame.found = true;
                            }
                        }
                        self.buf.push(byte);
                        frame.string_offset += 1;
                    }

                    if self.buf.len() >= self.prefix.len() {
                        frame.found = true;
                    }
                    frame.state = Step::Children;

                    if frame.found && frame.node.is_live_terminal() {
                        if let Some(value) = frame.node.value.as_ref() {
                            return Some((Slice::from(self.buf.as_slice()), value));
                        }
                    }
                }
            }

            // children phase: descend into the next matching child
            let pushed = {
                let frame = self.stack.last_mut()?;
                let mut pushed = None;
                while frame.child_offset < frame.node.children.len() {
                    let i = frame.child_offset;
                    frame.child_offset += 1;

                    let viable = frame.found
                        || frame.node.child_keys.get(i) == self.prefix.get(self.buf.len());
                    if viable {
                        if !frame.found {
                            // only one child can continue the prefix
                            frame.child_offset = frame.node.children.len();
                        }
                        if let Some(child) = frame.node.children.get(i) {
                            pushed = Some((&**child, frame.found));
                        }
                        break;
                    }
                }
                pushed
            };

            match pushed {
                Some((child, found)) => self.stack.push(Frame::new(child, found)),
                None => pop_frame(&mut self.stack, &mut self.buf),
            }
        }
        None
    }
}

/// DFS over all keys matching a glob pattern.
pub struct WildcardIter<'a, V> {
    pattern: Vec<u8>,
    fixed_len: Option<usize>,
    trailing_star: bool,
    buf: Vec<u8>,
    stack: Vec<Frame<'a, V>>,
    timeout: TimeoutCounter,
}

impl<'a, V> WildcardIter<'a, V> {
    pub(crate) fn new(root: &'a Node<V>, pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
            fixed_len: fixed_match_len(pattern),
            trailing_star: has_trailing_star(pattern),
            buf: Vec::with_capacity(16),
            stack: vec![Frame::new(root, false)],
            timeout: TimeoutCounter::default(),
        }
    }

    /// Attaches a deadline; iteration stops (yields `None`) once crossed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.timeout = TimeoutCounter::new(deadline);
        self
    }
}

impl<'a, V> Iterator for WildcardIter<'a, V> {
    type Item = (Slice, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        'outer: while !self.stack.is_empty() {
            if self.timeout.tick() {
                return None;
            }

            // a fixed-length pattern bounds the key length; children add at
            // least one byte each
            if let Some(limit) = self.fixed_len {
                let frame = self.stack.last()?;
                let pending = if frame.state == Step::Edge {
                    frame.node.edge.len()
                } else {
                    1
                };
                if self.buf.len() + pending > limit {
                    pop_frame(&mut self.stack, &mut self.buf);
                    continue 'outer;
                }
            }

            {
                let frame = self.stack.last_mut()?;
                if frame.state == Step::Edge {
                    self.buf.extend_from_slice(&frame.node.edge);
                    frame.string_offset = frame.node.edge.len();
                    frame.state = Step::Children;

                    let verdict = if frame.found {
                        MatchResult::FullMatch
                    } else {
                        match_prefix(&self.pattern, &self.buf)
                    };

                    match verdict {
                        MatchResult::NoMatch => {
                            pop_frame(&mut self.stack, &mut self.buf);
                            continue 'outer;
                        }
                        MatchResult::FullMatch => {
                            // with a trailing star every descendant matches
                            if self.trailing_star {
                                frame.found = true;
                            }
                            if frame.node.is_live_terminal() {
                                if let Some(value) = frame.node.value.as_ref() {
                                    return Some((Slice::from(self.buf.as_slice()), value));
                                }
                            }
                            if self.fixed_len.is_some() {
                                // exact-length match; nothing below can fit
                                pop_frame(&mut self.stack, &mut self.buf);
                                continue 'outer;
                            }
                        }
                        MatchResult::PartialMatch => {}
                    }
                }
            }

            let pushed = {
                let frame = self.stack.last_mut()?;
                let i = frame.child_offset;
                frame.child_offset += 1;
                frame
                    .node
                    .children
                    .get(i)
                    .map(|child| (&**child, frame.found))
            };

            match pushed {
                Some((child, found)) => self.stack.push(Frame::new(child, found)),
                None => pop_frame(&mut self.stack, &mut self.buf),
            }
        }
        None
    }
}

/// Linear scan for keys containing (or ending with) an affix.
pub struct ContainsIter<'a, V> {
    pattern: Vec<u8>,
    suffix_mode: bool,
    buf: Vec<u8>,
    stack: Vec<Frame<'a, V>>,
    sub: Option<Box<PrefixIter<'a, V>>>,
    timeout: TimeoutCounter,
}

impl<'a, V> ContainsIter<'a, V> {
    pub(crate) fn new(root: &'a Node<V>, pattern: &[u8], suffix_mode: bool) -> Self {
        // every key contains (and ends with) the empty affix
        let (stack, sub) = if pattern.is_empty() {
            (
                Vec::new(),
                Some(Box::new(PrefixIter::new(root, b""))),
            )
        } else {
            (vec![Frame::new(root, false)], None)
        };

        Self {
            pattern: pattern.to_vec(),
            suffix_mode,
            buf: Vec::with_capacity(16),
            stack,
            sub,
            timeout: TimeoutCounter::default(),
        }
    }

    /// Attaches a deadline; iteration stops (yields `None`) once crossed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.timeout = TimeoutCounter::new(deadline);
        self
    }

    /// The first pattern byte just matched at the buffer's end; try to
    /// consume the remaining pattern from `local_offset` within `node`,
    /// descending into children as needed.
    fn try_match_at(&mut self, node: &'a Node<V>, local_offset: usize) -> Option<(Slice, &'a V)> {
        let mut n = node;
        let mut local = local_offset;
        let mut term_offset = 1usize;
        let mut compare_len = 0usize;

        while term_offset < self.pattern.len() {
            let global_remain = self.pattern.len() - term_offset;
            let local_remain = n.edge.len() - local;
            compare_len = global_remain.min(local_remain);

            if n.edge.get(local..local + compare_len)
                != self.pattern.get(term_offset..term_offset + compare_len)
            {
                return None;
            }
            term_offset += compare_len;

            if term_offset < self.pattern.len() {
                let next_byte = self.pattern.get(term_offset).copied()?;
                let i = n.child_index(next_byte)?;
                n = n.children.get(i)?;
                local = 0;
            }
        }

        let tail = self.pattern.get(1..).unwrap_or_default();

        if self.suffix_mode {
            // a suffix hit must end exactly at a terminal
            if local + compare_len == n.edge.len() && n.is_live_terminal() {
                let mut key = self.buf.clone();
                key.extend_from_slice(tail);
                return Some((Slice::from(key), n.value.as_ref()?));
            }
            return None;
        }

        // contains: every descendant of the match point is a hit
        let mut seeded = self.buf.clone();
        seeded.extend_from_slice(tail);
        if let Some(rest) = n.edge.get(local + compare_len..) {
            seeded.extend_from_slice(rest);
        }
        self.sub = Some(Box::new(PrefixIter::seeded(n, seeded)));
        self.sub.as_mut()?.next()
    }
}

impl<'a, V> Iterator for ContainsIter<'a, V> {
    type Item = (Slice, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sub) = self.sub.as_mut() {
                if let Some(hit) = sub.next() {
                    return Some(hit);
                }
                self.sub = None;
            }
            if self.stack.is_empty() {
                return None;
            }
            if self.timeout.tick() {
                return None;
            }

            // one scan step: a single edge byte, a child push, or a pop
            let hit_at = {
                let frame = self.stack.last_mut()?;
                if frame.state == Step::Edge {
                    if frame.string_offset < frame.node.edge.len() {
                        let byte = frame
                            .node
                            .edge
                            .get(frame.string_offset)
                            .copied()
                            .unwrap_or_default();
                        frame.string_offset += 1;
                        self.buf.push(byte);

                        if Some(&byte) == self.pattern.first() {
                            Some((frame.node, frame.string_offset))
                        } else {
                            continue;
                        }
                    } else {
                        frame.state = Step::Children;
                        None
                    }
                } else {
                    None
                }
            };

            if let Some((node, local_offset)) = hit_at {
                if let Some(hit) = self.try_match_at(node, local_offset) {
                    return Some(hit);
                }
                continue;
            }

            let pushed = {
                let frame = self.stack.last_mut()?;
                if frame.state != Step::Children {
                    continue;
                }
                let i = frame.child_offset;
                frame.child_offset += 1;
                frame.node.children.get(i).map(|child| &**child)
            };

            match pushed {
                Some(child) => self.stack.push(Frame::new(child, false)),
                None => pop_frame(&mut self.stack, &mut self.buf),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::TrieMap;
    use test_log::test;

    fn sample() -> TrieMap<u32> {
        let mut trie = TrieMap::new();
        for (i, key) in [
            "bike", "biker", "bis", "band", "bandana", "banana", "sandal", "anagram",
        ]
        .iter()
        .enumerate()
        {
            #[allow(clippy::cast_possible_truncation)]
            trie.insert(key.as_bytes(), i as u32);
        }
        trie
    }

    /// Sorted, deduplicated key strings. Contains scans may surface a key
    /// once per pattern occurrence; set semantics are the planner's job.
    fn keys<'a>(hits: impl Iterator<Item = (crate::Slice, &'a u32)>) -> Vec<String> {
        let mut out: Vec<String> = hits
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    #[test]
    fn prefix_iteration() {
        let trie = sample();
        assert_eq!(vec!["band", "bandana"], keys(trie.iter_prefix(b"band")));
        assert_eq!(
            vec!["banana", "band", "bandana", "bike", "biker", "bis"],
            keys(trie.iter_prefix(b"b"))
        );
        assert!(keys(trie.iter_prefix(b"zzz")).is_empty());
    }

    #[test]
    fn prefix_iteration_is_lexicographic() {
        let trie = sample();
        let in_order: Vec<String> = trie
            .iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect();
        let mut sorted = in_order.clone();
        sorted.sort();
        assert_eq!(sorted, in_order);
        assert_eq!(8, in_order.len());
    }

    #[test]
    fn wildcard_question_mark() {
        let trie = sample();
        assert_eq!(vec!["bike"], keys(trie.iter_wildcard(b"bik?")));
        assert_eq!(vec!["band"], keys(trie.iter_wildcard(b"b?nd")));
    }

    #[test]
    fn wildcard_star() {
        let trie = sample();
        assert_eq!(
            vec!["banana", "band", "bandana", "bike", "biker", "bis"],
            keys(trie.iter_wildcard(b"b*"))
        );
        assert_eq!(
            vec!["anagram", "banana", "bandana"],
            keys(trie.iter_wildcard(b"*na*"))
        );
        assert_eq!(vec!["anagram", "sandal"], keys(trie.iter_wildcard(b"*a?")));
    }

    #[test]
    fn contains_iteration() {
        let trie = sample();
        assert_eq!(
            vec!["anagram", "banana", "band", "bandana", "sandal"],
            keys(trie.iter_contains(b"an"))
        );
        assert_eq!(vec!["bike", "biker"], keys(trie.iter_contains(b"bik")));
    }

    #[test]
    fn suffix_iteration() {
        let trie = sample();
        assert_eq!(vec!["banana", "bandana"], keys(trie.iter_suffix(b"ana")));
        assert_eq!(vec!["biker"], keys(trie.iter_suffix(b"ker")));
        assert!(keys(trie.iter_suffix(b"xyz")).is_empty());
    }

    #[test]
    fn empty_affixes_mean_everything() {
        let trie = sample();
        assert_eq!(8, trie.iter_contains(b"").count());
        assert_eq!(8, trie.iter_suffix(b"").count());
    }

    #[test]
    fn deleted_keys_are_not_yielded() {
        let mut trie = sample();
        trie.remove(b"banana");
        assert!(!keys(trie.iter_prefix(b"ban")).contains(&"banana".to_string()));
        assert!(!keys(trie.iter_wildcard(b"*ana")).contains(&"banana".to_string()));
    }
}
