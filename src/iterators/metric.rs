// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Iterator over parallel `(doc_id, metric)` arrays, typically the result of
//! a vector range query. Yields in array order and attaches the metric value
//! to every record.

use super::{IteratorKind, IteratorStatus, QueryIterator, Revalidate};
use crate::record::{DocId, IndexRecord, MetricKey, RecordData};

/// Metric iterator; see the module docs.
pub struct MetricIterator {
    doc_ids: Vec<DocId>,
    metrics: Vec<f64>,
    offset: usize,
    current: IndexRecord,
    own_key: Option<MetricKey>,
    yields_metric: bool,
    at_end: bool,
}

impl MetricIterator {
    pub(crate) fn new(
        doc_ids: Vec<DocId>,
        metrics: Vec<f64>,
        own_key: Option<MetricKey>,
        yields_metric: bool,
    ) -> Self {
        debug_assert_eq!(doc_ids.len(), metrics.len());
        Self {
            doc_ids,
            metrics,
            offset: 0,
            current: IndexRecord::metric(),
            own_key,
            yields_metric,
            at_end: false,
        }
    }

    /// Sets the key under which metric values are attached (resolved by the
    /// planner once the result pipeline is known).
    pub fn set_own_key(&mut self, key: MetricKey) {
        self.own_key = Some(key);
    }

    fn yield_at(&mut self, offset: usize) -> IteratorStatus {
        let (Some(&doc_id), Some(&value)) = (self.doc_ids.get(offset), self.metrics.get(offset))
        else {
            self.at_end = true;
            return IteratorStatus::Eof;
        };

        self.current.doc_id = doc_id;
        self.current.data = RecordData::Metric(value);
        self.current.metrics.clear();
        if self.yields_metric {
            if let Some(key) = &self.own_key {
                self.current.metrics.push((key.clone(), value));
            }
        }

        self.offset = offset + 1;
        if self.offset >= self.doc_ids.len() {
            self.at_end = true;
        }
        IteratorStatus::Ok
    }
}

impl QueryIterator for MetricIterator {
    fn read(&mut self) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }
        self.yield_at(self.offset)
    }

    fn skip_to(&mut self, doc_id: DocId) -> IteratorStatus {
        if self.at_end {
            return IteratorStatus::Eof;
        }

        let mut offset = self.offset;
        loop {
            let Some(&candidate) = self.doc_ids.get(offset) else {
                self.at_end = true;
                return IteratorStatus::Eof;
            };
            if candidate >= doc_id {
                let status = self.yield_at(offset);
                debug_assert_eq!(IteratorStatus::Ok, status);
                return if candidate == doc_id {
                    IteratorStatus::Ok
                } else {
                    IteratorStatus::NotFound
                };
            }
            offset += 1;
        }
    }

    fn current(&self) -> &IndexRecord {
        &self.current
    }

    fn last_doc_id(&self) -> DocId {
        self.current.doc_id
    }

    fn num_estimated(&self) -> usize {
        self.doc_ids.len()
    }

    fn at_eof(&self) -> bool {
        self.at_end
    }

    fn rewind(&mut self) {
        self.at_end = false;
        self.offset = 0;
        self.current.doc_id = 0;
        self.current.metrics.clear();
    }

    fn abort(&mut self) {
        self.at_end = true;
    }

    fn revalidate(&mut self) -> Revalidate {
        Revalidate::Ok
    }

    fn kind(&self) -> IteratorKind {
        IteratorKind::Metric
    }
}

#[cfg(test)]
mod tests {
    use super::super::{new_metric, IteratorStatus, QueryIterator};
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn metric_yields_in_order_with_values() {
        let key: Arc<str> = Arc::from("__dist");
        let mut it = new_metric(
            vec![3, 7, 12],
            vec![0.5, 0.25, 0.75],
            Some(key.clone()),
            true,
        );

        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(3, it.last_doc_id());
        assert_eq!(vec![(key.clone(), 0.5)], it.current().metrics);
        assert_eq!(Some(0.5), it.current().value());

        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(IteratorStatus::Ok, it.read());
        assert_eq!(IteratorStatus::Eof, it.read());
    }

    #[test]
    fn metric_skip_to() {
        let mut it = new_metric(vec![3, 7, 12], vec![0.5, 0.25, 0.75], None, false);
        assert_eq!(IteratorStatus::Ok, it.skip_to(7));
        assert_eq!(IteratorStatus::NotFound, it.skip_to(8));
        assert_eq!(12, it.last_doc_id());
        assert_eq!(IteratorStatus::Eof, it.skip_to(13));
    }
}
