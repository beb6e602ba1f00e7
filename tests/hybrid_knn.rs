use std::sync::Arc;
use talus::hybrid::{new_hybrid_vector, HybridParams, SearchMode};
use talus::iterators::{new_id_list, AnyIterator, IteratorStatus, QueryIterator};
use talus::record::DocId;
use talus::vector::{DistanceMetric, FlatVectorIndex, VectorIndex, VectorQuery};
use talus::Deadline;
use test_log::test;

fn grid_index(n: u64) -> Arc<FlatVectorIndex> {
    let mut index = FlatVectorIndex::new(2, DistanceMetric::L2);
    for doc_id in 1..=n {
        let x = (doc_id % 17) as f32;
        let y = (doc_id % 23) as f32;
        index.insert(doc_id, vec![x, y]);
    }
    Arc::new(index)
}

fn params(
    index: Arc<FlatVectorIndex>,
    k: usize,
    child: Option<AnyIterator>,
    mode: Option<SearchMode>,
) -> HybridParams {
    HybridParams {
        index,
        query: VectorQuery::Knn {
            vector: vec![0.0, 0.0],
            k,
        },
        score_field: Some(Arc::from("__vector_score")),
        child,
        mode,
        batch_size: None,
        ignore_scores: false,
        deadline: Deadline::none(),
    }
}

fn drain(it: &mut AnyIterator) -> Vec<(DocId, f64)> {
    let mut out = vec![];
    while it.read() == IteratorStatus::Ok {
        let distance = it
            .current()
            .metrics
            .first()
            .map(|(_, d)| *d)
            .unwrap_or(f64::NAN);
        out.push((it.last_doc_id(), distance));
    }
    out
}

/// Property 13: with no filter, the iterator yields exactly the k
/// lowest-distance docs, ascending.
#[test]
fn knn_matches_exhaustive_search() {
    let index = grid_index(500);
    let k = 10;

    // reference: brute force over everything
    let expected = index.top_k(&[0.0, 0.0], k, &Deadline::none());

    let mut it = new_hybrid_vector(params(index, k, None, None)).expect("valid");
    let got = drain(&mut it);

    assert_eq!(expected, got);
    // ascending distance
    for pair in got.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
    }
}

/// The three hybrid strategies agree with a reference filter-then-rank.
#[test]
fn hybrid_modes_agree_with_reference() {
    let index = grid_index(400);
    let filter_ids: Vec<DocId> = (1..=400).filter(|d| d % 7 == 0).collect();
    let k = 8;

    // reference: score the filtered ids, take the k best
    let mut reference: Vec<(DocId, f64)> = filter_ids
        .iter()
        .filter_map(|&doc_id| {
            index
                .distance_from(doc_id, &[0.0, 0.0])
                .map(|d| (doc_id, d))
        })
        .collect();
    reference.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    reference.truncate(k);
    let mut reference_ids: Vec<DocId> = reference.into_iter().map(|(id, _)| id).collect();
    reference_ids.sort_unstable();

    for mode in [
        None,
        Some(SearchMode::AdHocBruteForce),
        Some(SearchMode::Batches),
    ] {
        let filter = new_id_list(filter_ids.clone(), 1.0);
        let mut it =
            new_hybrid_vector(params(index.clone(), k, Some(filter), mode)).expect("valid");
        let mut ids: Vec<DocId> = drain(&mut it).into_iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        assert_eq!(reference_ids, ids, "mode {mode:?}");
    }
}

#[test]
fn hybrid_yields_descending_distance() {
    let index = grid_index(300);
    let filter = new_id_list((1..=300).collect(), 1.0);
    let mut it = new_hybrid_vector(params(
        index,
        6,
        Some(filter),
        Some(SearchMode::AdHocBruteForce),
    ))
    .expect("valid");

    let hits = drain(&mut it);
    assert_eq!(6, hits.len());
    for pair in hits.windows(2) {
        assert!(pair[0].1 >= pair[1].1, "{hits:?}");
    }
}

#[test]
fn fewer_candidates_than_k() {
    let index = grid_index(100);
    let filter = new_id_list(vec![10, 20], 1.0);
    let mut it = new_hybrid_vector(params(index, 5, Some(filter), None)).expect("valid");
    assert_eq!(2, drain(&mut it).len());
}

#[test]
fn filter_misses_vector_index_entries() {
    // filter mentions ids the vector index never saw
    let index = grid_index(50);
    let filter = new_id_list(vec![10, 999, 1000], 1.0);
    let mut it = new_hybrid_vector(params(
        index,
        5,
        Some(filter),
        Some(SearchMode::AdHocBruteForce),
    ))
    .expect("valid");

    let ids: Vec<DocId> = drain(&mut it).into_iter().map(|(id, _)| id).collect();
    assert_eq!(vec![10], ids);
}

#[test]
fn cosine_mode_normalizes_the_query() {
    let mut index = FlatVectorIndex::new(2, DistanceMetric::Cosine);
    index.insert(1, vec![1.0, 0.0]);
    index.insert(2, vec![0.0, 1.0]);
    index.insert(3, vec![1.0, 1.0]);
    let index = Arc::new(index);

    let filter = new_id_list(vec![1, 2, 3], 1.0);
    let mut it = new_hybrid_vector(HybridParams {
        index,
        query: VectorQuery::Knn {
            // deliberately unnormalized
            vector: vec![100.0, 0.0],
            k: 1,
        },
        score_field: Some(Arc::from("s")),
        child: Some(filter),
        mode: Some(SearchMode::AdHocBruteForce),
        batch_size: None,
        ignore_scores: false,
        deadline: Deadline::none(),
    })
    .expect("valid");

    assert_eq!(IteratorStatus::Ok, it.read());
    assert_eq!(1, it.last_doc_id());
}

#[test]
fn ignore_scores_yields_bare_metric_records() {
    let index = grid_index(50);
    let filter = new_id_list(vec![5, 6], 1.0);
    let mut it = new_hybrid_vector(HybridParams {
        ignore_scores: true,
        ..params(index, 2, Some(filter), Some(SearchMode::AdHocBruteForce))
    })
    .expect("valid");

    assert_eq!(IteratorStatus::Ok, it.read());
    assert!(it.current().children().is_empty());
    assert!(it.current().value().is_some());
}
