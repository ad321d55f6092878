//! Tests for the evaluation tree.

use common::FloatExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::value::ThresholdOrdering;

type Tree = EvaluationTree<i32, ThresholdOrdering<i32>>;

/// Hands out distinct pixel indices laid out on a 16-wide grid.
#[derive(Default)]
struct PixelSource {
    next: usize,
}

impl PixelSource {
    fn grow<T>(&mut self, component: &mut ComponentRecord<T>, to_size: usize) {
        while component.size() < to_size {
            let index = self.next;
            self.next += 1;
            component.add_pixel(index, &[(index % 16) as f64, (index / 16) as f64]);
        }
    }
}

/// Sink that turns every reported node into a candidate.
#[derive(Default)]
struct CandidateSink {
    reported: Vec<NodeId>,
}

impl<T, O> MinimumSink<T, O> for CandidateSink {
    fn found_new_minimum(&mut self, _tree: &EvaluationTree<T, O>, node: NodeId) -> Option<MserId> {
        self.reported.push(node);
        Some(MserId(self.reported.len() - 1))
    }
}

/// Finalizes one component at each of `values` with the matching sizes.
fn build_chain(
    tree: &mut Tree,
    values: &[i32],
    sizes: &[usize],
    sink: &mut impl MinimumSink<i32, ThresholdOrdering<i32>>,
) -> Vec<NodeId> {
    assert_eq!(values.len(), sizes.len());
    let mut pixels = PixelSource::default();
    let mut component = ComponentRecord::new(values[0], 2);

    let mut finalized = Vec::with_capacity(values.len());
    for (&value, &size) in values.iter().zip(sizes) {
        component.set_value(value);
        pixels.grow(&mut component, size);
        finalized.push(tree.finalize(&mut component, sink));
    }
    finalized
}

fn assert_tree_invariants<O: ValueOrdering<i32>>(tree: &EvaluationTree<i32, O>) {
    for id in tree.node_ids() {
        assert_eq!(tree.pixels(id).len(), tree.size(id), "{:?}", id);

        if let Some(parent) = tree.parent(id) {
            assert!(tree.size(parent) >= tree.size(id), "{:?}", id);
            assert_ne!(
                tree.ordering().compare(tree.value(parent), tree.value(id)),
                Ordering::Less,
                "{:?}",
                id
            );
            assert!(tree.children(parent).contains(&id));
        }

        if let Some(history) = tree.history_child(id) {
            assert!(tree.size(history) <= tree.size(id));
            assert!(tree.children(id).contains(&history));
        }

        if let Some(score) = tree.score(id) {
            assert!((0.0..1.0).contains(&score), "{:?} score {}", id, score);
        }
    }
}

#[test]
fn test_linear_chain_scores_and_single_minimum() {
    let sizes = [1, 1, 2, 2, 2, 5, 5, 6];
    let values: Vec<i32> = (0..8).collect();
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(2), 2);
    let mut reported: Vec<NodeId> = Vec::new();

    let finalized = build_chain(&mut tree, &values, &sizes, &mut reported);

    for (i, &id) in finalized.iter().enumerate() {
        let target = values[i] - 2;
        let Some(j) = values[..i].iter().rposition(|&v| v <= target) else {
            assert_eq!(tree.score(id), None, "index {} has no history", i);
            continue;
        };
        let expected = (sizes[i] - sizes[j]) as f64 / sizes[i] as f64;
        let score = tree.score(id).expect("score should be valid");
        assert!(
            score.approximately_eq(expected),
            "index {}: score {} expected {}",
            i,
            score,
            expected
        );
    }

    // Scores 0.5, 0.5, 0.0, 0.6, ...: the minimum is the size-2 region
    // finalized at index 4, reported through its relay at the next level.
    assert_eq!(reported.len(), 1, "reported {:?}", reported);
    let minimum = reported[0];
    assert!(tree.node(minimum).is_continuation());
    assert_eq!(tree.stats_owner(minimum), finalized[4]);
    assert_eq!(*tree.value(minimum), 5);
    assert_eq!(tree.size(minimum), 2);
    assert_eq!(tree.score(minimum), Some(0.0));
    assert_eq!(tree.parent(minimum), Some(finalized[5]));

    assert_tree_invariants(&tree);
}

#[test]
fn test_relays_share_statistics_with_wrapped_node() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let finalized = build_chain(&mut tree, &[0, 3], &[2, 5], &mut reported);

    let relay = tree.children(finalized[1])[0];
    assert!(tree.node(relay).is_continuation());
    assert_eq!(*tree.value(relay), 3);
    assert_eq!(tree.size(relay), 2);
    assert_eq!(tree.stats_owner(relay), finalized[0]);
    assert!(std::ptr::eq(tree.mean(relay), tree.mean(finalized[0])));
    assert!(std::ptr::eq(tree.cov(relay), tree.cov(finalized[0])));
    assert!(std::ptr::eq(tree.pixels(relay), tree.pixels(finalized[0])));
    assert_eq!(tree.history_child(relay), Some(finalized[0]));
    assert_eq!(tree.parent(finalized[0]), Some(relay));
    assert_eq!(tree.parent(finalized[1]), None);
}

#[test]
fn test_merge_picks_larger_history_and_propagates_candidates() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut sink = CandidateSink::default();
    let mut pixels = PixelSource::default();

    let mut a = ComponentRecord::new(1, 2);
    let mut b = ComponentRecord::new(1, 2);
    let mut last_b = None;
    for (value, size_a, size_b) in [(1, 1, 1), (2, 2, 1), (3, 3, 4)] {
        a.set_value(value);
        pixels.grow(&mut a, size_a);
        tree.finalize(&mut a, &mut sink);

        b.set_value(value);
        pixels.grow(&mut b, size_b);
        last_b = Some(tree.finalize(&mut b, &mut sink));
    }
    let last_b = last_b.unwrap();
    let last_a = a.evaluation_node().unwrap();

    // The smaller chain only hits the bottom-of-branch case at value 3.
    let b_relay = tree.history_child(last_b).unwrap();
    assert_eq!(sink.reported, vec![b_relay]);
    assert_eq!(tree.candidates(last_b), &[MserId(0)]);
    assert!(tree.candidates(last_a).is_empty());

    a.set_value(4);
    a.merge(b);
    assert_eq!(a.size(), 7);
    pixels.grow(&mut a, 8);
    let merged = tree.finalize(&mut a, &mut sink);

    assert_eq!(tree.size(merged), 8);
    assert_eq!(tree.children(merged).len(), 2);
    let [self_relay, b_merge_relay] = [tree.children(merged)[0], tree.children(merged)[1]];
    assert_eq!(tree.stats_owner(self_relay), last_a);
    assert_eq!(tree.stats_owner(b_merge_relay), last_b);

    // The size-4 chain carries the history even though it merged in second.
    assert_eq!(tree.history_child(merged), Some(b_merge_relay));
    assert!(tree.score(merged).unwrap().approximately_eq(0.5));

    // The size-3 chain becomes a minimum once the merged score is known.
    assert!(tree.score(self_relay).unwrap().approximately_eq(1.0 / 3.0));
    assert_eq!(sink.reported, vec![b_relay, self_relay]);

    // Both minima reach the merged node exactly once, self continuation first.
    assert_eq!(tree.candidates(merged), &[MserId(1), MserId(0)]);

    assert_tree_invariants(&tree);
}

#[test]
fn test_tie_in_size_keeps_self_continuation_as_history() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let mut pixels = PixelSource::default();

    let mut a = ComponentRecord::new(0, 2);
    let mut b = ComponentRecord::new(0, 2);
    pixels.grow(&mut a, 3);
    pixels.grow(&mut b, 3);
    tree.finalize(&mut a, &mut reported);
    tree.finalize(&mut b, &mut reported);

    a.set_value(1);
    a.merge(b);
    let merged = tree.finalize(&mut a, &mut reported);

    assert_eq!(tree.history_child(merged), Some(tree.children(merged)[0]));
}

#[test]
fn test_plateau_reports_only_where_run_ends() {
    let sizes = [1, 2, 3, 5, 5, 5, 5, 12, 13];
    let values: Vec<i32> = (0..9).collect();
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();

    let finalized = build_chain(&mut tree, &values, &sizes, &mut reported);

    let reported_sizes: Vec<usize> = reported.iter().map(|&id| tree.size(id)).collect();
    assert_eq!(reported_sizes, vec![3, 5]);

    // The size-5 run spans levels 3..=6; only its last relay is reported.
    assert_eq!(tree.stats_owner(reported[0]), finalized[2]);
    assert_eq!(tree.stats_owner(reported[1]), finalized[6]);
    assert_eq!(*tree.value(reported[1]), 7);

    assert_tree_invariants(&tree);
}

#[test]
fn test_each_node_reported_at_most_once() {
    let mut rng = StdRng::seed_from_u64(17);

    for _ in 0..20 {
        let len = rng.random_range(2..40);
        let mut size = 1;
        let mut sizes = Vec::with_capacity(len);
        for _ in 0..len {
            size += rng.random_range(0..4);
            sizes.push(size);
        }
        let values: Vec<i32> = (0..len as i32).map(|v| v * 2).collect();
        let delta = rng.random_range(1..6);

        let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(delta), 2);
        let mut sink = CandidateSink::default();
        let finalized = build_chain(&mut tree, &values, &sizes, &mut sink);

        let mut unique = sink.reported.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), sink.reported.len());

        // The top node sees every candidate found below it, once.
        let mut top: Vec<MserId> = tree.candidates(*finalized.last().unwrap()).to_vec();
        top.sort();
        top.dedup();
        assert_eq!(top.len(), tree.candidates(*finalized.last().unwrap()).len());

        assert_tree_invariants(&tree);
    }
}

#[test]
fn test_single_seed_never_scores() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(3), 2);
    let mut reported: Vec<NodeId> = Vec::new();

    let finalized = build_chain(&mut tree, &[0], &[1], &mut reported);

    assert_eq!(tree.len(), 1);
    assert_eq!(tree.score(finalized[0]), None);
    assert!(tree.children(finalized[0]).is_empty());
    assert!(tree.candidates(finalized[0]).is_empty());
    assert!(reported.is_empty());
}

#[test]
fn test_branch_bottom_reported_only_beyond_delta() {
    // Next level within delta of the seed: no valid score at all.
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(3), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let finalized = build_chain(&mut tree, &[0, 2], &[1, 2], &mut reported);
    assert_eq!(tree.score(finalized[1]), None);
    assert!(reported.is_empty());

    // Exactly delta above the seed: scored, but not beyond the bottom.
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(3), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let finalized = build_chain(&mut tree, &[0, 3], &[1, 2], &mut reported);
    let relay = tree.children(finalized[1])[0];
    assert_eq!(tree.score(relay), Some(0.0));
    assert!(tree.score(finalized[1]).unwrap().approximately_eq(0.5));
    assert!(reported.is_empty());

    // More than delta above the seed: the relay is taken as a minimum.
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(3), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let finalized = build_chain(&mut tree, &[0, 5], &[1, 3], &mut reported);
    let relay = tree.children(finalized[1])[0];
    assert_eq!(tree.score(finalized[0]), None);
    assert_eq!(tree.score(relay), Some(0.0));
    assert_eq!(reported, vec![relay]);
}

#[test]
fn test_unsigned_values_near_zero() {
    let mut tree = EvaluationTree::new(ThresholdOrdering::dark_to_bright(3u8), 1);
    let mut reported: Vec<NodeId> = Vec::new();
    let mut component = ComponentRecord::new(0u8, 1);

    component.add_pixel(0, &[0.0]);
    let seed = tree.finalize(&mut component, &mut reported);
    component.set_value(2);
    component.add_pixel(1, &[1.0]);
    let next = tree.finalize(&mut component, &mut reported);

    assert_eq!(tree.score(seed), None);
    assert_eq!(tree.score(next), None);
    assert_eq!(tree.score(tree.children(next)[0]), None);
    assert!(reported.is_empty());
}

#[test]
fn test_bright_to_dark_mirrors_dark_to_bright() {
    let sizes = [1, 1, 2, 2, 2, 5, 5, 6];

    let mut forward = Tree::new(ThresholdOrdering::dark_to_bright(2), 2);
    let mut forward_reported: Vec<NodeId> = Vec::new();
    let values: Vec<i32> = (0..8).collect();
    let forward_ids = build_chain(&mut forward, &values, &sizes, &mut forward_reported);

    let mut backward = Tree::new(ThresholdOrdering::bright_to_dark(2), 2);
    let mut backward_reported: Vec<NodeId> = Vec::new();
    let mirrored: Vec<i32> = values.iter().map(|v| 255 - v).collect();
    let backward_ids = build_chain(&mut backward, &mirrored, &sizes, &mut backward_reported);

    for (f, b) in forward_ids.iter().zip(&backward_ids) {
        assert_eq!(forward.score(*f), backward.score(*b));
    }
    assert_eq!(backward_reported.len(), 1);
    assert_eq!(*backward.value(backward_reported[0]), 250);
    assert_eq!(backward.size(backward_reported[0]), 2);

    assert_tree_invariants(&backward);
}

#[test]
fn test_mean_and_covariance_match_pixel_positions() {
    let mut rng = StdRng::seed_from_u64(3);

    for n in 1..=3 {
        let mut tree = EvaluationTree::new(ThresholdOrdering::dark_to_bright(1), n);
        let mut reported: Vec<NodeId> = Vec::new();
        let mut component = ComponentRecord::new(0, n);

        let count = rng.random_range(1..60);
        let positions: Vec<Vec<f64>> = (0..count)
            .map(|_| (0..n).map(|_| rng.random_range(0..100) as f64).collect())
            .collect();
        for (index, position) in positions.iter().enumerate() {
            component.add_pixel(index, position);
        }
        let id = tree.finalize(&mut component, &mut reported);

        let size = count as f64;
        let mean: Vec<f64> = (0..n)
            .map(|i| positions.iter().map(|p| p[i]).sum::<f64>() / size)
            .collect();
        let mut k = 0;
        for i in 0..n {
            assert!(
                tree.mean(id)[i].approximately_eq(mean[i]),
                "mean[{}]: {} vs {}",
                i,
                tree.mean(id)[i],
                mean[i]
            );
            for j in i..n {
                let expected = positions
                    .iter()
                    .map(|p| (p[i] - mean[i]) * (p[j] - mean[j]))
                    .sum::<f64>()
                    / size;
                let actual = tree.cov(id)[k];
                assert!(
                    (actual - expected).abs() < 1e-6 * expected.abs().max(1.0),
                    "cov[{}]: {} vs {}",
                    k,
                    actual,
                    expected
                );
                k += 1;
            }
        }
        assert_eq!(tree.cov(id).len(), n * (n + 1) / 2);
        assert_eq!(tree.size(id), count);
    }
}

#[test]
fn test_history_walks_relays_and_snapshots() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let finalized = build_chain(&mut tree, &[0, 1, 2], &[1, 2, 3], &mut reported);

    let history: Vec<i32> = tree.history(finalized[2]).map(|id| *tree.value(id)).collect();
    assert_eq!(history, vec![2, 1, 1, 0]);
    assert_eq!(tree.history(finalized[0]).count(), 0);
}

#[test]
#[should_panic(expected = "lies above parent value")]
fn test_decreasing_threshold_is_rejected() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    build_chain(&mut tree, &[3, 2], &[1, 2], &mut reported);
}

#[test]
#[should_panic(expected = "has no pixels")]
fn test_empty_component_is_rejected() {
    let mut tree = Tree::new(ThresholdOrdering::dark_to_bright(1), 2);
    let mut reported: Vec<NodeId> = Vec::new();
    let mut component = ComponentRecord::new(0, 2);
    tree.finalize(&mut component, &mut reported);
}
