//! Online MSER evaluation over a growing component tree.
//!
//! The tree builder finalizes components bottom-up, one threshold level at a
//! time. Every finalization becomes an [`EvaluationNode`] in an arena owned by
//! [`EvaluationTree`]. Each child of the new node (the component's own previous
//! state and every component that merged into it) is first wrapped in a
//! continuation relay that repeats the child at the new node's threshold. This
//! way every branch has a node exactly at its parent's level, even when the
//! component stayed unchanged across several levels.
//!
//! Stability is measured along the history chain: the child with the largest
//! size at each node. The score of a node is its relative growth over a
//! `delta`-wide threshold window:
//!
//! ```text
//! score = (|Q_i| - |Q_{i-delta}|) / |Q_i|
//! ```
//!
//! When a node's score becomes known, each of its children is checked for
//! being a local minimum of the score along its branch. Minima are reported to
//! a [`MinimumSink`], which may turn them into MSER candidates.

use std::cmp::Ordering;
use std::fmt::Debug;

use smallvec::{smallvec, SmallVec};

use crate::component::ComponentRecord;
use crate::pixel_list::PixelList;
use crate::value::ValueOrdering;

#[cfg(test)]
mod tests;

// ============================================================================
// Constants
// ============================================================================

/// Sentinel for a node whose candidate list is not assigned yet.
const NO_LIST: usize = usize::MAX;

// ============================================================================
// Types
// ============================================================================

/// Index of a node in the [`EvaluationTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an MSER candidate created by a [`MinimumSink`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct MserId(pub usize);

/// What a node stores beyond the shared links.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Snapshot of a finalized component. Owns its pixels and moments.
    Finalized {
        pixels: PixelList,
        /// Mean pixel position per dimension.
        mean: Vec<f64>,
        /// Upper triangle (row-major, with diagonal) of the position covariance.
        cov: Vec<f64>,
    },
    /// Relay of a finalized node at its parent's threshold value.
    /// Pixels and moments are those of `of`.
    Continuation { of: NodeId },
}

#[derive(Debug, Clone)]
pub struct EvaluationNode<T> {
    value: T,
    size: usize,
    kind: NodeKind,
    /// Continuation of the component itself first, then merged components.
    children: SmallVec<[NodeId; 2]>,
    /// Largest child; the single backward path used for lookback.
    history_child: Option<NodeId>,
    parent: Option<NodeId>,
    score: Option<f64>,
    /// Index into the candidate list arena. Shared with the only child when
    /// there is exactly one.
    candidates: usize,
}

impl<T> EvaluationNode<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_continuation(&self) -> bool {
        matches!(self.kind, NodeKind::Continuation { .. })
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn history_child(&self) -> Option<NodeId> {
        self.history_child
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Relative growth over the delta window, if enough history existed.
    pub fn score(&self) -> Option<f64> {
        self.score
    }
}

/// Receiver of local minima found during evaluation.
pub trait MinimumSink<T, O> {
    /// Called at most once per node, in finalization order.
    ///
    /// Returning a candidate id replaces the node's candidate list with that
    /// single id: the new candidate stands in for everything found below it.
    fn found_new_minimum(&mut self, tree: &EvaluationTree<T, O>, node: NodeId) -> Option<MserId>;
}

/// Collects reported nodes without creating candidates.
impl<T, O> MinimumSink<T, O> for Vec<NodeId> {
    fn found_new_minimum(&mut self, _tree: &EvaluationTree<T, O>, node: NodeId) -> Option<MserId> {
        self.push(node);
        None
    }
}

// ============================================================================
// Evaluation tree
// ============================================================================

/// Arena of evaluation nodes plus the shared candidate lists.
#[derive(Debug)]
pub struct EvaluationTree<T, O> {
    ordering: O,
    dimensions: usize,
    nodes: Vec<EvaluationNode<T>>,
    candidate_lists: Vec<Vec<MserId>>,
}

impl<T, O> EvaluationTree<T, O>
where
    T: Clone + Debug,
    O: ValueOrdering<T>,
{
    pub fn new(ordering: O, dimensions: usize) -> Self {
        assert!(dimensions > 0, "image must have at least one dimension");
        Self {
            ordering,
            dimensions,
            nodes: Vec::new(),
            candidate_lists: Vec::new(),
        }
    }

    /// Turns the component's current state into an evaluation node.
    ///
    /// Relays the component's previous node and every merged child at the
    /// component's value, computes moments and score, then checks each relay
    /// for being a local minimum once this node's score is known. Registers
    /// the new node in `component` and clears its merged children.
    pub fn finalize<S>(&mut self, component: &mut ComponentRecord<T>, sink: &mut S) -> NodeId
    where
        S: MinimumSink<T, O> + ?Sized,
    {
        assert_eq!(
            component.dimensions(),
            self.dimensions,
            "component dimensionality does not match the tree"
        );
        let size = component.size();
        assert!(size > 0, "finalized component has no pixels");
        let value = component.value().clone();

        // Phase 1: construct and link.
        let mut children: SmallVec<[NodeId; 2]> = SmallVec::new();
        let mut history_child = None;
        let mut history_size = 0;

        if let Some(previous) = component.evaluation_node() {
            history_size = self.nodes[previous.index()].size;
            let relay = self.push_continuation(previous, &value);
            history_child = Some(relay);
            children.push(relay);
        }

        for child in component.children() {
            let relay = self.push_continuation(child.node, &value);
            children.push(relay);
            // Strict: the continuation of self wins ties.
            if child.size > history_size {
                history_child = Some(relay);
                history_size = child.size;
            }
        }

        let (mean, cov) = moments(component.sum_pos(), component.sum_squ_pos(), size);
        let score = self.compute_score(&value, size, history_child, false);
        let id = self.next_id();

        for &relay in &children {
            self.nodes[relay.index()].parent = Some(id);
        }
        self.nodes.push(EvaluationNode {
            value,
            size,
            kind: NodeKind::Finalized {
                pixels: component.pixels().clone(),
                mean,
                cov,
            },
            children: children.clone(),
            history_child,
            parent: None,
            score,
            candidates: NO_LIST,
        });
        component.register_evaluation_node(id);

        log::trace!(
            "finalized {:?}: value {:?}, size {}, score {:?}, {} children",
            id,
            self.nodes[id.index()].value,
            size,
            score,
            children.len()
        );

        // Phase 2: children can be judged now that this score is known.
        if score.is_some() {
            for &relay in &children {
                self.evaluate_local_minimum(relay, sink);
            }
        }

        let candidates = if children.len() == 1 {
            self.nodes[children[0].index()].candidates
        } else {
            let merged: Vec<MserId> = children
                .iter()
                .flat_map(|child| {
                    self.candidate_lists[self.nodes[child.index()].candidates]
                        .iter()
                        .copied()
                })
                .collect();
            self.push_candidate_list(merged)
        };
        self.nodes[id.index()].candidates = candidates;

        id
    }

    /// Relays finalized node `child` at `value`, sharing its statistics.
    fn push_continuation(&mut self, child: NodeId, value: &T) -> NodeId {
        let wrapped = &self.nodes[child.index()];
        assert!(
            !wrapped.is_continuation(),
            "{:?} is a continuation and cannot be relayed again",
            child
        );
        assert!(
            wrapped.parent.is_none(),
            "{:?} already has parent {:?}",
            child,
            wrapped.parent
        );
        assert_ne!(
            self.ordering.compare(&wrapped.value, value),
            Ordering::Greater,
            "child {:?} at {:?} lies above parent value {:?}",
            child,
            wrapped.value,
            value
        );

        let size = wrapped.size;
        let candidates = wrapped.candidates;
        let score = self.compute_score(value, size, Some(child), true);
        let id = self.next_id();

        self.nodes.push(EvaluationNode {
            value: value.clone(),
            size,
            kind: NodeKind::Continuation { of: child },
            children: smallvec![child],
            history_child: Some(child),
            parent: None,
            score,
            candidates,
        });
        self.nodes[child.index()].parent = Some(id);

        id
    }

    /// Looks `delta` back along the history chain.
    ///
    /// Returns `None` when the chain ends above `value - delta`. For relays,
    /// a predecessor exactly at `value - delta` is itself followed by the node
    /// below it, so the size difference is measured against a real snapshot
    /// rather than a relay at the same level.
    fn compute_score(
        &self,
        value: &T,
        size: usize,
        history_child: Option<NodeId>,
        is_intermediate: bool,
    ) -> Option<f64> {
        let target = self.ordering.value_minus_delta(value)?;

        let mut node = history_child?;
        while self.ordering.compare(&self.nodes[node.index()].value, &target) == Ordering::Greater
        {
            node = self.nodes[node.index()].history_child?;
        }

        let found = &self.nodes[node.index()];
        if is_intermediate && self.ordering.compare(&found.value, &target) == Ordering::Equal {
            if let Some(below) = found.history_child {
                node = below;
            }
        }

        let predecessor_size = self.nodes[node.index()].size;
        let growth = size
            .checked_sub(predecessor_size)
            .expect("history predecessor is larger than its successor");
        Some(growth as f64 / size as f64)
    }

    /// Reports `id` to the sink if its score is a local minimum along its branch.
    ///
    /// Runs of equal-size predecessors are skipped. The node must beat its
    /// parent strictly and tie or beat the predecessor below the run. When
    /// the branch bottoms out first, the node counts as a minimum if it lies
    /// more than `delta` above the bottom.
    fn evaluate_local_minimum<S>(&mut self, id: NodeId, sink: &mut S)
    where
        S: MinimumSink<T, O> + ?Sized,
    {
        let node = &self.nodes[id.index()];
        let Some(score) = node.score else {
            return;
        };
        let size = node.size;
        let parent = node
            .parent
            .expect("local minimum evaluation requires a parent");
        let mut below = node
            .history_child
            .expect("a scored node has history");

        loop {
            let candidate = &self.nodes[below.index()];
            if candidate.score.is_none() || candidate.size != size {
                break;
            }
            below = candidate
                .history_child
                .expect("a scored node has history");
        }

        let is_minimum = if self.nodes[below.index()].score.is_some() {
            let below = self.nodes[below.index()]
                .history_child
                .expect("a scored node has history");
            // An unscored predecessor compares as 0.
            let below_score = self.nodes[below.index()].score.unwrap_or(0.0);
            let parent_score = self.nodes[parent.index()]
                .score
                .expect("children are evaluated only after their parent is scored");
            score <= below_score && score < parent_score
        } else {
            // Bottom of the branch: the region did not exist delta below.
            let value = &self.nodes[id.index()].value;
            match self.ordering.value_minus_delta(value) {
                Some(target) => {
                    self.ordering.compare(&target, &self.nodes[below.index()].value)
                        == Ordering::Greater
                }
                None => false,
            }
        };

        if !is_minimum {
            return;
        }

        log::debug!(
            "local minimum at {:?}: value {:?}, size {}, score {:.4}",
            id,
            self.nodes[id.index()].value,
            size,
            score
        );

        if let Some(mser) = sink.found_new_minimum(self, id) {
            let list = &mut self.candidate_lists[self.nodes[id.index()].candidates];
            list.clear();
            list.push(mser);
        }
    }

    fn next_id(&self) -> NodeId {
        NodeId(u32::try_from(self.nodes.len()).expect("evaluation tree exceeds u32 nodes"))
    }

    fn push_candidate_list(&mut self, list: Vec<MserId>) -> usize {
        self.candidate_lists.push(list);
        self.candidate_lists.len() - 1
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl<T, O> EvaluationTree<T, O> {
    pub fn ordering(&self) -> &O {
        &self.ordering
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &EvaluationNode<T> {
        &self.nodes[id.index()]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn value(&self, id: NodeId) -> &T {
        &self.nodes[id.index()].value
    }

    pub fn size(&self, id: NodeId) -> usize {
        self.nodes[id.index()].size
    }

    pub fn score(&self, id: NodeId) -> Option<f64> {
        self.nodes[id.index()].score
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn history_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].history_child
    }

    /// The history chain below `id`, nearest first.
    pub fn history(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.history_child(id), move |node| {
            self.history_child(*node)
        })
    }

    /// The finalized node holding the pixels and moments of `id`.
    pub fn stats_owner(&self, id: NodeId) -> NodeId {
        match self.nodes[id.index()].kind {
            NodeKind::Finalized { .. } => id,
            NodeKind::Continuation { of } => of,
        }
    }

    pub fn pixels(&self, id: NodeId) -> &PixelList {
        match &self.nodes[self.stats_owner(id).index()].kind {
            NodeKind::Finalized { pixels, .. } => pixels,
            NodeKind::Continuation { .. } => unreachable!("relays always wrap finalized nodes"),
        }
    }

    pub fn mean(&self, id: NodeId) -> &[f64] {
        match &self.nodes[self.stats_owner(id).index()].kind {
            NodeKind::Finalized { mean, .. } => mean,
            NodeKind::Continuation { .. } => unreachable!("relays always wrap finalized nodes"),
        }
    }

    pub fn cov(&self, id: NodeId) -> &[f64] {
        match &self.nodes[self.stats_owner(id).index()].kind {
            NodeKind::Finalized { cov, .. } => cov,
            NodeKind::Continuation { .. } => unreachable!("relays always wrap finalized nodes"),
        }
    }

    /// MSER candidates found so far in the subtree of `id`.
    pub fn candidates(&self, id: NodeId) -> &[MserId] {
        &self.candidate_lists[self.nodes[id.index()].candidates]
    }
}

/// Mean and upper-triangle covariance from accumulated position sums.
fn moments(sum_pos: &[f64], sum_squ_pos: &[f64], size: usize) -> (Vec<f64>, Vec<f64>) {
    let n = sum_pos.len();
    let size = size as f64;

    let mean: Vec<f64> = sum_pos.iter().map(|sum| sum / size).collect();
    let mut cov = Vec::with_capacity(sum_squ_pos.len());
    let mut k = 0;
    for i in 0..n {
        for j in i..n {
            cov.push(sum_squ_pos[k] / size - mean[i] * mean[j]);
            k += 1;
        }
    }

    (mean, cov)
}
