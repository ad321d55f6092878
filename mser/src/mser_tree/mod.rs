//! Nested MSER output assembled from reported local minima.
//!
//! [`MserTree`] is the [`MinimumSink`] used in practice. Every local minimum
//! that passes the size and variation limits of [`MserConfig`] becomes an
//! [`Mser`]. Candidates already found inside the region become its children,
//! so the result mirrors the containment of the component tree.

use std::fmt::Debug;

use serde::Serialize;

use crate::config::{ConfigError, MserConfig};
use crate::evaluation::{EvaluationTree, MinimumSink, MserId, NodeId};
use crate::pixel_list::PixelList;


/// A maximally stable extremal region.
#[derive(Debug, Clone, Serialize)]
pub struct Mser<T> {
    /// Threshold level at which the region was found.
    pub value: T,
    pub size: usize,
    pub score: f64,
    pub mean: Vec<f64>,
    /// Upper triangle (row-major, with diagonal) of the position covariance.
    pub cov: Vec<f64>,
    pub pixels: PixelList,
    pub parent: Option<MserId>,
    pub children: Vec<MserId>,
}

#[derive(Debug)]
pub struct MserTree<T> {
    config: MserConfig,
    /// Indexed by `MserId`. Pruned entries are `None`.
    msers: Vec<Option<Mser<T>>>,
    roots: Vec<MserId>,
}

impl<T> MserTree<T> {
    pub fn new(config: MserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            msers: Vec::new(),
            roots: Vec::new(),
        })
    }

    pub fn config(&self) -> &MserConfig {
        &self.config
    }

    /// MSERs not contained in any other MSER.
    pub fn roots(&self) -> &[MserId] {
        &self.roots
    }

    pub fn get(&self, id: MserId) -> Option<&Mser<T>> {
        self.msers.get(id.0).and_then(Option::as_ref)
    }

    /// Live MSERs in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (MserId, &Mser<T>)> {
        self.msers
            .iter()
            .enumerate()
            .filter_map(|(idx, mser)| mser.as_ref().map(|mser| (MserId(idx), mser)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completes the tree once the whole image has been processed.
    pub fn finish(&mut self) {
        if self.config.min_diversity > 0.0 {
            let removed = self.prune_duplicates();
            log::debug!("pruned {} near-duplicate MSERs, {} left", removed, self.len());
        }
    }

    /// Removes parent/child pairs that differ by less than `min_diversity`.
    ///
    /// Only single-child relations are considered. Of each such pair, the one
    /// with the higher score is dropped (the parent survives ties) and the
    /// survivor takes over the dropped one's children. Returns the number of
    /// removed MSERs.
    pub fn prune_duplicates(&mut self) -> usize {
        let mut removed = 0;
        let roots = std::mem::take(&mut self.roots);
        for root in roots {
            let survivor = self.prune_subtree(root, &mut removed);
            self.mser_mut(survivor).parent = None;
            self.roots.push(survivor);
        }
        removed
    }

    /// Prunes below and at `id` post-order. Returns the MSER left in its place.
    fn prune_subtree(&mut self, id: MserId, removed: &mut usize) -> MserId {
        let children = std::mem::take(&mut self.mser_mut(id).children);
        let children: Vec<MserId> = children
            .into_iter()
            .map(|child| self.prune_subtree(child, removed))
            .collect();
        self.adopt(id, children);

        loop {
            let parent = self.mser(id);
            if parent.children.len() != 1 {
                return id;
            }
            let child_id = parent.children[0];
            let child = self.mser(child_id);
            let diversity = (parent.size - child.size) as f64 / parent.size as f64;
            if diversity >= self.config.min_diversity {
                return id;
            }

            *removed += 1;
            if child.score < parent.score {
                self.msers[id.0] = None;
                return child_id;
            }

            let grandchildren = std::mem::take(&mut self.mser_mut(child_id).children);
            self.msers[child_id.0] = None;
            self.adopt(id, grandchildren);
        }
    }

    fn adopt(&mut self, parent: MserId, children: Vec<MserId>) {
        for &child in &children {
            self.mser_mut(child).parent = Some(parent);
        }
        self.mser_mut(parent).children = children;
    }

    fn mser(&self, id: MserId) -> &Mser<T> {
        self.get(id).expect("MSER was pruned")
    }

    fn mser_mut(&mut self, id: MserId) -> &mut Mser<T> {
        self.msers[id.0].as_mut().expect("MSER was pruned")
    }
}

impl<T, O> MinimumSink<T, O> for MserTree<T>
where
    T: Clone + Debug,
{
    fn found_new_minimum(&mut self, tree: &EvaluationTree<T, O>, node: NodeId) -> Option<MserId> {
        let size = tree.size(node);
        let score = tree
            .score(node)
            .expect("only scored nodes are reported as minima");

        if size < self.config.min_size || size > self.config.max_size || score > self.config.max_var
        {
            log::debug!(
                "rejected minimum at value {:?}: size {}, score {:.4}",
                tree.value(node),
                size,
                score
            );
            return None;
        }

        let id = MserId(self.msers.len());
        let children = tree.candidates(node).to_vec();
        for &child in &children {
            let child = self.mser_mut(child);
            assert!(child.parent.is_none(), "candidate already nested");
            child.parent = Some(id);
        }
        self.roots.retain(|root| !children.contains(root));
        self.roots.push(id);

        log::debug!(
            "MSER {:?} at value {:?}: size {}, score {:.4}, {} children",
            id,
            tree.value(node),
            size,
            score,
            children.len()
        );

        self.msers.push(Some(Mser {
            value: tree.value(node).clone(),
            size,
            score,
            mean: tree.mean(node).to_vec(),
            cov: tree.cov(node).to_vec(),
            pixels: tree.pixels(node).clone(),
            parent: None,
            children,
        }));

        Some(id)
    }
}
