//! The growing connected component handed over by the tree builder.
//!
//! A [`ComponentRecord`] accumulates pixels and position moments while the
//! builder floods the image. Each time the builder is done with a threshold
//! level it finalizes the record into the evaluation tree, which snapshots the
//! record into an immutable node and stores that node's id back in the record
//! so the next finalization can continue from it.

use smallvec::SmallVec;

use crate::evaluation::NodeId;
use crate::pixel_list::PixelList;

/// A finalized component that merged into this one since the last finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentChild {
    pub node: NodeId,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct ComponentRecord<T> {
    value: T,
    pixels: PixelList,
    /// Per-dimension sum of pixel positions.
    sum_pos: Vec<f64>,
    /// Upper triangle (row-major, with diagonal) of summed position products.
    sum_squ_pos: Vec<f64>,
    children: SmallVec<[ComponentChild; 4]>,
    evaluation_node: Option<NodeId>,
}

impl<T> ComponentRecord<T> {
    /// Empty component at threshold `value` over an `n`-dimensional image.
    pub fn new(value: T, n: usize) -> Self {
        assert!(n > 0, "component must have at least one dimension");
        Self {
            value,
            pixels: PixelList::new(),
            sum_pos: vec![0.0; n],
            sum_squ_pos: vec![0.0; n * (n + 1) / 2],
            children: SmallVec::new(),
            evaluation_node: None,
        }
    }

    /// Adds one pixel with linear `index` at `position`.
    pub fn add_pixel(&mut self, index: usize, position: &[f64]) {
        let n = self.dimensions();
        assert_eq!(
            position.len(),
            n,
            "pixel position has {} coordinates, component has {} dimensions",
            position.len(),
            n
        );

        self.pixels.push(index);
        let mut k = 0;
        for i in 0..n {
            self.sum_pos[i] += position[i];
            for j in i..n {
                self.sum_squ_pos[k] += position[i] * position[j];
                k += 1;
            }
        }
    }

    /// Absorbs a finalized component that joins this one at the current level.
    pub fn merge(&mut self, other: ComponentRecord<T>) {
        assert_eq!(
            self.dimensions(),
            other.dimensions(),
            "merged components differ in dimensionality"
        );
        let node = other
            .evaluation_node
            .expect("merged component was never finalized");

        self.children.push(ComponentChild {
            node,
            size: other.size(),
        });
        for (sum, add) in self.sum_pos.iter_mut().zip(&other.sum_pos) {
            *sum += add;
        }
        for (sum, add) in self.sum_squ_pos.iter_mut().zip(&other.sum_squ_pos) {
            *sum += add;
        }
        self.pixels.merge(other.pixels);
    }

    /// Moves the component to the next threshold level.
    pub fn set_value(&mut self, value: T) {
        self.value = value;
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn size(&self) -> usize {
        self.pixels.len()
    }

    pub fn dimensions(&self) -> usize {
        self.sum_pos.len()
    }

    pub fn pixels(&self) -> &PixelList {
        &self.pixels
    }

    pub fn sum_pos(&self) -> &[f64] {
        &self.sum_pos
    }

    pub fn sum_squ_pos(&self) -> &[f64] {
        &self.sum_squ_pos
    }

    pub fn children(&self) -> &[ComponentChild] {
        &self.children
    }

    /// The node this component was last finalized into, if any.
    pub fn evaluation_node(&self) -> Option<NodeId> {
        self.evaluation_node
    }

    pub(crate) fn register_evaluation_node(&mut self, node: NodeId) {
        self.evaluation_node = Some(node);
        self.children.clear();
    }
}
