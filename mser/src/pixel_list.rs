//! Pixel membership of a component.

use serde::{Deserialize, Serialize};

/// Linear pixel indices belonging to one component, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelList {
    indices: Vec<usize>,
}

impl PixelList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize) {
        self.indices.push(index);
    }

    /// Appends all pixels of `other`, consuming it.
    pub fn merge(&mut self, mut other: PixelList) {
        if self.indices.is_empty() {
            std::mem::swap(&mut self.indices, &mut other.indices);
        } else {
            self.indices.append(&mut other.indices);
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}

impl FromIterator<usize> for PixelList {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}
