//! Maximally stable extremal regions (MSER) evaluated online over a component
//! tree.
//!
//! A component tree builder sweeps a threshold over the image and hands every
//! connected component to this crate as a [`ComponentRecord`] each time it
//! moves past a threshold level. [`EvaluationTree::finalize`] snapshots the
//! component, scores its stability over a `delta` window and reports local
//! minima of that score to a [`MinimumSink`]. [`MserTree`] is the sink that
//! filters the minima and assembles them into nested [`Mser`] regions.

pub mod component;
pub mod config;
pub mod evaluation;
pub mod mser_tree;
pub mod pixel_list;
pub mod value;

pub use component::{ComponentChild, ComponentRecord};
pub use config::{ConfigError, ConfigResult, MserConfig};
pub use evaluation::{EvaluationNode, EvaluationTree, MinimumSink, MserId, NodeId, NodeKind};
pub use mser_tree::{Mser, MserTree};
pub use pixel_list::PixelList;
pub use value::{DeltaValue, Direction, ThresholdOrdering, ValueOrdering};
