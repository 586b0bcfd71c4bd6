//! # Tierstack Core
//!
//! In-memory model of a LEF technology and DEF designs, plus the
//! transformations that take a 2D physical design flow to a stacked 3D one:
//!
//! - [`graph`] derives the physical topology of a routed net,
//! - [`split`] cuts routed nets at a via layer and places ILV ports,
//! - [`stack`] synthesizes a multi-tier technology with inter-layer vias,
//! - [`partition`] and [`merge`] move designs between one tier and many.
//!
//! Cross references between objects are by name and resolved against a
//! [`Technology`] or [`Design`] at the point of use.

pub mod cell;
pub mod design;
pub mod error;
pub mod floorplan;
pub mod geometry;
pub mod graph;
pub mod instance;
pub mod layer;
pub mod merge;
pub mod net;
pub mod partition;
pub mod spatial;
pub mod split;
pub mod stack;
pub mod tech;
pub mod via;

#[cfg(test)]
mod fixtures;

pub use design::{Design, DesignSet};
pub use error::{Result, StackError};
pub use geometry::{BBox, Orientation, Point, Rect, Shape, Transformable};
pub use graph::NetGraph;
pub use merge::{merge_tiers, MergeMode, MergeOptions};
pub use partition::{make_top_design, partition_design, Partitioning};
pub use split::{split_design, split_design_nets, split_net, SplitOptions};
pub use stack::{make_3d, StackOptions, StackingStyle, Tech3d, TierMaps};
pub use tech::{NameMap, Technology};
