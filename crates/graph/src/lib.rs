//! Feature dependency graph.
//!
//! Nodes are `type.feature` identifiers, edges point from an input feature
//! to an output feature whose value may change when the input changes.
//! Talent registration uses the cycle scan to reject feedback loops.

pub mod feature_graph;

pub use feature_graph::{FeatureGraph, GraphStats};
