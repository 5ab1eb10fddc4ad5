//! Segment/type/feature metadata hierarchy.
//!
//! This crate provides:
//! - The two-level type table (segments owning types, both owning features)
//! - Resolution of feature names, indices and merged feature metadata
//! - Registration with index assignment and divergence checks
//! - Owner/replica exchange of versioned, immutable table snapshots

pub mod config;
pub mod manager;
pub mod table;

pub use config::{SegmentConfig, TypeConfig, TypesConfig};
pub use manager::{MetadataManager, MetadataOwner, MetadataReplica, TypesSnapshot};
pub use table::{FeatureLocation, MetaFeature, TypeEntry, TypeMapEntry, TypeTable};
