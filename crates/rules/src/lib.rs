//! Constraint and rule engine.
//!
//! This crate provides:
//! - Constraints over single features (comparisons, schemas, changes)
//! - Timeseries constraints (Nelson rules, run-length patterns)
//! - AND/OR rule trees with `excludeOn` suppression
//! - The per-evaluation [`FeatureMap`]
//! - Loading and saving rule trees as JSON
//! - Dependency cycle checks for talent registration

pub mod constraint;
pub mod feature_map;
pub mod loader;
pub mod nelson;
pub mod pattern;
pub mod registration;
pub mod rule;

pub use constraint::{ops, CompareOp, Constraint, ConstraintKind, SchemaValidator, ValueType};
pub use feature_map::{FeatureEntry, FeatureMap, FeatureSlot};
pub use loader::{ConstraintDocument, RuleDocument, RulesDocument};
pub use nelson::NelsonRule;
pub use pattern::{MatchSegment, PatternMatcher, Wildcard};
pub use registration::{SkipCycleCheck, TalentDescriptor, TalentRegistry};
pub use rule::{Rule, RuleNode, Rules, RulesKind, Trigger, TypeFeature};
