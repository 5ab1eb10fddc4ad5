//! Per-instance feature state.
//!
//! An [`Instance`] owns the index-addressed feature vector of one
//! `(type, id)` entity. Every slot holds the current [`Feature`] value, a
//! bounded newest-first history and running statistics over the retained
//! encoded values. Expired values are pruned lazily on the next update.

pub mod access;
pub mod feature;
pub mod instance;
pub mod stat;
pub mod store;

pub use access::InstanceAccess;
pub use feature::{Feature, FeatureStat, FeatureUpdate, HistoryFeature};
pub use instance::Instance;
pub use stat::RunningStat;
pub use store::{FeatureEvent, FeatureUpdateMessage, InMemoryInstanceStore};
