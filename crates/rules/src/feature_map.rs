//! Per-evaluation cache of fetched features.
//!
//! One [`FeatureMap`] lives for a single evaluation pass. It maps
//! `type -> feature -> instance id` to the fetched value and the number of
//! constraints the value satisfied, plus the merged metadata of each
//! `(type, feature)`. Its serialized form is what a talent receives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use twinsight_core::{Result, TwinError};
use twinsight_instance::Feature;
use twinsight_metadata::MetaFeature;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEntry {
    #[serde(rename = "$feature")]
    pub feature: Feature,
    pub matches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSlot {
    #[serde(rename = "$metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetaFeature>,
    #[serde(flatten)]
    pub instances: BTreeMap<String, FeatureEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMap {
    types: BTreeMap<String, BTreeMap<String, FeatureSlot>>,
}

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, type_name: &str, feature: &str, instance_id: &str) -> bool {
        self.slot(type_name, feature)
            .is_some_and(|slot| slot.instances.contains_key(instance_id))
    }

    pub fn get(&self, type_name: &str, feature: &str, instance_id: &str) -> Result<&FeatureEntry> {
        self.slot(type_name, feature)
            .and_then(|slot| slot.instances.get(instance_id))
            .ok_or_else(|| {
                TwinError::Lookup(format!(
                    "Feature {}.{} of instance {} is not part of the feature map",
                    type_name, feature, instance_id
                ))
            })
    }

    pub fn metadata(&self, type_name: &str, feature: &str) -> Option<&MetaFeature> {
        self.slot(type_name, feature).and_then(|slot| slot.metadata.as_ref())
    }

    /// Store `value` for an instance. The match counter of an existing entry
    /// is kept.
    pub fn set(
        &mut self,
        type_name: &str,
        feature: &str,
        instance_id: &str,
        value: Feature,
        metadata: Option<MetaFeature>,
    ) {
        let slot = self
            .types
            .entry(type_name.to_string())
            .or_default()
            .entry(feature.to_string())
            .or_default();

        if metadata.is_some() {
            slot.metadata = metadata;
        }

        slot.instances
            .entry(instance_id.to_string())
            .and_modify(|entry| entry.feature = value.clone())
            .or_insert(FeatureEntry {
                feature: value,
                matches: 0,
            });
    }

    pub fn record_rule_match_for(&mut self, type_name: &str, feature: &str, instance_id: &str) -> Result<()> {
        let entry = self
            .types
            .get_mut(type_name)
            .and_then(|features| features.get_mut(feature))
            .and_then(|slot| slot.instances.get_mut(instance_id))
            .ok_or_else(|| {
                TwinError::Lookup(format!(
                    "Cannot record match for {}.{} of instance {}",
                    type_name, feature, instance_id
                ))
            })?;
        entry.matches += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    pub fn dump(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// All cached entries as `(type, feature, instance id, entry)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str, &FeatureEntry)> {
        self.types.iter().flat_map(|(type_name, features)| {
            features.iter().flat_map(move |(feature, slot)| {
                slot.instances
                    .iter()
                    .map(move |(id, entry)| (type_name.as_str(), feature.as_str(), id.as_str(), entry))
            })
        })
    }

    fn slot(&self, type_name: &str, feature: &str) -> Option<&FeatureSlot> {
        self.types.get(type_name).and_then(|features| features.get(feature))
    }
}
