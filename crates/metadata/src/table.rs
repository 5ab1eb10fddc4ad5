//! The type table and its resolution/registration rules.
//!
//! Layout (serialized shape):
//!
//! ```text
//! {
//!   "<segmentId>": { "inherits": null,          "features": {..}, "types": ["<typeId>", ..] },
//!   "<typeId>":    { "inherits": "<segmentId>", "features": {..} }
//! }
//! ```
//!
//! A segment and all of its types share one feature index space. A feature
//! name defined at segment level and at type level carries the same index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use twinsight_core::{equals_unordered, Result, TwinError, DEFAULT_SEGMENT, DEFAULT_TYPE};

// ── Feature metadata ────────────────────────────────────────────────

/// Metadata of one feature: its index plus free-form fields
/// (`encoding`, `unit`, `history`, `ttl`, `default`, `description`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idx: Option<usize>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetaFeature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idx(mut self, idx: usize) -> Self {
        self.idx = Some(idx);
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Index of the feature within its instance's feature vector.
    pub fn index(&self) -> Result<usize> {
        self.idx
            .ok_or_else(|| TwinError::Lookup("feature metadata carries no index".to_string()))
    }

    /// Maximum number of history entries kept for this feature.
    pub fn history(&self) -> Option<usize> {
        self.fields.get("history").and_then(Value::as_u64).map(|h| h as usize)
    }

    /// Lifetime of a value in milliseconds. `0` marks a volatile feature.
    pub fn ttl(&self) -> Option<i64> {
        self.fields.get("ttl").and_then(Value::as_i64)
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.fields.get("default")
    }

    pub fn encoding(&self) -> Option<&Value> {
        self.fields.get("encoding")
    }

    pub fn unit(&self) -> Option<&Value> {
        self.fields.get("unit")
    }

    /// Overlay `specific` on top of `inherited`, field by field.
    pub fn merge(inherited: &MetaFeature, specific: &MetaFeature) -> MetaFeature {
        let mut fields = inherited.fields.clone();
        for (key, value) in &specific.fields {
            fields.insert(key.clone(), value.clone());
        }
        MetaFeature {
            idx: specific.idx.or(inherited.idx),
            fields,
        }
    }
}

// ── Type entries ────────────────────────────────────────────────────

/// A segment (`inherits == None`) or a type (`inherits == Some(segment)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub inherits: Option<String>,
    #[serde(default)]
    pub features: BTreeMap<String, MetaFeature>,
    /// Types belonging to a segment. Absent for types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
}

impl TypeEntry {
    fn segment() -> Self {
        Self {
            inherits: None,
            features: BTreeMap::new(),
            types: Some(Vec::new()),
        }
    }

    fn of_segment(segment: &str) -> Self {
        Self {
            inherits: Some(segment.to_string()),
            features: BTreeMap::new(),
            types: None,
        }
    }

    pub fn is_segment(&self) -> bool {
        self.inherits.is_none()
    }
}

/// A feature definition found while walking a segment's feature space.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLocation<'a> {
    /// Segment or type owning the definition.
    pub owner: &'a str,
    pub feature: &'a str,
    pub meta: &'a MetaFeature,
}

/// One type with its segment and fully merged feature metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMapEntry {
    pub segment: String,
    pub features: BTreeMap<String, MetaFeature>,
}

// ── Type table ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTable {
    entries: BTreeMap<String, TypeEntry>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the default segment with its default type.
    pub fn with_default_type() -> Self {
        let mut segment = TypeEntry::segment();
        segment.types = Some(vec![DEFAULT_TYPE.to_string()]);

        let mut table = Self::new();
        table.entries.insert(DEFAULT_SEGMENT.to_string(), segment);
        table
            .entries
            .insert(DEFAULT_TYPE.to_string(), TypeEntry::of_segment(DEFAULT_SEGMENT));
        table
    }

    pub fn get(&self, id: &str) -> Option<&TypeEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn entry(&self, id: &str) -> Result<&TypeEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| TwinError::Lookup(format!("Type {} cannot be resolved", id)))
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// Name of the feature stored at `idx` for `type_name`, looking at the
    /// type first and falling back to its segment.
    pub fn resolve_feature_at(&self, type_name: &str, idx: usize) -> Result<String> {
        let entry = self.entry(type_name)?;

        if let Some(feature) = find_feature_at(entry, idx) {
            return Ok(feature.to_string());
        }

        if let Some(segment) = &entry.inherits {
            if let Some(feature) = self.entries.get(segment).and_then(|s| find_feature_at(s, idx)) {
                return Ok(feature.to_string());
            }
        }

        Err(TwinError::Lookup(format!(
            "Feature at index {} of type {} does not exist",
            idx, type_name
        )))
    }

    /// Feature metadata of `type_name`, with type-level fields overriding
    /// the inherited segment-level fields.
    pub fn resolve_meta_feature(&self, type_name: &str, feature: &str) -> Result<MetaFeature> {
        let entry = self.entry(type_name)?;
        let specific = entry.features.get(feature);

        if let Some(segment) = &entry.inherits {
            let base = self.entries.get(segment).ok_or_else(|| {
                TwinError::Lookup(format!("Invalid reference to base type {}", segment))
            })?;

            if let Some(inherited) = base.features.get(feature) {
                return Ok(match specific {
                    Some(specific) => MetaFeature::merge(inherited, specific),
                    None => inherited.clone(),
                });
            }
        }

        specific.cloned().ok_or_else(|| {
            TwinError::Lookup(format!(
                "The feature {} of type {} cannot be resolved",
                feature, type_name
            ))
        })
    }

    pub fn resolve_meta_feature_at(&self, type_name: &str, idx: usize) -> Result<MetaFeature> {
        let feature = self.resolve_feature_at(type_name, idx)?;
        self.resolve_meta_feature(type_name, &feature)
    }

    /// Types belonging to `segment`.
    pub fn resolve_types(&self, segment: &str) -> Result<Vec<String>> {
        let entry = self
            .entries
            .get(segment)
            .ok_or_else(|| TwinError::Lookup(format!("Segment {} cannot be resolved", segment)))?;

        if !entry.is_segment() {
            return Err(TwinError::Lookup(format!("{} is a type, not a segment", segment)));
        }

        Ok(entry.types.clone().unwrap_or_default())
    }

    /// Segment `type_name` belongs to.
    pub fn resolve_segment(&self, type_name: &str) -> Result<String> {
        self.entry(type_name)?
            .inherits
            .clone()
            .ok_or_else(|| TwinError::Lookup("Segments can only be resolved from given types".to_string()))
    }

    /// All feature names of `type_name`: its own first, then inherited ones.
    pub fn resolve_features(&self, type_name: &str) -> Result<Vec<String>> {
        let entry = self.entry(type_name)?;
        let mut features: Vec<String> = entry.features.keys().cloned().collect();

        if let Some(segment) = &entry.inherits {
            for feature in self.resolve_features(segment)? {
                if !features.contains(&feature) {
                    features.push(feature);
                }
            }
        }

        Ok(features)
    }

    pub fn resolve_meta_features(&self, type_name: &str) -> Result<BTreeMap<String, MetaFeature>> {
        self.resolve_features(type_name)?
            .into_iter()
            .map(|feature| {
                let meta = self.resolve_meta_feature(type_name, &feature)?;
                Ok((feature, meta))
            })
            .collect()
    }

    /// All type ids (segments excluded).
    pub fn get_types(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_segment())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get_type_map(&self) -> Result<BTreeMap<String, TypeMapEntry>> {
        self.get_types()
            .into_iter()
            .map(|type_name| {
                let entry = TypeMapEntry {
                    segment: self.resolve_segment(&type_name)?,
                    features: self.resolve_meta_features(&type_name)?,
                };
                Ok((type_name, entry))
            })
            .collect()
    }

    /// Every feature definition of a segment's shared index space: the
    /// segment's own features first, then those of each of its types.
    pub fn all_features_in_segment<'a>(&'a self, segment: &'a str) -> Vec<FeatureLocation<'a>> {
        let Some(entry) = self.entries.get(segment) else {
            return Vec::new();
        };

        let mut owners: Vec<&str> = vec![segment];
        if let Some(types) = &entry.types {
            owners.extend(types.iter().map(String::as_str));
        }

        owners
            .into_iter()
            .filter_map(|owner| self.entries.get_key_value(owner))
            .flat_map(|(owner, entry)| {
                entry.features.iter().map(move |(feature, meta)| FeatureLocation {
                    owner: owner.as_str(),
                    feature: feature.as_str(),
                    meta,
                })
            })
            .collect()
    }

    fn max_index(&self, segment: &str) -> Option<usize> {
        self.all_features_in_segment(segment)
            .iter()
            .filter_map(|loc| loc.meta.idx)
            .max()
    }

    /// Index already assigned to `feature` at segment level or within the
    /// target type (or, for segment-level definitions, within any type).
    fn related_definitions<'a>(
        &'a self,
        segment: &'a str,
        type_name: Option<&'a str>,
        feature: &'a str,
    ) -> Vec<FeatureLocation<'a>> {
        self.all_features_in_segment(segment)
            .into_iter()
            .filter(|loc| loc.feature == feature)
            .filter(|loc| match type_name {
                Some(t) => loc.owner == segment || loc.owner == t,
                None => true,
            })
            .collect()
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn register_segment(&mut self, segment: &str) -> bool {
        if self.entries.contains_key(segment) {
            return false;
        }
        self.entries.insert(segment.to_string(), TypeEntry::segment());
        true
    }

    pub fn register_type(&mut self, segment: &str, type_name: &str) -> Result<bool> {
        let mut changed = self.register_segment(segment);

        if !self.entry(segment)?.is_segment() {
            return Err(TwinError::Validation(format!("{} is a type, not a segment", segment)));
        }

        match self.entries.get(type_name) {
            Some(existing) if existing.inherits.as_deref() == Some(segment) => {}
            Some(_) => {
                return Err(TwinError::Validation(format!(
                    "Type {} is already defined outside of segment {}",
                    type_name, segment
                )));
            }
            None => {
                self.entries
                    .insert(type_name.to_string(), TypeEntry::of_segment(segment));
                if let Some(types) = self
                    .entries
                    .get_mut(segment)
                    .and_then(|entry| entry.types.as_mut())
                {
                    types.push(type_name.to_string());
                }
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Check a feature definition without modifying the table.
    pub fn validate_feature(
        &self,
        segment: &str,
        type_name: Option<&str>,
        feature: &str,
        meta: &MetaFeature,
    ) -> Result<()> {
        let type_name = effective_type(segment, type_name);

        if let Some(entry) = self.entries.get(segment) {
            if !entry.is_segment() {
                return Err(TwinError::Validation(format!("{} is a type, not a segment", segment)));
            }
        }

        if let Some(type_name) = type_name {
            if let Some(entry) = self.entries.get(type_name) {
                if entry.inherits.as_deref() != Some(segment) {
                    return Err(TwinError::Validation(format!(
                        "Type {} is already defined outside of segment {}",
                        type_name, segment
                    )));
                }
            }
        }

        let Some(idx) = meta.idx else {
            return Ok(());
        };

        let space = self.all_features_in_segment(segment);

        if let Some(other) = space
            .iter()
            .find(|loc| loc.meta.idx == Some(idx) && loc.feature != feature)
        {
            return Err(TwinError::Validation(format!(
                "Feature index {} of feature {} is already defined in segment {} for feature {}",
                idx, feature, segment, other.feature
            )));
        }

        if let Some(diverging) = self
            .related_definitions(segment, type_name, feature)
            .into_iter()
            .find(|loc| loc.meta.idx != Some(idx))
        {
            return Err(TwinError::Validation(format!(
                "Feature {} is defined with index {:?} in {} and cannot be registered with index {}",
                feature, diverging.meta.idx, diverging.owner, idx
            )));
        }

        Ok(())
    }

    /// Register a feature at segment level (`type_name == None`) or for a
    /// type. Missing indices are reused from an existing definition of the
    /// same name or assigned as the next unused index of the segment.
    ///
    /// Returns whether the table changed.
    pub fn register_feature(
        &mut self,
        segment: &str,
        type_name: Option<&str>,
        feature: &str,
        mut meta: MetaFeature,
    ) -> Result<bool> {
        let type_name = effective_type(segment, type_name);

        self.validate_feature(segment, type_name, feature, &meta)?;

        if meta.idx.is_none() {
            let existing = self
                .related_definitions(segment, type_name, feature)
                .first()
                .and_then(|loc| loc.meta.idx);

            meta.idx = Some(match existing {
                Some(idx) => idx,
                None => self.max_index(segment).map_or(0, |max| max + 1),
            });
        }

        let mut changed = self.register_segment(segment);

        let assignee = match type_name {
            Some(type_name) => {
                changed = self.register_type(segment, type_name)? || changed;
                type_name
            }
            None => segment,
        };

        let is_talent_output = segment == DEFAULT_SEGMENT;

        let entry = self
            .entries
            .get_mut(assignee)
            .ok_or_else(|| TwinError::Lookup(format!("Type {} cannot be resolved", assignee)))?;

        match entry.features.get(feature) {
            None => {
                entry.features.insert(feature.to_string(), meta);
                changed = true;
            }
            Some(current) if is_talent_output => {
                // Keep the assigned index but overwrite the rest
                meta.idx = current.idx;
                let before = serde_json::to_value(current)?;
                let after = serde_json::to_value(&meta)?;
                if !equals_unordered(&before, &after) {
                    changed = true;
                }
                entry.features.insert(feature.to_string(), meta);
            }
            Some(_) => {}
        }

        Ok(changed)
    }
}

fn effective_type<'a>(segment: &str, type_name: Option<&'a str>) -> Option<&'a str> {
    if segment == DEFAULT_SEGMENT {
        Some(DEFAULT_TYPE)
    } else {
        type_name
    }
}

fn find_feature_at(entry: &TypeEntry, idx: usize) -> Option<&str> {
    entry
        .features
        .iter()
        .find(|(_, meta)| meta.idx == Some(idx))
        .map(|(feature, _)| feature.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(fields: Value) -> MetaFeature {
        serde_json::from_value(fields).unwrap()
    }

    fn vehicle_table() -> TypeTable {
        let mut table = TypeTable::new();
        table
            .register_feature("004344", None, "speed", meta(json!({"encoding": {"type": "number"}, "unit": "km/h"})))
            .unwrap();
        table
            .register_feature("004344", Some("car"), "speed", meta(json!({"unit": "mph"})))
            .unwrap();
        table
            .register_feature("004344", Some("car"), "rpm", meta(json!({"history": 10})))
            .unwrap();
        table
            .register_feature("004344", Some("truck"), "load", MetaFeature::new())
            .unwrap();
        table
    }

    #[test]
    fn default_table_matches_registered_default_type() {
        let mut registered = TypeTable::new();
        registered.register_type(DEFAULT_SEGMENT, DEFAULT_TYPE).unwrap();

        let table = TypeTable::with_default_type();
        assert_eq!(table, registered);
        assert_eq!(table.resolve_types(DEFAULT_SEGMENT).unwrap(), vec![DEFAULT_TYPE]);
        assert_eq!(table.resolve_segment(DEFAULT_TYPE).unwrap(), DEFAULT_SEGMENT);
    }

    #[test]
    fn indices_are_assigned_across_the_segment_space() {
        let table = vehicle_table();
        assert_eq!(table.resolve_meta_feature("car", "speed").unwrap().idx, Some(0));
        assert_eq!(table.resolve_meta_feature("car", "rpm").unwrap().idx, Some(1));
        assert_eq!(table.resolve_meta_feature("truck", "load").unwrap().idx, Some(2));
    }

    #[test]
    fn resolve_meta_feature_merges_type_over_segment() {
        let table = vehicle_table();
        let speed = table.resolve_meta_feature("car", "speed").unwrap();
        assert_eq!(speed.unit(), Some(&json!("mph")));
        assert_eq!(speed.encoding(), Some(&json!({"type": "number"})));

        let truck_speed = table.resolve_meta_feature("truck", "speed").unwrap();
        assert_eq!(truck_speed.unit(), Some(&json!("km/h")));
    }

    #[test]
    fn resolve_feature_at_falls_back_to_segment() {
        let table = vehicle_table();
        assert_eq!(table.resolve_feature_at("car", 1).unwrap(), "rpm");
        assert_eq!(table.resolve_feature_at("truck", 0).unwrap(), "speed");
        assert!(table.resolve_feature_at("truck", 1).is_err());
        assert!(table.resolve_feature_at("boat", 0).is_err());
    }

    #[test]
    fn conflicting_index_between_segment_and_type_is_rejected() {
        let mut table = TypeTable::new();
        table
            .register_feature("004344", None, "speed", MetaFeature::new().with_idx(0))
            .unwrap();

        let err = table
            .register_feature("004344", Some("car"), "speed", MetaFeature::new().with_idx(5))
            .unwrap_err();
        assert!(matches!(err, TwinError::Validation(_)));

        // Same index is accepted.
        assert!(table
            .register_feature("004344", Some("car"), "speed", MetaFeature::new().with_idx(0))
            .is_ok());
    }

    #[test]
    fn index_used_by_other_feature_is_rejected() {
        let mut table = TypeTable::new();
        table
            .register_feature("004344", Some("car"), "speed", MetaFeature::new().with_idx(3))
            .unwrap();
        let err = table
            .register_feature("004344", Some("truck"), "load", MetaFeature::new().with_idx(3))
            .unwrap_err();
        assert!(matches!(err, TwinError::Validation(_)));
    }

    #[test]
    fn segment_navigation() {
        let table = vehicle_table();
        assert_eq!(table.resolve_segment("car").unwrap(), "004344");
        assert!(table.resolve_segment("004344").is_err());
        assert_eq!(table.resolve_types("004344").unwrap(), vec!["car", "truck"]);
        assert!(table.resolve_types("car").is_err());
        assert_eq!(table.get_types(), vec!["car", "truck"]);
        assert_eq!(table.resolve_features("car").unwrap(), vec!["rpm", "speed"]);
    }

    #[test]
    fn talent_outputs_keep_their_index_on_update() {
        let mut table = TypeTable::new();
        assert!(table
            .register_feature(DEFAULT_SEGMENT, None, "t1.out", meta(json!({"history": 2})))
            .unwrap());
        assert!(!table
            .register_feature(DEFAULT_SEGMENT, None, "t1.out", meta(json!({"history": 2})))
            .unwrap());
        assert!(table
            .register_feature(DEFAULT_SEGMENT, None, "t1.out", meta(json!({"history": 5})))
            .unwrap());

        let out = table.resolve_meta_feature(DEFAULT_TYPE, "t1.out").unwrap();
        assert_eq!(out.idx, Some(0));
        assert_eq!(out.history(), Some(5));
    }

    #[test]
    fn serialized_shape() {
        let table = vehicle_table();
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["004344"]["inherits"], Value::Null);
        assert_eq!(value["004344"]["types"], json!(["car", "truck"]));
        assert_eq!(value["car"]["inherits"], json!("004344"));
        assert!(value["car"].get("types").is_none());

        let back: TypeTable = serde_json::from_value(value).unwrap();
        assert_eq!(back, table);
    }
}
