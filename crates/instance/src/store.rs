//! In-memory instance store.
//!
//! Keeps `subject -> instance id -> Instance` behind a `std::sync::RwLock`
//! and applies feature updates with the history/ttl settings taken from the
//! feature metadata. Updates can be announced to peer stores as
//! [`FeatureUpdateMessage`]s; a store ignores its own announcements.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use twinsight_core::{now_ms, EngineConfig, Result, TwinError};
use twinsight_metadata::{MetaFeature, MetadataManager};

use crate::access::InstanceAccess;
use crate::feature::{Feature, FeatureUpdate};
use crate::instance::Instance;

/// A value reported for one feature of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvent {
    pub subject: String,
    pub instance_id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub feature: String,
    pub when_ms: i64,
    pub enc: Value,
    pub raw: Value,
}

/// A [`FeatureEvent`] announced by the store identified by `sender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureUpdateMessage {
    pub sender: Uuid,
    #[serde(flatten)]
    pub event: FeatureEvent,
}

type Subjects = HashMap<String, HashMap<String, Instance>>;

pub struct InMemoryInstanceStore {
    id: Uuid,
    config: EngineConfig,
    metadata: MetadataManager,
    subjects: Arc<RwLock<Subjects>>,
}

impl InMemoryInstanceStore {
    pub fn new(metadata: MetadataManager, config: EngineConfig) -> Self {
        let id = Uuid::new_v4();
        info!(store_id = %id, "Instance store created");
        Self {
            id,
            config,
            metadata,
            subjects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subjects(&self) -> Vec<String> {
        let guard = self.subjects.read().expect("instance store lock poisoned");
        let mut subjects: Vec<String> = guard.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub fn get_instance(&self, subject: &str, instance_id: &str) -> Result<Instance> {
        let guard = self.subjects.read().expect("instance store lock poisoned");
        guard
            .get(subject)
            .ok_or_else(|| TwinError::Lookup(format!("Cannot find subject {}", subject)))?
            .get(instance_id)
            .cloned()
            .ok_or_else(|| TwinError::Lookup(format!("Cannot find instanceId {}", instance_id)))
    }

    pub fn update_feature(&self, event: &FeatureEvent) -> Result<Option<FeatureUpdate>> {
        self.update_feature_at_time(event, now_ms())
    }

    /// Apply `event` as if the current time were `now`.
    ///
    /// Features whose metadata declares `ttl: 0` are volatile: the value is
    /// returned but never stored.
    pub fn update_feature_at_time(&self, event: &FeatureEvent, now: i64) -> Result<Option<FeatureUpdate>> {
        let meta = self
            .metadata
            .resolve_meta_feature(&event.type_name, &event.feature)?;

        if meta.ttl() == Some(0) {
            return Ok(Some(FeatureUpdate {
                hidx: -1,
                feature: Feature::new(
                    event.raw.clone(),
                    (!event.enc.is_null()).then(|| event.enc.clone()),
                    event.when_ms,
                    event.when_ms,
                ),
            }));
        }

        let idx = meta.index()?;
        let max_history = meta.history().unwrap_or(self.config.default_history_length);
        let ttl_ms = meta.ttl().unwrap_or(self.config.default_feature_ttl_ms);

        let mut guard = self.subjects.write().expect("instance store lock poisoned");
        let instance = guard
            .entry(event.subject.clone())
            .or_default()
            .entry(event.instance_id.clone())
            .or_insert_with(|| Instance::new(&event.type_name, &event.instance_id));

        let result = instance.update_feature_at(
            idx,
            Some(&event.enc),
            Some(&event.raw),
            Some(event.when_ms),
            max_history,
            ttl_ms,
            now,
        )?;

        if result.is_none() {
            debug!(
                subject = %event.subject,
                instance_id = %event.instance_id,
                type_name = %event.type_name,
                feature = %event.feature,
                when_ms = event.when_ms,
                "Stale feature update ignored"
            );
        }

        Ok(result)
    }

    /// Wrap `event` for announcement to peer stores.
    pub fn announce(&self, event: FeatureEvent) -> FeatureUpdateMessage {
        FeatureUpdateMessage {
            sender: self.id,
            event,
        }
    }

    /// Apply an update announced by a peer. Own announcements are skipped.
    pub fn apply_remote(&self, message: &FeatureUpdateMessage) -> Result<Option<FeatureUpdate>> {
        if message.sender == self.id {
            return Ok(None);
        }

        self.update_feature(&message.event).inspect_err(|e| {
            warn!(
                feature = %message.event.feature,
                instance_id = %message.event.instance_id,
                type_name = %message.event.type_name,
                error = %e,
                "Could not apply remote feature update"
            );
        })
    }
}

#[async_trait::async_trait]
impl InstanceAccess for InMemoryInstanceStore {
    async fn get_instances(&self, subject: &str, filter: &Regex) -> Result<Vec<Instance>> {
        let guard = self.subjects.read().expect("instance store lock poisoned");
        let instances = guard
            .get(subject)
            .ok_or_else(|| TwinError::Lookup(format!("Cannot find subject {}", subject)))?;

        let mut matching: Vec<Instance> = instances
            .values()
            .filter(|instance| filter.is_match(&instance.id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn get_feature(
        &self,
        subject: &str,
        instance_id: &str,
        feature: &str,
        type_name: &str,
        meta: Option<&MetaFeature>,
    ) -> Result<Feature> {
        let meta = match meta {
            Some(meta) => meta.clone(),
            None => self.metadata.resolve_meta_feature(type_name, feature)?,
        };

        let instance = match self.get_instance(subject, instance_id) {
            Ok(instance) => instance,
            Err(e) => {
                return meta.default_value().map(Feature::with_default).ok_or(e);
            }
        };

        instance.get_feature_at(meta.index()?, meta.default_value())
    }

    fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twinsight_metadata::MetadataOwner;

    fn store() -> (MetadataOwner, InMemoryInstanceStore) {
        let mut owner = MetadataOwner::new();
        owner
            .register_feature("004344", Some("car"), "speed", MetaFeature::new().with_field("history", json!(2)))
            .unwrap();
        owner
            .register_feature("004344", Some("car"), "beacon", MetaFeature::new().with_field("ttl", json!(0)))
            .unwrap();
        owner
            .register_feature("004344", Some("car"), "mode", MetaFeature::new().with_field("default", json!("idle")))
            .unwrap();
        let store = InMemoryInstanceStore::new(owner.manager(), EngineConfig::default());
        (owner, store)
    }

    fn event(feature: &str, value: Value, when_ms: i64) -> FeatureEvent {
        FeatureEvent {
            subject: "fleet".to_string(),
            instance_id: "c1".to_string(),
            type_name: "car".to_string(),
            feature: feature.to_string(),
            when_ms,
            enc: value.clone(),
            raw: value,
        }
    }

    #[test]
    fn volatile_features_are_not_stored() {
        let (_owner, store) = store();
        let now = now_ms();
        let result = store.update_feature(&event("beacon", json!(1), now)).unwrap().unwrap();
        assert_eq!(result.feature.ttl_ms, now);
        assert!(store.get_instance("fleet", "c1").is_err());
    }

    #[test]
    fn history_length_comes_from_metadata() {
        let (_owner, store) = store();
        let now = now_ms();
        for i in 0..4 {
            store.update_feature(&event("speed", json!(i), now + i)).unwrap();
        }
        let instance = store.get_instance("fleet", "c1").unwrap();
        let feature = instance.get_feature_at(0, None).unwrap();
        assert_eq!(feature.raw, json!(3));
        assert_eq!(feature.history.len(), 2);
        assert_eq!(store.subjects(), vec!["fleet"]);
    }

    #[test]
    fn own_announcements_are_skipped() {
        let (owner, store) = store();
        let peer = InMemoryInstanceStore::new(owner.manager(), EngineConfig::default());

        let message = store.announce(event("speed", json!(5), now_ms()));
        assert!(store.apply_remote(&message).unwrap().is_none());
        assert!(peer.apply_remote(&message).unwrap().is_some());
        assert!(peer.get_instance("fleet", "c1").is_ok());

        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(wire["type"], json!("car"));
        assert_eq!(wire["instanceId"], json!("c1"));
    }

    #[tokio::test]
    async fn get_feature_falls_back_to_metadata_default() {
        let (_owner, store) = store();
        let feature = store.get_feature("fleet", "c9", "mode", "car", None).await.unwrap();
        assert_eq!(feature.raw, json!("idle"));
        assert_eq!(feature.when_ms, -1);

        assert!(store.get_feature("fleet", "c9", "speed", "car", None).await.is_err());
        assert!(store.get_feature("fleet", "c9", "unknown", "car", None).await.is_err());
    }

    #[tokio::test]
    async fn get_instances_filters_by_id() {
        let (_owner, store) = store();
        let now = now_ms();
        for id in ["c1", "c2", "t1"] {
            let mut e = event("speed", json!(1), now);
            e.instance_id = id.to_string();
            store.update_feature(&e).unwrap();
        }

        let filter = Regex::new("(?m)^c").unwrap();
        let ids: Vec<String> = store
            .get_instances("fleet", &filter)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(store.get_instances("unknown", &filter).await.is_err());
    }
}
