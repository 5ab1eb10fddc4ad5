//! Versioned distribution of the type table.
//!
//! A single [`MetadataOwner`] mutates the table and publishes immutable
//! [`TypesSnapshot`]s; every mutation that changes the table bumps the
//! version. [`MetadataReplica`]s receive snapshots from elsewhere (e.g. a
//! message bus) and only accept versions newer than the one they hold.
//! Readers resolve metadata through cheap [`MetadataManager`] handles
//! subscribed to either side.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use twinsight_core::{Result, TwinError, DEFAULT_SEGMENT, DEFAULT_TYPE};

use crate::config::TypesConfig;
use crate::table::{MetaFeature, TypeMapEntry, TypeTable};

/// An immutable, versioned copy of the type table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypesSnapshot {
    pub version: u64,
    pub types: TypeTable,
}

// ── Owner ───────────────────────────────────────────────────────────

pub struct MetadataOwner {
    table: TypeTable,
    version: u64,
    publisher: watch::Sender<Arc<TypesSnapshot>>,
}

impl MetadataOwner {
    /// Creates the table with the default segment and type, published as
    /// version 1.
    pub fn new() -> Self {
        let table = TypeTable::with_default_type();

        let (publisher, _) = watch::channel(Arc::new(TypesSnapshot::default()));
        let mut owner = Self {
            table,
            version: 0,
            publisher,
        };
        owner.publish();
        owner
    }

    pub fn from_config(config: &TypesConfig) -> Result<Self> {
        let mut owner = Self::new();
        config.apply_to(&mut owner.table)?;
        owner.publish();
        info!(version = owner.version, types = owner.table.get_types().len(), "Metadata owner started");
        Ok(owner)
    }

    pub fn manager(&self) -> MetadataManager {
        MetadataManager {
            snapshots: self.publisher.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Arc<TypesSnapshot> {
        self.publisher.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    pub fn register_feature(
        &mut self,
        segment: &str,
        type_name: Option<&str>,
        feature: &str,
        meta: MetaFeature,
    ) -> Result<bool> {
        let changed = self.table.register_feature(segment, type_name, feature, meta)?;
        if changed {
            self.publish();
        }
        Ok(changed)
    }

    pub fn register_type(&mut self, segment: &str, type_name: &str) -> Result<bool> {
        let changed = self.table.register_type(segment, type_name)?;
        if changed {
            self.publish();
        }
        Ok(changed)
    }

    /// Register the output features of a talent in the default segment.
    /// Either all outputs are registered or, if any of them is invalid,
    /// none is.
    pub fn register_talent_output_features(
        &mut self,
        outputs: &BTreeMap<String, MetaFeature>,
    ) -> Result<bool> {
        for (feature, meta) in outputs {
            if let Err(e) = self
                .table
                .validate_feature(DEFAULT_SEGMENT, Some(DEFAULT_TYPE), feature, meta)
            {
                warn!(feature = %feature, error = %e, "Rejected talent output features");
                return Err(e);
            }
        }

        let mut changed = false;
        for (feature, meta) in outputs {
            changed = self
                .table
                .register_feature(DEFAULT_SEGMENT, Some(DEFAULT_TYPE), feature, meta.clone())?
                || changed;
        }

        if changed {
            self.publish();
        }
        Ok(changed)
    }

    fn publish(&mut self) {
        self.version += 1;
        self.publisher.send_replace(Arc::new(TypesSnapshot {
            version: self.version,
            types: self.table.clone(),
        }));
        debug!(version = self.version, "Types published");
    }
}

impl Default for MetadataOwner {
    fn default() -> Self {
        Self::new()
    }
}

// ── Replica ─────────────────────────────────────────────────────────

pub struct MetadataReplica {
    publisher: watch::Sender<Arc<TypesSnapshot>>,
}

impl MetadataReplica {
    /// An empty replica at version 0.
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(Arc::new(TypesSnapshot::default()));
        Self { publisher }
    }

    pub fn manager(&self) -> MetadataManager {
        MetadataManager {
            snapshots: self.publisher.subscribe(),
        }
    }

    pub fn version(&self) -> u64 {
        self.publisher.borrow().version
    }

    /// Adopt `snapshot` if it is newer than the held one.
    pub fn apply(&self, snapshot: TypesSnapshot) -> bool {
        let version = snapshot.version;
        let applied = self.publisher.send_if_modified(|current| {
            if snapshot.version <= current.version {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });

        if applied {
            debug!(version, "Types update applied");
        } else {
            debug!(version, held = self.version(), "Outdated types update ignored");
        }
        applied
    }

    /// Adopt a snapshot received as JSON (`{"version": .., "types": {..}}`).
    pub fn apply_json(&self, payload: &str) -> Result<bool> {
        let snapshot: TypesSnapshot = serde_json::from_str(payload)?;
        Ok(self.apply(snapshot))
    }
}

impl Default for MetadataReplica {
    fn default() -> Self {
        Self::new()
    }
}

// ── Reader handle ───────────────────────────────────────────────────

/// Read access to the latest published type table.
#[derive(Debug, Clone)]
pub struct MetadataManager {
    snapshots: watch::Receiver<Arc<TypesSnapshot>>,
}

impl MetadataManager {
    /// A manager fixed to a single snapshot.
    pub fn from_snapshot(snapshot: TypesSnapshot) -> Self {
        let (_, snapshots) = watch::channel(Arc::new(snapshot));
        Self { snapshots }
    }

    pub fn snapshot(&self) -> Arc<TypesSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshots.borrow().version
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<u64> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| TwinError::Other("Metadata publisher closed".to_string()))?;
        Ok(self.version())
    }

    pub fn resolve_feature_at(&self, type_name: &str, idx: usize) -> Result<String> {
        self.snapshot().types.resolve_feature_at(type_name, idx)
    }

    pub fn resolve_meta_feature(&self, type_name: &str, feature: &str) -> Result<MetaFeature> {
        self.snapshot().types.resolve_meta_feature(type_name, feature)
    }

    pub fn resolve_meta_feature_at(&self, type_name: &str, idx: usize) -> Result<MetaFeature> {
        self.snapshot().types.resolve_meta_feature_at(type_name, idx)
    }

    pub fn resolve_types(&self, segment: &str) -> Result<Vec<String>> {
        self.snapshot().types.resolve_types(segment)
    }

    pub fn resolve_segment(&self, type_name: &str) -> Result<String> {
        self.snapshot().types.resolve_segment(type_name)
    }

    pub fn resolve_features(&self, type_name: &str) -> Result<Vec<String>> {
        self.snapshot().types.resolve_features(type_name)
    }

    pub fn resolve_meta_features(&self, type_name: &str) -> Result<BTreeMap<String, MetaFeature>> {
        self.snapshot().types.resolve_meta_features(type_name)
    }

    pub fn get_types(&self) -> Vec<String> {
        self.snapshot().types.get_types()
    }

    pub fn get_type_map(&self) -> Result<BTreeMap<String, TypeMapEntry>> {
        self.snapshot().types.get_type_map()
    }
}
