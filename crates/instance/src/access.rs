use regex::Regex;

use twinsight_core::Result;
use twinsight_metadata::{MetaFeature, MetadataManager};

use crate::feature::Feature;
use crate::instance::Instance;

/// Access to instance state, as required by rule evaluation.
///
/// The in-memory store implements this directly; a distributed deployment
/// implements it on top of its own replication.
#[async_trait::async_trait]
pub trait InstanceAccess: Send + Sync {
    /// Snapshots of all instances of `subject` whose id matches `filter`.
    /// An unknown subject is a `Lookup` error.
    async fn get_instances(&self, subject: &str, filter: &Regex) -> Result<Vec<Instance>>;

    /// Copy of a feature value. `meta` is resolved from the metadata when
    /// not supplied. Unknown instances yield the metadata default, if any.
    async fn get_feature(
        &self,
        subject: &str,
        instance_id: &str,
        feature: &str,
        type_name: &str,
        meta: Option<&MetaFeature>,
    ) -> Result<Feature>;

    fn metadata(&self) -> &MetadataManager;
}
