//! Types configuration read from disk and distributed to replicas.

use std::collections::BTreeMap;
use std::io::Write;

use twinsight_core::TwinError;
use twinsight_metadata::{MetaFeature, MetadataOwner, MetadataReplica, TypesConfig};

const TYPES: &str = r#"{
    "004344": {
        "features": { "position": { "idx": 0, "history": 3 } },
        "types": { "car": { "features": { "speed": { "idx": 1, "ttl": 0 } } } }
    }
}"#;

fn owner_from_file() -> MetadataOwner {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TYPES.as_bytes()).unwrap();

    let config = TypesConfig::from_path(file.path()).unwrap();
    MetadataOwner::from_config(&config).unwrap()
}

#[test]
fn configuration_file_is_loaded() {
    let owner = owner_from_file();

    assert_eq!(owner.table().resolve_types("004344").unwrap(), vec!["car"]);
    assert_eq!(owner.table().resolve_feature_at("car", 0).unwrap(), "position");
    assert_eq!(owner.table().resolve_meta_feature("car", "speed").unwrap().ttl(), Some(0));
    assert!(owner.table().get_types().contains(&"default".to_string()));
}

#[test]
fn unreadable_configuration_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("types.json");
    assert!(matches!(TypesConfig::from_path(&missing), Err(TwinError::Configuration(_))));

    std::fs::write(&missing, "{ not json").unwrap();
    assert!(matches!(TypesConfig::from_path(&missing), Err(TwinError::Configuration(_))));
}

#[tokio::test]
async fn replicas_follow_the_owner() {
    let mut owner = owner_from_file();
    let replica = MetadataReplica::new();
    let mut reader = replica.manager();

    let payload = serde_json::to_string(owner.snapshot().as_ref()).unwrap();
    assert!(replica.apply_json(&payload).unwrap());
    assert_eq!(reader.changed().await.unwrap(), owner.version());
    assert_eq!(reader.resolve_feature_at("car", 1).unwrap(), "speed");

    let outputs: BTreeMap<String, MetaFeature> =
        [("t1.alert".to_string(), MetaFeature::new())].into_iter().collect();
    assert!(owner.register_talent_output_features(&outputs).unwrap());

    // Stale snapshots are ignored
    assert!(!replica.apply_json(&payload).unwrap());

    let payload = serde_json::to_string(owner.snapshot().as_ref()).unwrap();
    assert!(replica.apply_json(&payload).unwrap());
    assert_eq!(replica.version(), owner.version());
    let meta = reader.resolve_meta_feature("default", "t1.alert").unwrap();
    assert_eq!(meta.idx, Some(0));
}
