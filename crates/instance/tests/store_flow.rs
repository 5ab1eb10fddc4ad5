use regex::Regex;
use serde_json::json;

use twinsight_core::{now_ms, EngineConfig};
use twinsight_instance::{FeatureEvent, InMemoryInstanceStore, InstanceAccess};
use twinsight_metadata::{MetadataOwner, TypesConfig};

const TYPES: &str = r#"{
    "004344": {
        "features": { "position": { "idx": 0, "history": 3 } },
        "types": {
            "car": { "features": { "fuel": { "idx": 1, "encoding": { "type": "number" } } } },
            "truck": { "features": { "load": { "idx": 2 } } }
        }
    }
}"#;

fn event(type_name: &str, id: &str, feature: &str, value: i64, when_ms: i64) -> FeatureEvent {
    FeatureEvent {
        subject: "fleet".to_string(),
        instance_id: id.to_string(),
        type_name: type_name.to_string(),
        feature: feature.to_string(),
        when_ms,
        enc: json!(value),
        raw: json!(value),
    }
}

#[tokio::test]
async fn updates_resolve_indices_through_the_segment() {
    let owner = MetadataOwner::from_config(&TypesConfig::from_json(TYPES).unwrap()).unwrap();
    let store = InMemoryInstanceStore::new(owner.manager(), EngineConfig::default());
    let now = now_ms();

    store.update_feature(&event("car", "c1", "position", 1, now)).unwrap();
    store.update_feature(&event("car", "c1", "fuel", 50, now)).unwrap();
    store.update_feature(&event("truck", "t1", "position", 7, now)).unwrap();
    store.update_feature(&event("truck", "t1", "load", 2, now)).unwrap();

    let car = store.get_instance("fleet", "c1").unwrap();
    let indices: Vec<usize> = car.features().map(|(idx, _)| idx).collect();
    assert_eq!(indices, vec![0, 1]);

    let fuel = store.get_feature("fleet", "c1", "fuel", "car", None).await.unwrap();
    assert_eq!(fuel.raw, json!(50));
    assert_eq!(fuel.stat.unwrap().mean, Some(50.0));

    let all = Regex::new("(?m).*").unwrap();
    assert_eq!(store.get_instances("fleet", &all).await.unwrap().len(), 2);

    // A truck has no fuel feature
    assert!(store.update_feature(&event("truck", "t1", "fuel", 1, now)).is_err());
}

#[test]
fn position_history_is_bounded_by_segment_metadata() {
    let owner = MetadataOwner::from_config(&TypesConfig::from_json(TYPES).unwrap()).unwrap();
    let store = InMemoryInstanceStore::new(owner.manager(), EngineConfig::default());
    let now = now_ms();

    for i in 0..6 {
        store
            .update_feature(&event("car", "c1", "position", i, now + i))
            .unwrap();
    }

    let position = store
        .get_instance("fleet", "c1")
        .unwrap()
        .get_feature_at(0, None)
        .unwrap();
    assert_eq!(position.history.len(), 3);
    assert_eq!(position.history[0].raw, json!(4));
}
