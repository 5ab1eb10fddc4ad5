//! Talent registration against the feature dependency graph.

use std::collections::BTreeMap;

use serde_json::json;

use twinsight_core::TwinError;
use twinsight_metadata::{MetaFeature, MetadataOwner, TypesConfig};
use twinsight_rules::{Rules, SkipCycleCheck, TalentDescriptor, TalentRegistry};

fn owner() -> MetadataOwner {
    let config = TypesConfig::from_json(
        r#"{ "004344": { "features": {}, "types": {
            "car": { "features": { "speed": { "idx": 0 } } },
            "truck": { "features": { "load": { "idx": 1 } } }
        } } }"#,
    )
    .unwrap();
    MetadataOwner::from_config(&config).unwrap()
}

fn talent(id: &str, inputs: &[(&str, &str)], outputs: &[&str]) -> TalentDescriptor {
    let rules = inputs
        .iter()
        .map(|(selector, feature)| json!({ "feature": feature, "op": 10, "typeSelector": selector }))
        .collect::<Vec<_>>();

    TalentDescriptor {
        id: id.to_string(),
        rules: Rules::load(&json!({ "type": "or", "rules": rules })).unwrap(),
        outputs: outputs
            .iter()
            .map(|name| (name.to_string(), MetaFeature::new()))
            .collect::<BTreeMap<_, _>>(),
        skip_cycle_check: SkipCycleCheck::default(),
    }
}

#[test]
fn chained_talents_register_their_outputs() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();
    let version = owner.version();

    registry
        .register(&mut owner, &talent("t1", &[("car", "speed")], &["t1.alert"]))
        .unwrap();
    registry
        .register(&mut owner, &talent("t2", &[("default", "t1.alert")], &["t2.report"]))
        .unwrap();

    assert_eq!(registry.registered(), ["t1", "t2"]);
    assert!(owner.version() > version);
    assert!(owner.table().resolve_meta_feature("default", "t1.alert").is_ok());
    assert_eq!(
        registry.graph().edges(),
        vec![
            ("car.speed".to_string(), "default.t1.alert".to_string()),
            ("default.t1.alert".to_string(), "default.t2.report".to_string()),
        ]
    );
}

#[test]
fn closing_a_cycle_is_rejected_and_rolled_back() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();
    registry
        .register(&mut owner, &talent("t1", &[("car", "speed")], &["t1.alert"]))
        .unwrap();
    registry
        .register(&mut owner, &talent("t2", &[("default", "t1.alert")], &["t2.report"]))
        .unwrap();
    let edges = registry.graph().edges();
    let version = owner.version();

    let result = registry.register(
        &mut owner,
        &talent("t1", &[("default", "t2.report")], &["t1.alert"]),
    );
    assert!(matches!(result, Err(TwinError::DependencyCycle(_))));
    assert_eq!(registry.graph().edges(), edges);
    assert_eq!(owner.version(), version);
}

#[test]
fn wildcard_input_of_own_output_type_is_a_cycle() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();

    let result = registry.register(&mut owner, &talent("t1", &[("default", "*")], &["t1.alert"]));
    assert!(matches!(result, Err(TwinError::DependencyCycle(_))));
    assert!(registry.graph().ids().is_empty());

    // All types of all segments include the default type
    let result = registry.register(&mut owner, &talent("t1", &[("*.*", "*")], &["t1.alert"]));
    assert!(matches!(result, Err(TwinError::DependencyCycle(_))));

    // Wildcards within another segment are fine
    registry
        .register(&mut owner, &talent("t1", &[("004344.*", "*")], &["t1.alert"]))
        .unwrap();
    assert_eq!(registry.graph().stats().edge_count, 2);
}

#[test]
fn inputs_of_an_unknown_segment_are_rejected() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();
    registry
        .register(&mut owner, &talent("t1", &[("car", "speed")], &["t1.alert"]))
        .unwrap();
    let edges = registry.graph().edges();
    let version = owner.version();

    let result = registry.register(&mut owner, &talent("t9", &[("999999.*", "speed")], &["t9.out"]));
    assert!(matches!(result, Err(TwinError::Lookup(_))));
    assert_eq!(registry.registered(), ["t1"]);
    assert_eq!(registry.graph().edges(), edges);
    assert_eq!(owner.version(), version);
    assert!(owner.table().resolve_meta_feature("default", "t9.out").is_err());
}

#[test]
fn skipped_inputs_are_not_checked() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();

    let mut skip_all = talent("t1", &[("default", "*")], &["t1.alert"]);
    skip_all.skip_cycle_check = SkipCycleCheck::All(true);
    registry.register(&mut owner, &skip_all).unwrap();
    assert!(registry.graph().ids().is_empty());

    let mut skip_some = talent("t2", &[("default", "t2.out"), ("car", "speed")], &["t2.out"]);
    skip_some.skip_cycle_check = SkipCycleCheck::Features(vec!["default.t2.out".to_string()]);
    registry.register(&mut owner, &skip_some).unwrap();
    assert_eq!(
        registry.graph().edges(),
        vec![("car.speed".to_string(), "default.t2.out".to_string())]
    );
}

#[test]
fn outputs_must_carry_the_talent_prefix() {
    let mut owner = owner();
    let mut registry = TalentRegistry::new();

    let result = registry.register(&mut owner, &talent("t1", &[("car", "speed")], &["alert"]));
    assert!(matches!(result, Err(TwinError::Validation(_))));
    assert!(registry.registered().is_empty());
    assert!(owner.table().resolve_meta_feature("default", "alert").is_err());
}

#[test]
fn skip_option_deserializes_from_flag_or_list() {
    let all: SkipCycleCheck = serde_json::from_value(json!(true)).unwrap();
    assert_eq!(all, SkipCycleCheck::All(true));

    let some: SkipCycleCheck = serde_json::from_value(json!(["car.speed"])).unwrap();
    assert_eq!(some, SkipCycleCheck::Features(vec!["car.speed".to_string()]));
}
