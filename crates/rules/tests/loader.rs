//! Loading and saving rule trees.

use serde_json::json;

use twinsight_core::TwinError;
use twinsight_rules::{
    ops, ConstraintKind, NelsonRule, Rule, RuleNode, Rules, RulesKind, TypeFeature, ValueType,
};

fn tree() -> serde_json::Value {
    json!({
        "type": "and",
        "excludeOn": ["default.talent1.*"],
        "rules": [
            { "feature": "speed", "op": 22, "value": 100, "typeSelector": "car" },
            {
                "type": "or",
                "excludeOn": null,
                "rules": [
                    { "feature": "mode", "op": 30, "value": "^sp", "typeSelector": "car", "valueType": 0 },
                    { "feature": "position", "op": 1, "typeSelector": "004344.*", "path": "/lat" },
                    { "feature": "speed", "op": 2, "value": 2, "typeSelector": "car" },
                    { "feature": "speed", "op": 3, "value": [1, {"nmin": 2}], "typeSelector": "car" },
                    {
                        "feature": "*",
                        "op": 0,
                        "value": { "type": "number" },
                        "typeSelector": "*.*",
                        "instanceIdFilter": "^c",
                        "limitFeatureSelection": false
                    }
                ]
            }
        ]
    })
}

#[test]
fn load_builds_the_tree() {
    let rules = Rules::load(&tree()).unwrap();
    assert_eq!(rules.kind(), RulesKind::And);
    assert_eq!(rules.exclude_on(), Some(&["default.talent1.*".to_string()][..]));
    assert_eq!(rules.walk().len(), 7);

    let RuleNode::Rules(nested) = &rules.rules()[1] else {
        panic!("expected nested rules");
    };
    assert_eq!(nested.kind(), RulesKind::Or);
    assert!(nested.exclude_on().is_none());

    let constraints: Vec<_> = nested
        .rules()
        .iter()
        .map(|node| match node {
            RuleNode::Rule(rule) => rule.constraint().unwrap().clone(),
            RuleNode::Rules(_) => panic!("unexpected nesting"),
        })
        .collect();

    assert_eq!(constraints[0].value_type(), ValueType::Raw);
    assert!(constraints[1].is_absolute_path());
    assert_eq!(constraints[1].segment(), Some("004344"));
    assert!(matches!(constraints[2].kind(), ConstraintKind::Nelson(NelsonRule::Out1Se)));
    assert_eq!(constraints[3].value_type(), ValueType::Raw);
    assert!(!constraints[4].limit_feature_selection());
    assert_eq!(constraints[4].instance_filter_source(), "^c");
}

#[test]
fn save_round_trips() {
    let rules = Rules::load(&tree()).unwrap();
    let saved = rules.save().unwrap();

    assert_eq!(saved["type"], json!("and"));
    assert_eq!(saved["excludeOn"], json!(["default.talent1.*"]));
    assert_eq!(
        saved["rules"][0],
        json!({
            "feature": "speed",
            "op": ops::GREATER_THAN,
            "value": 100,
            "valueType": 1,
            "typeSelector": "car",
            "path": "",
            "instanceIdFilter": ".*",
            "limitFeatureSelection": true
        })
    );
    assert_eq!(saved["rules"][1]["excludeOn"], json!(null));
    assert_eq!(saved["rules"][1]["rules"][1]["path"], json!("/lat"));
    assert_eq!(saved["rules"][1]["rules"][2]["value"], json!(2));
    assert_eq!(
        saved["rules"][1]["rules"][3]["value"],
        json!([{"nmin": 1, "nmax": 1, "accepts": [1]}, {"nmin": 2}])
    );

    let reloaded = Rules::load(&saved).unwrap();
    assert_eq!(reloaded.save().unwrap(), saved);
}

#[test]
fn rules_without_constraint_cannot_be_saved() {
    let mut rules = Rules::load(&tree()).unwrap();
    rules.add(Rule::empty());
    assert!(matches!(rules.save(), Err(TwinError::Validation(_))));

    let nested = Rules::or(vec![RuleNode::Rule(Rule::empty())]);
    let outer = Rules::and(vec![RuleNode::Rules(nested)]);
    assert!(matches!(outer.save(), Err(TwinError::Validation(_))));
}

#[test]
fn rules_type_defaults_to_and() {
    let rules = Rules::load(&json!({ "rules": [] })).unwrap();
    assert_eq!(rules.kind(), RulesKind::And);
    assert_eq!(rules.save().unwrap()["type"], json!("and"));
}

#[test]
fn invalid_configurations_are_rejected() {
    let constraint = |c: serde_json::Value| Rules::load(&json!({ "type": "or", "rules": [c] }));

    assert!(matches!(
        constraint(json!({ "feature": "f", "op": 99 })),
        Err(TwinError::Configuration(_))
    ));
    assert!(matches!(
        constraint(json!({ "feature": "f", "op": 2, "value": 8 })),
        Err(TwinError::Validation(_))
    ));
    assert!(constraint(json!({ "feature": "f", "op": 3, "value": [] })).is_err());
    assert!(constraint(json!({ "feature": "f", "op": 11, "value": 1, "valueType": 5 })).is_err());
    assert!(constraint(json!({ "feature": "f", "op": 11, "value": 1, "instanceIdFilter": "[" })).is_err());
    assert!(Rules::load(&json!({ "type": "xor", "rules": [] })).is_err());
}

#[test]
fn unknown_keys_are_rejected() {
    let unknown = [
        json!({ "type": "or", "rules": [], "exludeOn": ["car.speed"] }),
        json!({ "rules": [{ "type": "and", "rules": [], "extra": 1 }] }),
        json!({ "rules": [{ "feature": "speed", "op": 10, "typeselector": "car" }] }),
    ];
    for document in unknown {
        assert!(
            matches!(Rules::load(&document), Err(TwinError::Configuration(_))),
            "{document}"
        );
    }
}

#[test]
fn exclude_on_selectors_are_validated() {
    let load = |selector: &str| Rules::load(&json!({ "excludeOn": [selector], "rules": [] }));

    assert!(load("car.speed").is_ok());
    assert!(load("*.*").is_ok());
    assert!(load("default.talent1.out").is_ok());
    assert!(matches!(load("speed"), Err(TwinError::Configuration(_))));
    assert!(matches!(load("car.talent1.out"), Err(TwinError::Configuration(_))));
    assert!(matches!(load("default.*.out"), Err(TwinError::Configuration(_))));

    // An empty list is no list
    let rules = Rules::load(&json!({ "excludeOn": [], "rules": [] })).unwrap();
    assert!(rules.exclude_on().is_none());
}

#[test]
fn should_exclude_on_patterns() {
    let rules = Rules::load(&json!({
        "excludeOn": ["car.speed", "truck.*", "default.talent1.*", "default.talent2.alert"],
        "rules": []
    }))
    .unwrap();

    assert!(rules.should_exclude_on("car", "speed"));
    assert!(!rules.should_exclude_on("car", "mode"));
    assert!(rules.should_exclude_on("truck", "load"));
    assert!(rules.should_exclude_on("default", "talent1.anything"));
    assert!(!rules.should_exclude_on("default", "talent10.anything"));
    assert!(rules.should_exclude_on("default", "talent2.alert"));
    assert!(!rules.should_exclude_on("default", "talent2.other"));

    let everything = Rules::load(&json!({ "excludeOn": ["*.*"], "rules": [] })).unwrap();
    assert!(everything.should_exclude_on("any", "thing"));

    let feature_anywhere = Rules::load(&json!({ "excludeOn": ["*.speed"], "rules": [] })).unwrap();
    assert!(feature_anywhere.should_exclude_on("car", "speed"));
    assert!(!feature_anywhere.should_exclude_on("car", "mode"));
}

#[test]
fn unique_type_features_respect_wildcards() {
    let rules = Rules::load(&json!({
        "rules": [
            { "feature": "speed", "op": 1, "typeSelector": "car" },
            { "feature": "speed", "op": 10, "typeSelector": "car" },
            { "feature": "load", "op": 1, "typeSelector": "truck" },
            { "type": "or", "rules": [
                { "feature": "load", "op": 1, "typeSelector": "truck" },
                { "feature": "position", "op": 1, "typeSelector": "004344.*" },
                { "feature": "speed", "op": 1, "typeSelector": "*.*" }
            ]}
        ]
    }))
    .unwrap();

    // *.speed is covered by car.speed
    assert_eq!(
        rules.get_unique_type_features(),
        vec![
            TypeFeature::new("car", "speed", None),
            TypeFeature::new("truck", "load", None),
            TypeFeature::new("*", "position", Some("004344")),
        ]
    );
}

#[test]
fn omit_instance_id_checks_matching_constraints() {
    let rules = Rules::load(&json!({
        "rules": [
            { "feature": "speed", "op": 1, "typeSelector": "car", "instanceIdFilter": "^c" },
            { "type": "or", "rules": [
                { "feature": "load", "op": 1, "typeSelector": "truck" }
            ]}
        ]
    }))
    .unwrap();

    let car_speed = TypeFeature::new("car", "speed", None);
    assert!(!rules.omit_instance_id("c1", &car_speed));
    assert!(rules.omit_instance_id("x1", &car_speed));
    assert!(rules.omit_instance_id("c1", &TypeFeature::new("car", "mode", None)));
    assert!(!rules.omit_instance_id("t1", &TypeFeature::new("truck", "*", None)));
}
