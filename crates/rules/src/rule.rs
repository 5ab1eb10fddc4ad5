//! Rule trees.
//!
//! A [`Rule`] applies one [`Constraint`] to all instances it selects for a
//! triggering event. [`Rules`] combine rules and nested rule trees with AND
//! or OR semantics. Every child is evaluated, in order, even when the
//! outcome is already known, so the [`FeatureMap`] ends up complete.

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use twinsight_core::{
    Result, TwinError, ALL_INSTANCE_IDS_FILTER, ALL_SEGMENTS, ALL_TYPES, ANY_FEATURE, DEFAULT_TYPE,
};
use twinsight_instance::{Instance, InstanceAccess};
use twinsight_metadata::MetadataManager;

use crate::constraint::Constraint;
use crate::feature_map::FeatureMap;

/// The event a rule tree is evaluated for.
#[derive(Debug, Clone, Copy)]
pub struct Trigger<'a> {
    pub subject: &'a str,
    pub type_name: &'a str,
    pub feature: &'a str,
    pub instance_id: &'a str,
}

/// A `(type, feature)` pair a constraint depends on. Either part may be a
/// wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFeature {
    #[serde(rename = "type")]
    pub type_name: String,
    pub feature: String,
    pub segment: Option<String>,
}

impl TypeFeature {
    pub fn new(type_name: &str, feature: &str, segment: Option<&str>) -> Self {
        Self {
            type_name: type_name.to_string(),
            feature: feature.to_string(),
            segment: segment.map(str::to_string),
        }
    }

    /// Types are unique across segments, so the segment is not compared.
    pub fn matches(&self, other: &TypeFeature) -> bool {
        let types = self.type_name == ALL_TYPES || other.type_name == ALL_TYPES || self.type_name == other.type_name;
        let features = self.feature == ANY_FEATURE || other.feature == ANY_FEATURE || self.feature == other.feature;
        types && features
    }
}

// ── Rule ────────────────────────────────────────────────────────

/// A single constraint. A rule without constraint never matches.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    constraint: Option<Constraint>,
}

impl Rule {
    pub fn new(constraint: Constraint) -> Self {
        Self {
            constraint: Some(constraint),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    pub fn type_feature(&self) -> Option<TypeFeature> {
        self.constraint
            .as_ref()
            .map(|c| TypeFeature::new(c.type_name(), c.feature(), c.segment()))
    }

    /// Whether at least one selected instance satisfies the constraint.
    ///
    /// Instances whose feature cannot be fetched count as non-matching.
    pub async fn evaluate(
        &self,
        trigger: &Trigger<'_>,
        feature_map: &mut FeatureMap,
        access: &dyn InstanceAccess,
    ) -> bool {
        let Some(constraint) = &self.constraint else {
            return false;
        };

        // Features of the triggering type are correlated by instance id
        let narrowed = if trigger.type_name == constraint.type_name()
            && constraint.instance_filter_source() == ALL_INSTANCE_IDS_FILTER
        {
            match Regex::new(&format!("(?m)^{}$", regex::escape(trigger.instance_id))) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    debug!(instance_id = %trigger.instance_id, error = %e, "Cannot build instance filter");
                    return false;
                }
            }
        } else {
            None
        };
        let filter = narrowed.as_ref().unwrap_or(constraint.instance_filter());

        let mut instances = match access.get_instances(trigger.subject, filter).await {
            Ok(instances) => instances,
            Err(e) => {
                trace!(
                    subject = %trigger.subject,
                    filter = %filter.as_str(),
                    error = %e,
                    "No instances found"
                );
                Vec::new()
            }
        };

        let triggering_known = instances
            .iter()
            .any(|i| i.type_name == trigger.type_name && i.id == trigger.instance_id);
        if filter.is_match(trigger.instance_id) && !triggering_known {
            instances.push(Instance::new(trigger.type_name, trigger.instance_id));
        }

        if constraint.type_name() != ALL_TYPES {
            instances.retain(|i| i.type_name == constraint.type_name());
        } else if let Some(segment) = constraint.segment().filter(|s| *s != ALL_SEGMENTS) {
            let metadata = access.metadata();
            instances.retain(|i| {
                in_segment(metadata, &i.type_name, segment)
                    && (i.type_name != trigger.type_name || i.id == trigger.instance_id)
            });
        }

        trace!(count = instances.len(), constraint = %constraint, "Instances selected");

        let target = if constraint.feature() == ANY_FEATURE {
            trigger.feature
        } else {
            constraint.feature()
        };

        let mut matched = 0usize;
        for instance in &instances {
            match evaluate_instance(constraint, trigger.subject, instance, target, feature_map, access).await {
                Ok(true) => matched += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        type_name = %instance.type_name,
                        feature = %target,
                        instance_id = %instance.id,
                        error = %e,
                        "Failed to get feature"
                    );
                }
            }

            if constraint.feature() == ANY_FEATURE && !constraint.limit_feature_selection() {
                collect_set_features(instance, feature_map, access.metadata());
            }
        }

        matched > 0
    }

    /// Whether the constraint does not care about `instance_id` for the
    /// given type and feature.
    pub fn omit_instance_id(&self, instance_id: &str, type_feature: &TypeFeature) -> bool {
        let Some(constraint) = &self.constraint else {
            return true;
        };
        let own = TypeFeature::new(constraint.type_name(), constraint.feature(), constraint.segment());
        if !own.matches(type_feature) {
            return true;
        }
        !constraint.instance_filter().is_match(instance_id)
    }
}

fn in_segment(metadata: &MetadataManager, type_name: &str, segment: &str) -> bool {
    metadata
        .resolve_segment(type_name)
        .is_ok_and(|resolved| resolved == segment)
}

async fn evaluate_instance(
    constraint: &Constraint,
    subject: &str,
    instance: &Instance,
    feature: &str,
    feature_map: &mut FeatureMap,
    access: &dyn InstanceAccess,
) -> Result<bool> {
    if !feature_map.contains(&instance.type_name, feature, &instance.id) {
        let meta = access.metadata().resolve_meta_feature(&instance.type_name, feature)?;
        let value = access
            .get_feature(subject, &instance.id, feature, &instance.type_name, Some(&meta))
            .await?;
        feature_map.set(&instance.type_name, feature, &instance.id, value, Some(meta));
    }

    let satisfied = constraint.evaluate(&feature_map.get(&instance.type_name, feature, &instance.id)?.feature);
    if satisfied {
        feature_map.record_rule_match_for(&instance.type_name, feature, &instance.id)?;
    }
    Ok(satisfied)
}

/// Add every set feature of `instance` that is not cached yet.
fn collect_set_features(instance: &Instance, feature_map: &mut FeatureMap, metadata: &MetadataManager) {
    for (idx, value) in instance.features() {
        let Ok(name) = metadata.resolve_feature_at(&instance.type_name, idx) else {
            continue;
        };
        if feature_map.contains(&instance.type_name, &name, &instance.id) {
            continue;
        }
        let Ok(meta) = metadata.resolve_meta_feature(&instance.type_name, &name) else {
            continue;
        };
        feature_map.set(&instance.type_name, &name, &instance.id, value.clone(), Some(meta));
    }
}

// ── Rules ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulesKind {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum RuleNode {
    Rule(Rule),
    Rules(Rules),
}

impl From<Rule> for RuleNode {
    fn from(rule: Rule) -> Self {
        RuleNode::Rule(rule)
    }
}

impl From<Rules> for RuleNode {
    fn from(rules: Rules) -> Self {
        RuleNode::Rules(rules)
    }
}

/// A parsed `excludeOn` selector.
#[derive(Debug, Clone, PartialEq)]
struct ExcludeOn {
    type_name: String,
    feature: String,
    /// Talent id of `default.<talent>.<feature>` selectors.
    talent: Option<String>,
}

impl ExcludeOn {
    fn parse(selector: &str) -> Result<Self> {
        let pattern = Regex::new(r"^([^.]+)\.([^.]+)(?:\.([^.]+))?$")
            .map_err(|e| TwinError::Configuration(e.to_string()))?;

        let captures = pattern.captures(selector).ok_or_else(|| {
            TwinError::Configuration(format!(
                "Invalid typeFeature selector \"{}\" found in excludeOn",
                selector
            ))
        })?;

        let first = captures[1].to_string();
        let second = captures[2].to_string();

        let Some(feature) = captures.get(3) else {
            return Ok(Self {
                type_name: first,
                feature: second,
                talent: None,
            });
        };

        if first != DEFAULT_TYPE {
            return Err(TwinError::Configuration(format!(
                "Invalid typeFeature selector \"{}\". Has to be default type",
                selector
            )));
        }
        if second == ANY_FEATURE {
            return Err(TwinError::Configuration(format!(
                "Talent id has to be defined in typeFeature selector \"{}\"",
                selector
            )));
        }

        Ok(Self {
            type_name: first,
            feature: feature.as_str().to_string(),
            talent: Some(second),
        })
    }

    fn excludes(&self, type_name: &str, feature: &str) -> bool {
        if self.type_name != ALL_TYPES && self.type_name != type_name {
            return false;
        }
        if self.type_name == ALL_TYPES && self.feature == ANY_FEATURE {
            return true;
        }

        match &self.talent {
            Some(talent) if self.feature == ANY_FEATURE => feature.starts_with(&format!("{}.", talent)),
            Some(talent) => feature == format!("{}.{}", talent, self.feature),
            None => self.feature == ANY_FEATURE || self.feature == feature,
        }
    }
}

/// An AND/OR combination of rules and nested rule trees.
#[derive(Debug, Clone)]
pub struct Rules {
    kind: RulesKind,
    exclude_on: Option<Vec<String>>,
    excludes: Vec<ExcludeOn>,
    rules: Vec<RuleNode>,
}

impl Rules {
    /// An empty `exclude_on` list is the same as none.
    pub fn new(kind: RulesKind, exclude_on: Option<Vec<String>>) -> Result<Self> {
        let exclude_on = exclude_on.filter(|selectors| !selectors.is_empty());
        let excludes = exclude_on
            .iter()
            .flatten()
            .map(|selector| ExcludeOn::parse(selector))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            exclude_on,
            excludes,
            rules: Vec::new(),
        })
    }

    pub fn and(rules: Vec<RuleNode>) -> Self {
        Self {
            kind: RulesKind::And,
            exclude_on: None,
            excludes: Vec::new(),
            rules,
        }
    }

    pub fn or(rules: Vec<RuleNode>) -> Self {
        Self {
            kind: RulesKind::Or,
            ..Self::and(rules)
        }
    }

    pub fn with_exclude_on(self, exclude_on: Vec<String>) -> Result<Self> {
        let mut rules = Self::new(self.kind, Some(exclude_on))?;
        rules.rules = self.rules;
        Ok(rules)
    }

    pub fn add(&mut self, node: impl Into<RuleNode>) -> &mut Self {
        self.rules.push(node.into());
        self
    }

    pub fn kind(&self) -> RulesKind {
        self.kind
    }

    pub fn exclude_on(&self) -> Option<&[String]> {
        self.exclude_on.as_deref()
    }

    pub fn rules(&self) -> &[RuleNode] {
        &self.rules
    }

    /// Whether a triggering `type_name.feature` suppresses this tree.
    pub fn should_exclude_on(&self, type_name: &str, feature: &str) -> bool {
        self.excludes.iter().any(|entry| entry.excludes(type_name, feature))
    }

    pub async fn evaluate(
        &self,
        trigger: &Trigger<'_>,
        feature_map: &mut FeatureMap,
        access: &dyn InstanceAccess,
    ) -> bool {
        self.evaluate_node(trigger, feature_map, access, false)
            .await
            .unwrap_or(false)
    }

    /// `None` when an excluded tree abstains below another tree.
    fn evaluate_node<'a>(
        &'a self,
        trigger: &'a Trigger<'a>,
        feature_map: &'a mut FeatureMap,
        access: &'a dyn InstanceAccess,
        nested: bool,
    ) -> BoxFuture<'a, Option<bool>> {
        async move {
            if self.should_exclude_on(trigger.type_name, trigger.feature) {
                trace!(
                    type_name = %trigger.type_name,
                    feature = %trigger.feature,
                    nested,
                    "Rules excluded for trigger"
                );
                return if nested { None } else { Some(false) };
            }

            let mut fulfilled = self.kind == RulesKind::And;

            for node in &self.rules {
                let outcome = match node {
                    RuleNode::Rule(rule) => Some(rule.evaluate(trigger, feature_map, access).await),
                    RuleNode::Rules(rules) => rules.evaluate_node(trigger, feature_map, access, true).await,
                };

                match (self.kind, outcome) {
                    (RulesKind::And, Some(false)) => fulfilled = false,
                    (RulesKind::Or, Some(true)) => fulfilled = true,
                    _ => {}
                }
            }

            Some(fulfilled)
        }
        .boxed()
    }

    /// Distinct `(type, feature)` pairs of all constraints, in tree order.
    /// A pair already covered by a wildcard pair is skipped.
    pub fn get_unique_type_features(&self) -> Vec<TypeFeature> {
        let mut unique: Vec<TypeFeature> = Vec::new();
        for node in self.walk() {
            let RuleNode::Rule(rule) = node else {
                continue;
            };
            let Some(type_feature) = rule.type_feature() else {
                continue;
            };
            if !unique.iter().any(|existing| existing.matches(&type_feature)) {
                unique.push(type_feature);
            }
        }
        unique
    }

    /// Whether no rule of the tree cares about `instance_id`.
    pub fn omit_instance_id(&self, instance_id: &str, type_feature: &TypeFeature) -> bool {
        self.rules.iter().all(|node| match node {
            RuleNode::Rule(rule) => rule.omit_instance_id(instance_id, type_feature),
            RuleNode::Rules(rules) => rules.omit_instance_id(instance_id, type_feature),
        })
    }

    /// All nodes below this tree, depth first, each node before its children.
    pub fn walk(&self) -> Vec<&RuleNode> {
        let mut nodes = Vec::new();
        for node in &self.rules {
            nodes.push(node);
            if let RuleNode::Rules(rules) = node {
                nodes.extend(rules.walk());
            }
        }
        nodes
    }
}
