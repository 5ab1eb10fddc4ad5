//! JSON form of rule trees.
//!
//! ```json
//! {
//!   "type": "and",
//!   "excludeOn": ["default.talent1.*"],
//!   "rules": [
//!     { "feature": "speed", "op": 22, "value": 100, "typeSelector": "car" },
//!     { "type": "or", "excludeOn": null, "rules": [ ... ] }
//!   ]
//! }
//! ```
//!
//! Unknown keys are rejected. Constraints are built by op code: `0` schema, `1` change, `2` Nelson
//! rule (value is the rule code), `3` timeseries pattern, `10..=30`
//! comparisons.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use twinsight_core::{Result, TwinError, ALL_INSTANCE_IDS_FILTER, DEFAULT_TYPE};

use crate::constraint::{ops, CompareOp, Constraint, ValueType};
use crate::nelson::NelsonRule;
use crate::pattern::PatternMatcher;
use crate::rule::{Rule, RuleNode, Rules, RulesKind};

// ── Documents ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RulesDocument {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: RulesKind,
    #[serde(default)]
    pub exclude_on: Option<Vec<String>>,
    pub rules: Vec<RuleDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleDocument {
    Rules(RulesDocument),
    Constraint(ConstraintDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConstraintDocument {
    pub feature: String,
    pub op: u8,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default = "default_type_selector")]
    pub type_selector: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_instance_filter")]
    pub instance_id_filter: String,
    #[serde(default = "default_true")]
    pub limit_feature_selection: bool,
}

fn default_kind() -> RulesKind {
    RulesKind::And
}

fn default_type_selector() -> String {
    DEFAULT_TYPE.to_string()
}

fn default_instance_filter() -> String {
    ALL_INSTANCE_IDS_FILTER.to_string()
}

fn default_true() -> bool {
    true
}

// ── Factory ─────────────────────────────────────────────────────

impl ConstraintDocument {
    pub fn build(&self) -> Result<Constraint> {
        let feature = self.feature.as_str();
        let selector = self.type_selector.as_str();

        let constraint = match self.op {
            ops::SCHEMA => Constraint::schema(feature, selector, self.value.clone())?,
            ops::CHANGE => {
                let strict = self
                    .value
                    .get("strictArrayOrder")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                Constraint::change(feature, selector, strict)?
            }
            ops::NELSON => {
                let code = self
                    .value
                    .as_u64()
                    .and_then(|code| u8::try_from(code).ok())
                    .ok_or_else(|| TwinError::Validation(format!("Invalid Nelson type {} given", self.value)))?;
                Constraint::nelson(feature, selector, NelsonRule::from_code(code)?)?
            }
            ops::TIMESERIES_PATTERN => {
                Constraint::pattern(feature, selector, PatternMatcher::from_json(&self.value)?)?
            }
            code => match CompareOp::from_code(code) {
                Some(op) => Constraint::compare(feature, selector, op, self.value.clone())?,
                None => {
                    return Err(TwinError::Configuration(format!("Invalid operation {} given", code)));
                }
            },
        };

        let constraint = match self.value_type {
            Some(value_type) => constraint.with_value_type(value_type),
            None => constraint,
        };

        Ok(constraint
            .with_path(&self.path)
            .with_instance_filter(&self.instance_id_filter)?
            .with_limit_feature_selection(self.limit_feature_selection))
    }
}

impl From<&Constraint> for ConstraintDocument {
    fn from(constraint: &Constraint) -> Self {
        Self {
            feature: constraint.feature().to_string(),
            op: constraint.op(),
            value: constraint.value(),
            value_type: Some(constraint.value_type()),
            type_selector: constraint.type_selector().to_string(),
            path: constraint.path_source(),
            instance_id_filter: constraint.instance_filter_source().to_string(),
            limit_feature_selection: constraint.limit_feature_selection(),
        }
    }
}

impl RulesDocument {
    pub fn build(&self) -> Result<Rules> {
        let mut rules = Rules::new(self.kind, self.exclude_on.clone())?;
        for document in &self.rules {
            match document {
                RuleDocument::Rules(nested) => rules.add(nested.build()?),
                RuleDocument::Constraint(constraint) => rules.add(Rule::new(constraint.build()?)),
            };
        }
        Ok(rules)
    }
}

impl TryFrom<&Rules> for RulesDocument {
    type Error = TwinError;

    /// Fails on rules without constraint, which have no JSON form.
    fn try_from(rules: &Rules) -> Result<Self> {
        let rules_documents = rules
            .rules()
            .iter()
            .map(|node| match node {
                RuleNode::Rules(nested) => Ok(RuleDocument::Rules(nested.try_into()?)),
                RuleNode::Rule(rule) => rule
                    .constraint()
                    .map(|c| RuleDocument::Constraint(c.into()))
                    .ok_or_else(|| TwinError::Validation("Rule without constraint cannot be saved".to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind: rules.kind(),
            exclude_on: rules.exclude_on().map(<[String]>::to_vec),
            rules: rules_documents,
        })
    }
}

// ── Entry points ────────────────────────────────────────────────

impl Rules {
    /// Build a rule tree from its JSON form.
    pub fn load(json: &Value) -> Result<Self> {
        let document: RulesDocument = serde_json::from_value(json.clone())
            .map_err(|e| TwinError::Configuration(format!("Invalid rule configuration found: {}", e)))?;
        let rules = document.build()?;
        debug!(kind = ?rules.kind(), rules = rules.rules().len(), "Rules loaded");
        Ok(rules)
    }

    /// The JSON form of this tree, loadable again with [`Rules::load`].
    /// A rule without constraint is a `Validation` error.
    pub fn save(&self) -> Result<Value> {
        let document = RulesDocument::try_from(self)?;
        Ok(serde_json::to_value(document)?)
    }
}
