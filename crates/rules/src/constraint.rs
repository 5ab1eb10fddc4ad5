//! Predicates over a single feature.
//!
//! A [`Constraint`] addresses a feature through a type selector
//! (`[segment.]type`, either part may be `*`), picks the raw or encoded value,
//! resolves an optional path query and applies its [`ConstraintKind`].
//!
//! Scalar kinds (schema, comparison, change) look at the current value and
//! the newest history entry. Timeseries kinds (Nelson rules, patterns) look
//! at a window of current and historical values.

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{trace, warn};

use twinsight_core::equals::deep_equals;
use twinsight_core::query::{first, query, resolve_vpath};
use twinsight_core::{Result, TwinError, ALL_INSTANCE_IDS_FILTER, ANY_FEATURE, DEFAULT_TYPE, PATH_IDENTITY};
use twinsight_instance::{Feature, HistoryFeature};

use crate::nelson::NelsonRule;
use crate::pattern::PatternMatcher;


/// Numeric discriminants of the constraint kinds and comparison ops.
pub mod ops {
    pub const SCHEMA: u8 = 0;
    pub const CHANGE: u8 = 1;
    pub const NELSON: u8 = 2;
    pub const TIMESERIES_PATTERN: u8 = 3;

    pub const ISSET: u8 = 10;
    pub const EQUALS: u8 = 11;
    pub const NEQUALS: u8 = 12;
    pub const LESS_THAN: u8 = 20;
    pub const LESS_THAN_EQUAL: u8 = 21;
    pub const GREATER_THAN: u8 = 22;
    pub const GREATER_THAN_EQUAL: u8 = 23;
    pub const REGEX: u8 = 30;
}

// ── Value type ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ValueType {
    Raw,
    Encoded,
}

impl TryFrom<u8> for ValueType {
    type Error = TwinError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ValueType::Raw),
            1 => Ok(ValueType::Encoded),
            other => Err(TwinError::Validation(format!("Value type not found for key {}", other))),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value_type: ValueType) -> u8 {
        match value_type {
            ValueType::Raw => 0,
            ValueType::Encoded => 1,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Raw => write!(f, "RAW"),
            ValueType::Encoded => write!(f, "ENCODED"),
        }
    }
}

// ── Comparison ops ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    IsSet,
    Equals,
    NotEquals,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Regex,
}

impl CompareOp {
    pub fn code(self) -> u8 {
        match self {
            CompareOp::IsSet => ops::ISSET,
            CompareOp::Equals => ops::EQUALS,
            CompareOp::NotEquals => ops::NEQUALS,
            CompareOp::LessThan => ops::LESS_THAN,
            CompareOp::LessThanEqual => ops::LESS_THAN_EQUAL,
            CompareOp::GreaterThan => ops::GREATER_THAN,
            CompareOp::GreaterThanEqual => ops::GREATER_THAN_EQUAL,
            CompareOp::Regex => ops::REGEX,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            ops::ISSET => CompareOp::IsSet,
            ops::EQUALS => CompareOp::Equals,
            ops::NEQUALS => CompareOp::NotEquals,
            ops::LESS_THAN => CompareOp::LessThan,
            ops::LESS_THAN_EQUAL => CompareOp::LessThanEqual,
            ops::GREATER_THAN => CompareOp::GreaterThan,
            ops::GREATER_THAN_EQUAL => CompareOp::GreaterThanEqual,
            ops::REGEX => CompareOp::Regex,
            _ => return None,
        })
    }

    /// JSON schema accepting exactly the values satisfying `op value`.
    pub fn schema(self, value: &Value) -> Value {
        match self {
            CompareOp::IsSet => json!({ "not": { "type": "null" } }),
            CompareOp::Equals => json!({ "const": value }),
            CompareOp::NotEquals => json!({ "not": { "const": value } }),
            CompareOp::LessThan => json!({ "type": "number", "exclusiveMaximum": value }),
            CompareOp::LessThanEqual => json!({ "type": "number", "maximum": value }),
            CompareOp::GreaterThan => json!({ "type": "number", "exclusiveMinimum": value }),
            CompareOp::GreaterThanEqual => json!({ "type": "number", "minimum": value }),
            CompareOp::Regex => json!({ "type": "string", "pattern": value }),
        }
    }
}

// ── Schema validator ────────────────────────────────────────────

/// A compiled JSON schema together with its source.
#[derive(Clone)]
pub struct SchemaValidator {
    schema: Value,
    compiled: Arc<JSONSchema>,
}

impl SchemaValidator {
    pub fn compile(schema: Value) -> Result<Self> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| TwinError::Validation(format!("Invalid schema {}: {}", schema, e)))?;
        Ok(Self {
            schema,
            compiled: Arc::new(compiled),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.compiled.is_valid(value)
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator").field("schema", &self.schema).finish()
    }
}

// ── Constraint kinds ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// Value must validate against a JSON schema.
    Schema(SchemaValidator),
    /// Value must satisfy a comparison, checked through a generated schema.
    Compare {
        op: CompareOp,
        value: Value,
        validator: SchemaValidator,
    },
    /// Value must differ from the previous value at the same path.
    Change { strict_array_order: bool },
    /// Window of encoded values must violate a Nelson rule.
    Nelson(NelsonRule),
    /// Window of values (oldest first) must end with a pattern match.
    Pattern(PatternMatcher),
}

impl ConstraintKind {
    pub fn op(&self) -> u8 {
        match self {
            ConstraintKind::Schema(_) => ops::SCHEMA,
            ConstraintKind::Compare { op, .. } => op.code(),
            ConstraintKind::Change { .. } => ops::CHANGE,
            ConstraintKind::Nelson(_) => ops::NELSON,
            ConstraintKind::Pattern(_) => ops::TIMESERIES_PATTERN,
        }
    }

    /// The serialized `value` of a constraint of this kind.
    pub fn value(&self) -> Value {
        match self {
            ConstraintKind::Schema(validator) => validator.schema().clone(),
            ConstraintKind::Compare { value, .. } => value.clone(),
            ConstraintKind::Change { strict_array_order: true } => Value::Null,
            ConstraintKind::Change { strict_array_order: false } => json!({ "strictArrayOrder": false }),
            ConstraintKind::Nelson(rule) => json!(rule.code()),
            ConstraintKind::Pattern(matcher) => matcher.to_json(),
        }
    }

    /// Number of values (current value included) a timeseries kind needs,
    /// `None` for scalar kinds.
    pub fn min_value_count(&self) -> Option<usize> {
        match self {
            ConstraintKind::Nelson(rule) => Some(rule.min_value_count()),
            ConstraintKind::Pattern(matcher) => Some(matcher.total_min_length()),
            _ => None,
        }
    }
}

// ── Constraint ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Constraint {
    feature: String,
    type_selector: String,
    segment: Option<String>,
    type_name: String,
    value_type: ValueType,
    path: String,
    absolute_path: bool,
    instance_filter: Regex,
    instance_filter_source: String,
    limit_feature_selection: bool,
    kind: ConstraintKind,
}

impl Constraint {
    /// Build a constraint on `feature` of the types selected by
    /// `type_selector`. The value type defaults to encoded, except for
    /// patterns which look at raw values.
    pub fn new(feature: &str, type_selector: &str, kind: ConstraintKind) -> Result<Self> {
        let (segment, type_name) = parse_type_selector(type_selector)?;
        let value_type = match kind {
            ConstraintKind::Pattern(_) => ValueType::Raw,
            _ => ValueType::Encoded,
        };

        Ok(Self {
            feature: feature.to_string(),
            type_selector: type_selector.to_string(),
            segment,
            type_name,
            value_type,
            path: PATH_IDENTITY.to_string(),
            absolute_path: false,
            instance_filter: compile_instance_filter(ALL_INSTANCE_IDS_FILTER)?,
            instance_filter_source: ALL_INSTANCE_IDS_FILTER.to_string(),
            limit_feature_selection: true,
            kind,
        })
    }

    pub fn compare(feature: &str, type_selector: &str, op: CompareOp, value: Value) -> Result<Self> {
        let validator = SchemaValidator::compile(op.schema(&value))?;
        Self::new(feature, type_selector, ConstraintKind::Compare { op, value, validator })
    }

    pub fn schema(feature: &str, type_selector: &str, schema: Value) -> Result<Self> {
        Self::new(feature, type_selector, ConstraintKind::Schema(SchemaValidator::compile(schema)?))
    }

    pub fn change(feature: &str, type_selector: &str, strict_array_order: bool) -> Result<Self> {
        Self::new(feature, type_selector, ConstraintKind::Change { strict_array_order })
    }

    /// Nelson rules always run on the whole encoded value.
    pub fn nelson(feature: &str, type_selector: &str, rule: NelsonRule) -> Result<Self> {
        Self::new(feature, type_selector, ConstraintKind::Nelson(rule))
    }

    pub fn pattern(feature: &str, type_selector: &str, matcher: PatternMatcher) -> Result<Self> {
        Self::new(feature, type_selector, ConstraintKind::Pattern(matcher))
    }

    /// Ignored for Nelson rules.
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        if !matches!(self.kind, ConstraintKind::Nelson(_)) {
            self.value_type = value_type;
        }
        self
    }

    /// A leading `/` makes the path absolute: `$vpath` markers in the value
    /// are not followed. Ignored for Nelson rules.
    pub fn with_path(mut self, path: &str) -> Self {
        if matches!(self.kind, ConstraintKind::Nelson(_)) {
            return self;
        }
        match path.strip_prefix('/') {
            Some(rest) => {
                self.path = rest.to_string();
                self.absolute_path = true;
            }
            None => {
                self.path = path.to_string();
                self.absolute_path = false;
            }
        }
        self
    }

    pub fn with_instance_filter(mut self, filter: &str) -> Result<Self> {
        self.instance_filter = compile_instance_filter(filter)?;
        self.instance_filter_source = filter.to_string();
        Ok(self)
    }

    /// With `limit == false` and the any-feature selector, evaluation also
    /// collects every other set feature of the matching instances.
    pub fn with_limit_feature_selection(mut self, limit: bool) -> Self {
        if !limit && self.feature != ANY_FEATURE {
            warn!(
                feature = %self.feature,
                "limitFeatureSelection=false only has an effect for the any-feature selector"
            );
        }
        self.limit_feature_selection = limit;
        self
    }

    // ── Accessors ──

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn type_selector(&self) -> &str {
        &self.type_selector
    }

    pub fn segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// The path without the absolute marker.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_absolute_path(&self) -> bool {
        self.absolute_path
    }

    /// The path as it was given, including the absolute marker.
    pub fn path_source(&self) -> String {
        if self.absolute_path {
            format!("/{}", self.path)
        } else {
            self.path.clone()
        }
    }

    pub fn instance_filter(&self) -> &Regex {
        &self.instance_filter
    }

    pub fn instance_filter_source(&self) -> &str {
        &self.instance_filter_source
    }

    pub fn limit_feature_selection(&self) -> bool {
        self.limit_feature_selection
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn op(&self) -> u8 {
        self.kind.op()
    }

    pub fn value(&self) -> Value {
        self.kind.value()
    }

    // ── Evaluation ──

    /// Whether `feature` satisfies this constraint. Values that cannot be
    /// read at the configured path never satisfy it.
    pub fn evaluate(&self, feature: &Feature) -> bool {
        trace!(constraint = %self, when_ms = feature.when_ms, "Evaluating constraint");

        match self.kind.min_value_count() {
            Some(min_count) => self.evaluate_timeseries(feature, min_count),
            None => self.evaluate_scalar(feature),
        }
    }

    fn evaluate_scalar(&self, feature: &Feature) -> bool {
        let Ok(current) = self.read(&feature.raw, feature.enc.as_ref()) else {
            return false;
        };
        let Ok(results) = query(&current, &self.path) else {
            return false;
        };

        if results.is_empty() {
            return false;
        }

        results.iter().all(|result| {
            let previous = feature
                .history
                .first()
                .and_then(|h| self.read_history(h, &result.query).ok())
                .unwrap_or(Value::Null);
            self.holds(&result.value, &previous)
        })
    }

    fn evaluate_timeseries(&self, feature: &Feature, min_count: usize) -> bool {
        if feature.history.len() < min_count.saturating_sub(1) {
            return false;
        }

        let Ok(current) = self.read(&feature.raw, feature.enc.as_ref()) else {
            return false;
        };
        let Ok(results) = query(&current, &self.path) else {
            return false;
        };

        if results.is_empty() {
            return false;
        }

        for result in &results {
            let mut window = Vec::with_capacity(feature.history.len() + 1);
            window.push(result.value.clone());
            for entry in &feature.history {
                match self.read_history(entry, &result.query) {
                    Ok(value) => window.push(value),
                    Err(_) => return false,
                }
            }
            // Oldest first
            window.reverse();

            let holds = match &self.kind {
                ConstraintKind::Nelson(rule) => {
                    let numbers: Option<Vec<f64>> = window.iter().map(Value::as_f64).collect();
                    match (numbers, feature.stat.as_ref()) {
                        (Some(numbers), Some(stat)) => rule.evaluate(&numbers, stat),
                        _ => false,
                    }
                }
                ConstraintKind::Pattern(matcher) => matcher.match_at_end(&window).is_some(),
                _ => false,
            };

            if !holds {
                return false;
            }
        }

        true
    }

    fn holds(&self, value: &Value, previous: &Value) -> bool {
        match &self.kind {
            ConstraintKind::Schema(validator) => validator.is_valid(value),
            ConstraintKind::Compare { validator, .. } => validator.is_valid(value),
            ConstraintKind::Change { strict_array_order } => !deep_equals(value, previous, *strict_array_order),
            _ => false,
        }
    }

    /// The selected value with `$vpath` followed unless the path is absolute.
    fn read(&self, raw: &Value, enc: Option<&Value>) -> Result<Value> {
        let value = match self.value_type {
            ValueType::Raw => Some(raw),
            ValueType::Encoded => enc,
        }
        .filter(|v| !v.is_null())
        .ok_or_else(|| TwinError::Lookup(format!("No {} value present", self.value_type)))?;

        if self.absolute_path {
            Ok(value.clone())
        } else {
            resolve_vpath(value)
        }
    }

    fn read_history(&self, entry: &HistoryFeature, path: &str) -> Result<Value> {
        let value = self.read(&entry.raw, entry.enc.as_ref())?;
        Ok(first(&value, path)?.value)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} value of \"", self.value_type)?;
        if let Some(segment) = &self.segment {
            write!(f, "{}.", segment)?;
        }
        write!(f, "{}.{}\" at path \"{}\"", self.type_name, self.feature, self.path)
    }
}

/// `[segment.]type`, where both parts may be `*`. An empty segment (as in
/// `.type`) is the same as none.
fn parse_type_selector(selector: &str) -> Result<(Option<String>, String)> {
    let pattern = Regex::new(r"^(?:(\*|[^.]+)\.)?([^.]+)$")
        .map_err(|e| TwinError::Configuration(e.to_string()))?;

    let trimmed = selector.strip_prefix('.').unwrap_or(selector);
    let captures = pattern.captures(trimmed).ok_or_else(|| {
        TwinError::Configuration(format!("Invalid type selector \"{}\"", selector))
    })?;

    let segment = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty());
    let type_name = captures
        .get(2)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_TYPE.to_string());

    Ok((segment, type_name))
}

fn compile_instance_filter(filter: &str) -> Result<Regex> {
    Regex::new(&format!("(?m){}", filter))
        .map_err(|e| TwinError::Configuration(format!("Invalid instance id filter \"{}\": {}", filter, e)))
}
