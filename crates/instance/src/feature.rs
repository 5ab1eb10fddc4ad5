use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Running statistics attached to a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    pub cnt: usize,
    pub mean: Option<f64>,
    pub var: Option<f64>,
    pub sdev: Option<f64>,
}

/// A past value of a feature. Carries neither history nor statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFeature {
    pub when_ms: i64,
    pub ttl_ms: i64,
    pub raw: Value,
    pub enc: Option<Value>,
}

/// The current value of a feature.
///
/// `ttl_ms` is the absolute expiry instant (`when_ms + ttl`), not a
/// duration. `history` is ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub when_ms: i64,
    pub ttl_ms: i64,
    pub raw: Value,
    pub enc: Option<Value>,
    pub stat: Option<FeatureStat>,
    #[serde(default)]
    pub history: Vec<HistoryFeature>,
}

impl Feature {
    pub fn new(raw: Value, enc: Option<Value>, when_ms: i64, ttl_ms: i64) -> Self {
        Self {
            when_ms,
            ttl_ms,
            raw,
            enc,
            stat: None,
            history: Vec::new(),
        }
    }

    /// Stand-in for an unset feature: `value` as raw and encoded form,
    /// with timestamp and expiry set to `-1`.
    pub fn with_default(value: &Value) -> Self {
        Self::new(value.clone(), Some(value.clone()), -1, -1)
    }

    /// Copy of the current value as history entry.
    pub fn to_history(&self) -> HistoryFeature {
        HistoryFeature {
            when_ms: self.when_ms,
            ttl_ms: self.ttl_ms,
            raw: self.raw.clone(),
            enc: self.enc.clone(),
        }
    }

    /// Timestamps of the current value and all history entries, newest first.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        std::iter::once(self.when_ms).chain(self.history.iter().map(|h| h.when_ms))
    }
}

/// Outcome of an accepted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureUpdate {
    /// Position of the value in the history, or `-1` if it became (or
    /// partially updated) the current value.
    #[serde(rename = "$hidx")]
    pub hidx: i64,
    #[serde(rename = "$feature")]
    pub feature: Feature,
}
