use std::collections::BTreeMap;

use serde_json::Value;

use twinsight_core::query::resolve_vpath;
use twinsight_core::{Result, TwinError, PART_KEY};

use crate::feature::{Feature, FeatureUpdate};
use crate::stat::RunningStat;


/// Expiry and statistics bookkeeping of one feature index.
#[derive(Debug, Clone, Default)]
struct FeatureHelper {
    /// Absolute expiry of the current value, `0` once retired.
    expires_ms: i64,
    stat: Option<RunningStat>,
}

/// Feature state of one `(type, id)` entity.
#[derive(Debug, Clone)]
pub struct Instance {
    pub type_name: String,
    pub id: String,
    features: Vec<Option<Feature>>,
    helpers: BTreeMap<usize, FeatureHelper>,
}

impl Instance {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            features: Vec::new(),
            helpers: BTreeMap::new(),
        }
    }

    /// All currently set features with their index.
    pub fn features(&self) -> impl Iterator<Item = (usize, &Feature)> {
        self.features
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|f| (idx, f)))
    }

    /// The feature at `idx`, or a default-valued stand-in if the slot is
    /// unset and a default is given.
    pub fn get_feature_at(&self, idx: usize, default: Option<&Value>) -> Result<Feature> {
        match self.features.get(idx).and_then(Option::as_ref) {
            Some(feature) => Ok(feature.clone()),
            None => default.map(Feature::with_default).ok_or_else(|| {
                TwinError::Lookup(format!(
                    "Feature at index {} is null and no default value was given",
                    idx
                ))
            }),
        }
    }

    /// Apply a new value to the feature at `idx`.
    ///
    /// `None` arguments mean "unset" and reject the update. An `encoded`
    /// value of `Some(Value::Null)` marks a feature without encoding.
    /// Returns `Ok(None)` for updates that are ignored (duplicate timestamp,
    /// already expired, or trimmed out of the history right away).
    #[allow(clippy::too_many_arguments)]
    pub fn update_feature_at(
        &mut self,
        idx: usize,
        encoded: Option<&Value>,
        raw: Option<&Value>,
        when_ms: Option<i64>,
        max_history: usize,
        ttl_ms: i64,
        now: i64,
    ) -> Result<Option<FeatureUpdate>> {
        self.prune(now);

        let (Some(encoded), Some(raw), Some(when_ms)) = (encoded, raw, when_ms) else {
            return Ok(None);
        };

        if idx >= self.features.len() {
            self.features.resize(idx + 1, None);
        }

        let expires_ms = when_ms.saturating_add(ttl_ms);

        if let Some(part) = raw.get(PART_KEY).and_then(Value::as_f64) {
            return self.update_part(idx, part, raw, expires_ms).map(Some);
        }

        let helper = self.helpers.entry(idx).or_default();

        if let Some(current) = &self.features[idx] {
            if current.timestamps().any(|when| when == when_ms) {
                return Ok(None);
            }
        }

        let older_than_retained = match &self.features[idx] {
            Some(current) => current.timestamps().all(|when| when_ms < when),
            None => true,
        };

        if expires_ms < now && older_than_retained {
            return Ok(None);
        }

        let enc = (!encoded.is_null()).then(|| encoded.clone());

        if let Some(enc) = &enc {
            let stat = helper.stat.get_or_insert_with(RunningStat::new);
            // Values without a numeric form do not contribute
            if let Some(number) = resolve_vpath(enc).ok().and_then(|v| v.as_f64()) {
                stat.push(number, when_ms);
            }
        }

        let mut hidx = -1i64;

        let mut feature = match self.features[idx].take() {
            Some(mut current) if when_ms < current.when_ms => {
                // Late value: goes into the history at its sorted position
                let pos = current
                    .history
                    .iter()
                    .position(|h| h.when_ms < when_ms)
                    .unwrap_or(current.history.len());
                let entry = Feature::new(raw.clone(), enc, when_ms, expires_ms).to_history();
                current.history.insert(pos, entry);
                hidx = pos as i64;
                current
            }
            Some(mut current) => {
                let mut history = std::mem::take(&mut current.history);
                history.insert(0, current.to_history());
                let mut next = Feature::new(raw.clone(), enc, when_ms, expires_ms);
                next.history = history;
                next
            }
            None => Feature::new(raw.clone(), enc, when_ms, expires_ms),
        };

        if feature.history.len() > max_history {
            let removed = feature.history.split_off(max_history);
            if let Some(stat) = helper.stat.as_mut() {
                for entry in &removed {
                    stat.remove(entry.when_ms);
                }
            }
        }

        feature.stat = helper.stat.as_mut().map(RunningStat::snapshot);
        helper.expires_ms = feature.ttl_ms;

        let trimmed = hidx >= 0 && hidx as usize >= max_history;
        let result = feature.clone();
        self.features[idx] = Some(feature);

        if trimmed {
            return Ok(None);
        }

        Ok(Some(FeatureUpdate {
            hidx,
            feature: result,
        }))
    }

    /// Retire every value whose expiry lies before `now`. A retired index
    /// loses its value and statistics and is not revisited.
    pub fn prune(&mut self, now: i64) {
        for (idx, helper) in self.helpers.iter_mut() {
            if helper.expires_ms > 0 && helper.expires_ms < now {
                if let Some(slot) = self.features.get_mut(*idx) {
                    *slot = None;
                }
                helper.expires_ms = 0;
                helper.stat = None;
            }
        }
    }

    fn update_part(&mut self, idx: usize, part: f64, raw: &Value, expires_ms: i64) -> Result<FeatureUpdate> {
        let not_an_array =
            || TwinError::PartialUpdate("Partial results need a target feature of type Array".to_string());

        let feature = self.features[idx].as_mut().ok_or_else(not_an_array)?;
        let items = feature.raw.as_array_mut().ok_or_else(not_an_array)?;

        if part.fract() != 0.0 || part < 0.0 || part as usize >= items.len() {
            return Err(TwinError::InvalidIndex(part as i64));
        }

        items[part as usize] = raw.get("value").cloned().unwrap_or(Value::Null);
        feature.enc = None;
        feature.ttl_ms = expires_ms;

        self.helpers.entry(idx).or_default().expires_ms = expires_ms;

        Ok(FeatureUpdate {
            hidx: -1,
            feature: feature.clone(),
        })
    }
}
