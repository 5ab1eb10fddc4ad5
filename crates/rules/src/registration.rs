//! Dependency check for talent registration.
//!
//! A talent reads the features its rules refer to and writes its output
//! features. Every registration adds `input -> output` edges to a shared
//! [`FeatureGraph`]; a registration that would close a cycle is rolled back
//! and rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use twinsight_core::{Result, TwinError, ALL_SEGMENTS, ALL_TYPES, DEFAULT_TYPE};
use twinsight_graph::FeatureGraph;
use twinsight_metadata::{MetaFeature, MetadataOwner, TypeTable};

use crate::rule::{Rules, TypeFeature};

/// Inputs excluded from the dependency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipCycleCheck {
    /// `true` skips the check altogether.
    All(bool),
    /// `type.feature` inputs to ignore.
    Features(Vec<String>),
}

impl Default for SkipCycleCheck {
    fn default() -> Self {
        SkipCycleCheck::All(false)
    }
}

impl SkipCycleCheck {
    fn skips_all(&self) -> bool {
        matches!(self, SkipCycleCheck::All(true))
    }

    fn skips(&self, node: &str) -> bool {
        match self {
            SkipCycleCheck::All(all) => *all,
            SkipCycleCheck::Features(features) => features.iter().any(|f| f == node),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TalentDescriptor {
    pub id: String,
    pub rules: Rules,
    /// Output feature name (`<talent id>.<name>`) to metadata. A `type`
    /// field in the metadata selects the output type, `default` otherwise.
    pub outputs: BTreeMap<String, MetaFeature>,
    pub skip_cycle_check: SkipCycleCheck,
}

#[derive(Debug, Default)]
pub struct TalentRegistry {
    graph: FeatureGraph,
    registered: Vec<String>,
}

impl TalentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &FeatureGraph {
        &self.graph
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// Check the dependencies of `talent` and register its outputs with
    /// `owner`. On error the graph is left as it was.
    pub fn register(&mut self, owner: &mut MetadataOwner, talent: &TalentDescriptor) -> Result<()> {
        let prefix = format!("{}.", talent.id);
        if let Some(output) = talent.outputs.keys().find(|name| !name.starts_with(&prefix)) {
            return Err(TwinError::Validation(format!(
                "Output feature {} of talent {} has to start with \"{}\"",
                output, talent.id, prefix
            )));
        }

        self.graph.freeze();

        if !talent.skip_cycle_check.skips_all() {
            let outputs: Vec<String> = talent
                .outputs
                .iter()
                .map(|(name, meta)| {
                    let type_name = meta
                        .fields
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or(DEFAULT_TYPE);
                    format!("{}.{}", type_name, name)
                })
                .collect();

            let inputs = match input_nodes(&talent.rules, owner.table(), &talent.skip_cycle_check) {
                Ok(inputs) => inputs,
                Err(e) => {
                    self.graph.melt();
                    warn!(talent = %talent.id, error = %e, "Talent inputs cannot be resolved");
                    return Err(e);
                }
            };

            for input in &inputs {
                for output in &outputs {
                    self.graph.add_dependency(input, output);
                }
            }

            if self.graph.contains_cycles() {
                self.graph.melt();
                warn!(talent = %talent.id, "Talent registration rejected");
                return Err(TwinError::DependencyCycle(format!(
                    "Talent {} depends on its own outputs",
                    talent.id
                )));
            }
        }

        if let Err(e) = owner.register_talent_output_features(&talent.outputs) {
            self.graph.melt();
            return Err(e);
        }

        self.registered.push(talent.id.clone());
        info!(
            talent = %talent.id,
            outputs = talent.outputs.len(),
            nodes = self.graph.stats().node_count,
            "Talent registered"
        );
        Ok(())
    }
}

/// `type.feature` nodes read by `rules`. Wildcard types expand to the
/// types of the selected segment, or to every type plus `default`. An
/// unknown segment is a `Lookup` error.
fn input_nodes(rules: &Rules, table: &TypeTable, skip: &SkipCycleCheck) -> Result<Vec<String>> {
    let mut nodes: Vec<String> = Vec::new();

    for TypeFeature {
        type_name,
        feature,
        segment,
    } in rules.get_unique_type_features()
    {
        let types = if type_name == ALL_TYPES {
            match segment.as_deref().filter(|s| *s != ALL_SEGMENTS) {
                Some(segment) => table.resolve_types(segment)?,
                None => {
                    let mut types = table.get_types();
                    if !types.iter().any(|t| t == DEFAULT_TYPE) {
                        types.push(DEFAULT_TYPE.to_string());
                    }
                    types
                }
            }
        } else {
            vec![type_name]
        };

        for type_name in types {
            let node = format!("{}.{}", type_name, feature);
            if !skip.skips(&node) && !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    }

    Ok(nodes)
}
