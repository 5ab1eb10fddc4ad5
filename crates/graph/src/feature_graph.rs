use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::warn;

use twinsight_core::{ALL_TYPES, ANY_FEATURE};

#[derive(Debug, Clone, Default, PartialEq)]
struct GraphState {
    /// Node ids in insertion order.
    ids: Vec<String>,
    children: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub frozen: bool,
}

/// Directed graph of feature dependencies with a single level of
/// transactional rollback.
#[derive(Debug, Clone, Default)]
pub struct FeatureGraph {
    state: GraphState,
    frozen: Option<GraphState>,
}

impl FeatureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edge `from -> to`, creating both nodes on demand.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.ensure_node(from);
        self.ensure_node(to);

        let children = self.state.children.entry(from.to_string()).or_default();
        if !children.iter().any(|c| c == to) {
            children.push(to.to_string());
        }
    }

    /// Record the current nodes and edges. A later [`melt`](Self::melt)
    /// restores them; freezing again overwrites the recorded state.
    pub fn freeze(&mut self) {
        self.frozen = Some(self.state.clone());
    }

    /// Go back to the last frozen state. Does nothing if not frozen.
    pub fn melt(&mut self) {
        if let Some(state) = self.frozen.take() {
            self.state = state;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn ids(&self) -> &[String] {
        &self.state.ids
    }

    /// All edges as `(from, to)`, sorted.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .state
            .children
            .iter()
            .flat_map(|(from, children)| children.iter().map(move |to| (from.clone(), to.clone())))
            .collect();
        edges.sort();
        edges
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.state.ids.len(),
            edge_count: self.state.children.values().map(Vec::len).sum(),
            frozen: self.is_frozen(),
        }
    }

    /// Maximal paths through the graph, starting from every node (in sorted
    /// order) not already covered by an earlier traversal. A path ends at a
    /// leaf or right after the first node it revisits.
    pub fn get_all_paths(&self) -> Vec<Vec<String>> {
        let mut roots: Vec<&String> = self.state.ids.iter().collect();
        roots.sort();

        let mut visited = HashSet::new();
        let mut paths = Vec::new();

        for root in roots {
            if visited.contains(root.as_str()) {
                continue;
            }
            let mut path = vec![root.clone()];
            self.collect_paths(&mut path, &mut visited, &mut paths);
        }

        paths
    }

    /// Whether any path contains a cycle. Besides revisited nodes, wildcard
    /// nodes count as cycles when they may stand for another node on the
    /// same path: `*.*` on any path longer than one node, and `<type>.*`
    /// when another node of the path starts with `<type>.`.
    pub fn contains_cycles(&self) -> bool {
        let any = format!("{}.{}", ALL_TYPES, ANY_FEATURE);

        for path in self.get_all_paths() {
            if path.len() > 1 && path.contains(&any) {
                warn!(path = %render(&path), "General wildcard found in a graph path");
                return true;
            }

            let unique: HashSet<&String> = path.iter().collect();
            if unique.len() != path.len() {
                warn!(path = %render(&path), "Feature cycle found in path");
                return true;
            }

            for (i, node) in path.iter().enumerate() {
                // *.<feature> cannot be attributed to a type
                let Some((type_name, feature)) = node.split_once('.') else {
                    continue;
                };
                if type_name == ALL_TYPES || feature != ANY_FEATURE {
                    continue;
                }

                let prefix = format!("{}.", type_name);
                let prefix_matches = path
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.starts_with(&prefix));

                if prefix_matches {
                    warn!(
                        prefix = %prefix,
                        path = %render(&path),
                        "Feature wildcard for type prefix matches other entry in path"
                    );
                    return true;
                }
            }
        }

        false
    }

    fn ensure_node(&mut self, id: &str) {
        if !self.state.children.contains_key(id) {
            self.state.ids.push(id.to_string());
            self.state.children.insert(id.to_string(), Vec::new());
        }
    }

    fn collect_paths(&self, path: &mut Vec<String>, visited: &mut HashSet<String>, paths: &mut Vec<Vec<String>>) {
        let Some((last, before)) = path.split_last() else {
            return;
        };

        if before.contains(last) {
            paths.push(path.clone());
            return;
        }

        let last = last.clone();
        visited.insert(last.clone());

        let children = self.state.children.get(&last).cloned().unwrap_or_default();
        if children.is_empty() {
            paths.push(path.clone());
            return;
        }

        for child in children {
            path.push(child);
            self.collect_paths(path, visited, paths);
            path.pop();
        }
    }
}

impl fmt::Display for FeatureGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.get_all_paths().iter().map(|p| p.join("->")).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

fn render(path: &[String]) -> String {
    path.join(" -> ")
}
