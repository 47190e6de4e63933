//! Decision-graph data model (spec §3, §9 "Dynamic shapes from LLMs").
//!
//! LLM output is untyped JSON; this module is the boundary where it becomes
//! tagged Rust variants. Ingress (`NodeKind`/`EdgeKind` parsing) is strict —
//! unknown shapes are rejected. Egress envelopes use `#[serde(flatten)]`
//! catch-alls so unrecognised-but-harmless extra fields the LLM or a client
//! attaches survive a round trip, per the pass-through rule in §9.

pub mod layout;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Goal,
    Decision,
    Option,
    Factor,
    Outcome,
    Risk,
    Action,
}

/// Kind-dependent attributes carried by `factor` nodes (spec §3 "Graph":
/// "factors carry `observed_state: {value, unit, source}`").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedState {
    pub value: f64,
    pub unit: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub suggested_position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_state: Option<ObservedState>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Causal direction of an edge's effect (spec §3 "Edge", §9 REDESIGN FLAGS:
/// tagged variants instead of loose strings).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EffectDirection {
    Positive,
    Negative,
    #[default]
    None,
}

/// Optional source attribution for an edge (spec §3 "Edge": `provenance
/// {source, quote?, location?}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeProvenance {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_probability")]
    pub exists_probability: f64,
    #[serde(default)]
    pub belief: Option<f64>,
    /// Mean of the edge's strength distribution (spec §3 "Edge": `strength
    /// distribution {mean, std}`). `strength_std` carries the optional
    /// spread; a `None` std means the distribution collapses to the mean.
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub strength_std: Option<f64>,
    #[serde(default)]
    pub effect_direction: EffectDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<EdgeProvenance>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_probability() -> f64 {
    1.0
}

fn default_strength() -> f64 {
    1.0
}

/// A numeric target assigned to a factor node by an option, with a
/// provenance tag recording how the target was determined (spec §3
/// "Option": `interventions: a mapping from factor-node id to a numeric
/// target value with a provenance tag`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    pub target_value: f64,
    pub provenance: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptionStatus {
    Ready,
    Blocked,
}

/// Reconciles an LLM-named intervention target against the graph's actual
/// factor ids (spec §3 "Option": "target-match record used to reconcile
/// LLM-named targets against actual factor ids").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetMatchRecord {
    pub requested_target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_factor_id: Option<String>,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionNode {
    pub id: String,
    pub decision_id: String,
    pub label: String,
    #[serde(default)]
    pub outcome_ids: Vec<String>,
    #[serde(default)]
    pub interventions: BTreeMap<String, Intervention>,
    #[serde(default = "default_option_status")]
    pub status: OptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_match: Option<TargetMatchRecord>,
}

fn default_option_status() -> OptionStatus {
    OptionStatus::Ready
}

/// The decision graph proper. Node/edge order is the canonical order used
/// for deterministic serialisation and the frozen-graph byte comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Graph {
    /// Schema version for this graph's shape (spec §3 "Graph": "a schema
    /// version"). Stamped onto the draft at Stage 1; `Graph::default()`
    /// leaves it empty for fixtures/tests that never go through Stage 1.
    #[serde(default)]
    pub schema_version: String,
    /// The seed the draft was generated with (spec §3 "Graph": "a default
    /// deterministic seed"), surfaced so callers can confirm determinism
    /// without threading the request seed through separately.
    #[serde(default)]
    pub default_seed: u64,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub options: Vec<OptionNode>,
}

impl Graph {
    pub fn node_ids(&self) -> std::collections::HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Nodes with no incoming edge.
    pub fn roots(&self) -> Vec<&str> {
        let targets: std::collections::HashSet<&str> =
            self.edges.iter().map(|e| e.to.as_str()).collect();
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !targets.contains(id))
            .collect()
    }

    /// Nodes with no outgoing edge.
    pub fn leaves(&self) -> Vec<&str> {
        let sources: std::collections::HashSet<&str> =
            self.edges.iter().map(|e| e.from.as_str()).collect();
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !sources.contains(id))
            .collect()
    }

    /// Canonical sort: nodes by id, edges by (from, to, id), options by id.
    /// Required for the determinism invariant (spec §8.3) and the
    /// frozen-graph byte-equality check (spec §8.1).
    pub fn sort_canonical(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges
            .sort_by(|a, b| (&a.from, &a.to, &a.id).cmp(&(&b.from, &b.to, &b.id)));
        self.options.sort_by(|a, b| a.id.cmp(&b.id));
    }

    /// Canonical JSON used for the frozen-graph snapshot comparison.
    pub fn canonical_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn has_cycle(&self) -> bool {
        let adjacency = self.adjacency();
        let mut state: BTreeMap<&str, u8> = BTreeMap::new(); // 0=unvisited,1=visiting,2=done
        for id in self.nodes.iter().map(|n| n.id.as_str()) {
            if state.get(id).copied().unwrap_or(0) == 0 && has_cycle_from(id, &adjacency, &mut state) {
                return true;
            }
        }
        false
    }

    fn adjacency(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in &self.nodes {
            map.entry(node.id.as_str()).or_default();
        }
        for edge in &self.edges {
            map.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        map
    }
}

fn has_cycle_from<'a>(
    id: &'a str,
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    state: &mut BTreeMap<&'a str, u8>,
) -> bool {
    state.insert(id, 1);
    if let Some(children) = adjacency.get(id) {
        for &child in children {
            match state.get(child).copied().unwrap_or(0) {
                1 => return true,
                0 => {
                    if has_cycle_from(child, adjacency, state) {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }
    state.insert(id, 2);
    false
}

/// Derive a stable edge id `from::to::idx` — stable under permutation of the
/// input edge list because `idx` counts occurrences of the same (from, to)
/// pair in encounter order, not position in the whole list (spec §8
/// "edge-id derivation is stable under permutation").
pub fn derive_edge_id(from: &str, to: &str, occurrence_idx: usize) -> String {
    format!("{from}::{to}::{occurrence_idx}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            label: id.to_string(),
            body: None,
            suggested_position: None,
            observed_state: None,
            extra: BTreeMap::new(),
        }
    }

    fn edge(id: &str, from: &str, to: &str) -> Edge {
        Edge {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            exists_probability: 1.0,
            belief: None,
            strength: 1.0,
            strength_std: None,
            effect_direction: crate::graph::EffectDirection::None,
            provenance: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn roots_and_leaves_are_correct_for_a_chain() {
        let graph = Graph {
            nodes: vec![
                node("a", NodeKind::Goal),
                node("b", NodeKind::Decision),
                node("c", NodeKind::Outcome),
            ],
            edges: vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
            options: vec![],
            ..Default::default()
        };
        assert_eq!(graph.roots(), vec!["a"]);
        assert_eq!(graph.leaves(), vec!["c"]);
    }

    #[test]
    fn detects_a_simple_cycle() {
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Decision), node("b", NodeKind::Outcome)],
            edges: vec![edge("e1", "a", "b"), edge("e2", "b", "a")],
            options: vec![],
            ..Default::default()
        };
        assert!(graph.has_cycle());
    }

    #[test]
    fn acyclic_graph_reports_no_cycle() {
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Goal), node("b", NodeKind::Outcome)],
            edges: vec![edge("e1", "a", "b")],
            options: vec![],
            ..Default::default()
        };
        assert!(!graph.has_cycle());
    }

    #[test]
    fn canonical_sort_is_by_id_then_endpoints() {
        let mut graph = Graph {
            nodes: vec![node("b", NodeKind::Goal), node("a", NodeKind::Goal)],
            edges: vec![edge("e2", "b", "a"), edge("e1", "a", "b")],
            options: vec![],
            ..Default::default()
        };
        graph.sort_canonical();
        assert_eq!(graph.nodes[0].id, "a");
        assert_eq!(graph.edges[0].from, "a");
    }

    #[test]
    fn edge_id_derivation_is_stable_under_permutation() {
        let pairs = vec![("a", "b"), ("a", "c"), ("a", "b")];
        let ids: Vec<String> = {
            let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
            pairs
                .iter()
                .map(|&(f, t)| {
                    let idx = counts.entry((f, t)).or_insert(0);
                    let id = derive_edge_id(f, t, *idx);
                    *idx += 1;
                    id
                })
                .collect()
        };
        assert_eq!(ids[0], "a::b::0");
        assert_eq!(ids[2], "a::b::1");
    }
}
