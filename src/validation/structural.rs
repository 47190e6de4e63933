//! Structural checks (spec §4.E Stage 2): cycles, orphan edges, disconnected
//! options, missing baseline for factors, same-lever options, uniform
//! strengths. These are surfaced as warnings, not repair triggers, unless
//! severity is `error`.

use crate::graph::{Graph, NodeKind};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuralIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

pub fn scan(graph: &Graph) -> Vec<StructuralIssue> {
    let mut issues = Vec::new();

    if graph.has_cycle() {
        issues.push(StructuralIssue {
            code: "CYCLE_DETECTED".to_string(),
            severity: Severity::Error,
            message: "graph contains a cycle".to_string(),
        });
    }

    let ids = graph.node_ids();
    for edge in &graph.edges {
        if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
            issues.push(StructuralIssue {
                code: "ORPHAN_EDGE".to_string(),
                severity: Severity::Error,
                message: format!("edge {} references an unresolved endpoint", edge.id),
            });
        }
    }

    for option in &graph.options {
        if option.outcome_ids.is_empty() {
            issues.push(StructuralIssue {
                code: "DISCONNECTED_OPTION".to_string(),
                severity: Severity::Warning,
                message: format!("option {} has no linked outcomes", option.id),
            });
        }
    }

    let factor_ids: HashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Factor)
        .map(|n| n.id.as_str())
        .collect();
    for factor_id in &factor_ids {
        let has_baseline = graph.edges.iter().any(|e| &e.to.as_str() == factor_id);
        if !has_baseline {
            issues.push(StructuralIssue {
                code: "MISSING_FACTOR_BASELINE".to_string(),
                severity: Severity::Warning,
                message: format!("factor {factor_id} has no baseline edge"),
            });
        }
    }

    let mut seen_levers: HashSet<(&str, &str)> = HashSet::new();
    for option in &graph.options {
        let key = (option.decision_id.as_str(), option.label.as_str());
        if !seen_levers.insert(key) {
            issues.push(StructuralIssue {
                code: "SAME_LEVER_OPTIONS".to_string(),
                severity: Severity::Warning,
                message: format!("duplicate option label '{}' under decision {}", option.label, option.decision_id),
            });
        }
    }

    for decision in graph.nodes.iter().filter(|n| n.kind == NodeKind::Decision) {
        let siblings: Vec<&f64> = graph
            .edges
            .iter()
            .filter(|e| e.from == decision.id)
            .map(|e| &e.strength)
            .collect();
        if siblings.len() >= 2 {
            let first = *siblings[0];
            if siblings.iter().all(|s| (**s - first).abs() < f64::EPSILON) {
                issues.push(StructuralIssue {
                    code: "UNIFORM_STRENGTHS".to_string(),
                    severity: Severity::Warning,
                    message: format!("all branches of decision {} share the same strength", decision.id),
                });
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use std::collections::BTreeMap;

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

    fn edge(from: &str, to: &str, strength: f64) -> Edge {
        Edge {
            id: format!("{from}::{to}::0"),
            from: from.to_string(),
            to: to.to_string(),
            exists_probability: 1.0,
            belief: None,
            strength,
            strength_std: None,
            effect_direction: crate::graph::EffectDirection::None,
            provenance: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn clean_graph_has_no_issues() {
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Goal), node("b", NodeKind::Outcome)],
            edges: vec![edge("a", "b", 1.0)],
            options: vec![],
            ..Default::default()
        };
        assert!(scan(&graph).is_empty());
    }

    #[test]
    fn uniform_strengths_across_siblings_is_flagged() {
        let graph = Graph {
            nodes: vec![
                node("d", NodeKind::Decision),
                node("o1", NodeKind::Outcome),
                node("o2", NodeKind::Outcome),
            ],
            edges: vec![edge("d", "o1", 0.5), edge("d", "o2", 0.5)],
            options: vec![],
            ..Default::default()
        };
        let issues = scan(&graph);
        assert!(issues.iter().any(|i| i.code == "UNIFORM_STRENGTHS"));
    }

    #[test]
    fn option_with_no_outcomes_is_disconnected() {
        let graph = Graph {
            nodes: vec![node("d", NodeKind::Decision)],
            edges: vec![],
            options: vec![crate::graph::OptionNode {
                id: "opt-1".into(),
                decision_id: "d".into(),
                label: "Do nothing".into(),
                outcome_ids: vec![],
                interventions: BTreeMap::new(),
                status: crate::graph::OptionStatus::Ready,
                target_match: None,
            }],
            ..Default::default()
        };
        let issues = scan(&graph);
        assert!(issues.iter().any(|i| i.code == "DISCONNECTED_OPTION"));
    }
}
