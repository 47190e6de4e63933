//! Option derivation (spec §3 "Option", §4.E Stage 4 "Derives options from
//! decision nodes"). The draft adapter already emits `graph.options`
//! directly (it has the clearest view of which outcomes a decision branch
//! leads to); this stage reconciles each option's implied intervention
//! targets against the graph's actual factor ids and records the result as
//! a [`crate::graph::TargetMatchRecord`], matching the "reconcile LLM-named
//! targets against actual factor ids" requirement.

use crate::graph::{Graph, Intervention, NodeKind, OptionStatus, TargetMatchRecord};
use std::collections::BTreeMap;

/// Deterministic default value assigned to a matched intervention target.
/// The graph's factor nodes carry no "desired direction" field for an
/// option to aim at, so every matched intervention nudges its factor by one
/// full unit — a neutral stand-in a human reviewer can override post-hoc.
const DEFAULT_TARGET_VALUE: f64 = 1.0;

/// Runs after late STRP (spec §4.E Stage 4), mutating `graph.options` in
/// place: sets `status` from whether `decision_id` resolves, and populates
/// `interventions`/`target_match` by matching each option's label against
/// factor node labels.
pub fn derive(graph: &mut Graph) {
    let factor_ids: Vec<(String, String)> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Factor)
        .map(|n| (n.id.clone(), n.label.clone()))
        .collect();
    let node_ids = graph.node_ids();
    let decision_resolves: BTreeMap<String, bool> = graph
        .options
        .iter()
        .map(|o| (o.decision_id.clone(), node_ids.contains(o.decision_id.as_str())))
        .collect();

    for option in &mut graph.options {
        let label_lower = option.label.to_lowercase();
        let mut interventions = BTreeMap::new();
        let mut target_match = None;

        for (factor_id, factor_label) in &factor_ids {
            if label_lower.contains(&factor_label.to_lowercase()) {
                interventions.insert(
                    factor_id.clone(),
                    Intervention {
                        target_value: DEFAULT_TARGET_VALUE,
                        provenance: "inferred_from_option_label".to_string(),
                    },
                );
                target_match = Some(TargetMatchRecord {
                    requested_target: factor_label.clone(),
                    matched_factor_id: Some(factor_id.clone()),
                    matched: true,
                });
            }
        }

        let decision_ok = decision_resolves.get(&option.decision_id).copied().unwrap_or(false);
        option.status = if decision_ok { OptionStatus::Ready } else { OptionStatus::Blocked };
        option.interventions = interventions;
        option.target_match = target_match;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EffectDirection, Node, NodeKind, OptionNode};
    use std::collections::BTreeMap as Map;

    fn factor_node(id: &str, label: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Factor,
            label: label.to_string(),
            body: None,
            suggested_position: None,
            observed_state: None,
            extra: Map::new(),
        }
    }

    fn plain_edge(from: &str, to: &str) -> Edge {
        Edge {
            id: format!("{from}::{to}::0"),
            from: from.to_string(),
            to: to.to_string(),
            exists_probability: 1.0,
            belief: None,
            strength: 1.0,
            strength_std: None,
            effect_direction: EffectDirection::None,
            provenance: None,
            extra: Map::new(),
        }
    }

    fn option(id: &str, decision_id: &str, label: &str) -> OptionNode {
        OptionNode {
            id: id.to_string(),
            decision_id: decision_id.to_string(),
            label: label.to_string(),
            outcome_ids: vec![],
            interventions: Map::new(),
            status: crate::graph::OptionStatus::Ready,
            target_match: None,
        }
    }

    #[test]
    fn matches_option_label_against_factor_label() {
        let mut graph = Graph {
            nodes: vec![
                factor_node("d", "Decision"),
                factor_node("f1", "Headcount"),
            ],
            edges: vec![plain_edge("d", "f1")],
            options: vec![option("opt-1", "d", "Increase headcount")],
            ..Default::default()
        };
        derive(&mut graph);
        let opt = &graph.options[0];
        assert_eq!(opt.status, crate::graph::OptionStatus::Ready);
        assert!(opt.interventions.contains_key("f1"));
        assert!(opt.target_match.as_ref().unwrap().matched);
    }

    #[test]
    fn option_with_unresolved_decision_is_blocked() {
        let mut graph = Graph {
            nodes: vec![],
            edges: vec![],
            options: vec![option("opt-1", "missing-decision", "Do something")],
            ..Default::default()
        };
        derive(&mut graph);
        assert_eq!(graph.options[0].status, crate::graph::OptionStatus::Blocked);
        assert!(graph.options[0].target_match.is_none());
    }
}
