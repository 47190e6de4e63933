//! Structured Transform & Repair Pass (STRP) — a deterministic transform
//! that normalises edge weights/beliefs and records each mutation (glossary
//! "STRP").

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub rule: String,
    pub field: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

/// Early STRP (spec §4.E Stage 2): clamp `exists_probability` to [0,1] and
/// normalise each decision's children beliefs to sum to 1 ± epsilon when a
/// belief is present on every child.
pub fn early_pass(graph: &mut crate::graph::Graph) -> Vec<Mutation> {
    let mut mutations = Vec::new();

    for edge in &mut graph.edges {
        let before = edge.exists_probability;
        let clamped = before.clamp(0.0, 1.0);
        if (clamped - before).abs() > f64::EPSILON {
            mutations.push(Mutation {
                rule: "clamp_exists_probability".to_string(),
                field: format!("edges[{}].exists_probability", edge.id),
                before: serde_json::json!(before),
                after: serde_json::json!(clamped),
            });
            edge.exists_probability = clamped;
        }
    }

    let decisions: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == crate::graph::NodeKind::Decision)
        .map(|n| n.id.clone())
        .collect();

    for decision_id in decisions {
        let child_indices: Vec<usize> = graph
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.from == decision_id)
            .map(|(i, _)| i)
            .collect();
        if child_indices.len() < 2 {
            continue;
        }
        let all_have_belief = child_indices.iter().all(|&i| graph.edges[i].belief.is_some());
        if !all_have_belief {
            continue;
        }
        let sum: f64 = child_indices.iter().map(|&i| graph.edges[i].belief.unwrap()).sum();
        if sum <= f64::EPSILON || (sum - 1.0).abs() <= 1e-6 {
            continue;
        }
        for &i in &child_indices {
            let before = graph.edges[i].belief.unwrap();
            let after = before / sum;
            mutations.push(Mutation {
                rule: "normalize_decision_beliefs".to_string(),
                field: format!("edges[{}].belief", graph.edges[i].id),
                before: serde_json::json!(before),
                after: serde_json::json!(after),
            });
            graph.edges[i].belief = Some(after);
        }
    }

    mutations
}

/// Late STRP (spec §4.E Stage 4): constraint-oriented cleanup run just
/// before the final repair check. Currently re-runs the same normalisation
/// pass in case Stage 3 enrichment introduced new beliefs.
pub fn late_pass(graph: &mut crate::graph::Graph) -> Vec<Mutation> {
    early_pass(graph)
}
