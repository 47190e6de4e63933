//! Verification layer (spec §4.G): a fixed sequence of stages run against
//! the assembled response before it is returned to the caller.

pub mod engine;

use crate::graph::{Graph, NodeKind};
use crate::validation::schema::validate_graph_schema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct WeightSuggestion {
    pub edge_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_belief: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_belief: Option<f64>,
    pub confidence: f64,
    pub auto_applied: bool,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationIssue {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub schema_valid: bool,
    pub verification_latency_ms: u64,
    pub issues_detected: Vec<VerificationIssue>,
    pub total_stages: u32,
    pub weight_suggestions: Vec<WeightSuggestion>,
    pub comparison_suggested: bool,
}

const BRANCH_PROBABILITY_EPSILON: f64 = 1e-6;
const MAX_WEIGHT_SUGGESTIONS: usize = 10;

/// Run schema_validation, branch_probabilities, weight_suggestions,
/// comparison_detection, and (optionally) engine_validation in order.
pub async fn verify(
    graph: &Graph,
    engine_client: Option<&dyn engine::EngineClient>,
    require_engine: bool,
) -> VerificationReport {
    let started = Instant::now();
    let mut issues = Vec::new();
    let mut total_stages = 0u32;

    total_stages += 1;
    let schema_errors = validate_graph_schema(graph);
    let schema_valid = schema_errors.is_empty();
    if !schema_valid {
        for e in &schema_errors {
            issues.push(VerificationIssue {
                code: "SCHEMA_INVALID".to_string(),
                message: e.clone(),
            });
        }
    }

    total_stages += 1;
    issues.extend(branch_probabilities(graph));

    total_stages += 1;
    let weight_suggestions = weight_suggestions(graph);

    total_stages += 1;
    let comparison_suggested = comparison_detection(graph);

    if let Some(client) = engine_client {
        total_stages += 1;
        match client.validate(graph).await {
            Ok(violations) => {
                for v in violations {
                    issues.push(VerificationIssue {
                        code: v.code,
                        message: v.message,
                    });
                }
            }
            Err(e) => {
                if require_engine {
                    issues.push(VerificationIssue {
                        code: "ENGINE_VALIDATION_UNAVAILABLE".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    VerificationReport {
        schema_valid,
        verification_latency_ms: started.elapsed().as_millis() as u64,
        issues_detected: issues,
        total_stages,
        weight_suggestions,
        comparison_suggested,
    }
}

fn branch_probabilities(graph: &Graph) -> Vec<VerificationIssue> {
    let mut issues = Vec::new();
    for decision in graph.nodes.iter().filter(|n| n.kind == NodeKind::Decision) {
        let children: Vec<&crate::graph::Edge> =
            graph.edges.iter().filter(|e| e.from == decision.id).collect();
        if children.len() < 2 {
            continue;
        }
        let sum: f64 = children.iter().map(|e| e.exists_probability).sum();
        if (sum - 1.0).abs() > BRANCH_PROBABILITY_EPSILON {
            issues.push(VerificationIssue {
                code: "BRANCH_PROBABILITIES_UNNORMALIZED".to_string(),
                message: format!("decision {} branch probabilities sum to {sum:.4}", decision.id),
            });
        }
    }
    issues
}

fn weight_suggestions(graph: &Graph) -> Vec<WeightSuggestion> {
    let mut near_zero_one = Vec::new();
    let mut uniform = Vec::new();
    let mut out_of_range = Vec::new();

    let mut by_decision: HashMap<&str, Vec<&crate::graph::Edge>> = HashMap::new();
    for decision in graph.nodes.iter().filter(|n| n.kind == NodeKind::Decision) {
        let children: Vec<&crate::graph::Edge> =
            graph.edges.iter().filter(|e| e.from == decision.id).collect();
        by_decision.insert(decision.id.as_str(), children);
    }

    for edge in &graph.edges {
        if edge.exists_probability < 0.05 {
            near_zero_one.push(suggestion(graph, edge, "near-zero exists_probability", edge.exists_probability, Some(0.5)));
        } else if edge.exists_probability > 0.95 {
            near_zero_one.push(suggestion(graph, edge, "near-one exists_probability", edge.exists_probability, Some(0.5)));
        }
        if !(0.3..=1.5).contains(&edge.strength) {
            out_of_range.push(suggestion(graph, edge, "strength out of [0.3, 1.5]", edge.strength, None));
        }
    }

    for (_, children) in &by_decision {
        if children.len() >= 3 {
            if let Some(first) = children.first().and_then(|e| e.belief) {
                if children.iter().all(|e| e.belief == Some(first)) {
                    for edge in children {
                        uniform.push(suggestion(graph, edge, "uniform belief distribution", first, None));
                    }
                }
            }
        }
    }

    near_zero_one.extend(uniform);
    near_zero_one.extend(out_of_range);
    near_zero_one.truncate(MAX_WEIGHT_SUGGESTIONS);
    near_zero_one
}

/// Look up a node's label by id, falling back to the id itself if the
/// edge references a node that somehow isn't present (should not happen
/// past Stage 2, but `rationale` must never panic on a dangling id).
fn node_label<'a>(graph: &'a Graph, node_id: &'a str) -> &'a str {
    graph
        .nodes
        .iter()
        .find(|n| n.id == node_id)
        .map(|n| n.label.as_str())
        .unwrap_or(node_id)
}

fn suggestion(graph: &Graph, edge: &crate::graph::Edge, reason: &str, current: f64, suggested: Option<f64>) -> WeightSuggestion {
    let from_label = node_label(graph, &edge.from);
    let to_label = node_label(graph, &edge.to);
    WeightSuggestion {
        edge_id: edge.id.clone(),
        reason: reason.to_string(),
        current_belief: Some(current),
        suggested_belief: suggested,
        confidence: 0.6,
        auto_applied: false,
        rationale: format!("\"{from_label}\" \u{2192} \"{to_label}\": {reason}"),
    }
}

fn comparison_detection(graph: &Graph) -> bool {
    let mut outcome_to_options: HashMap<&str, usize> = HashMap::new();
    for option in &graph.options {
        for outcome in &option.outcome_ids {
            *outcome_to_options.entry(outcome.as_str()).or_insert(0) += 1;
        }
    }
    let sharing_options: std::collections::HashSet<&str> = graph
        .options
        .iter()
        .filter(|o| o.outcome_ids.iter().any(|oid| outcome_to_options.get(oid.as_str()).copied().unwrap_or(0) >= 2))
        .map(|o| o.id.as_str())
        .collect();
    sharing_options.len() >= 2
}

/// Strip occurrences of `banned` substrings (derived from the user brief)
/// from a telemetry payload before emission (spec §4.G "Telemetry privacy").
pub fn scrub_banned_substrings(payload: &str, banned: &[String]) -> String {
    let mut scrubbed = payload.to_string();
    for term in banned {
        if term.trim().is_empty() {
            continue;
        }
        if let Ok(re) = Regex::new(&regex::escape(term)) {
            scrubbed = re.replace_all(&scrubbed, "[redacted]").to_string();
        }
    }
    scrubbed
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Derive the banned-substring corpus from a brief: whole words of length
/// >= 4, since short/common tokens would over-redact telemetry.
pub fn banned_terms_from_brief(brief: &str) -> Vec<String> {
    WHITESPACE
        .split(brief)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() >= 4)
        .map(str::to_string)
        .collect()
}
