//! Validation/repair loop (spec §4.F) and structural checks (§4.E Stage 2/4).
//!
//! Schema validation reuses the teacher's `jsonschema::JSONSchema::compile`
//! idiom from `middleware/guardrail.rs::validate_schema`; structural checks
//! (cycles, orphans, …) are new, built for this graph shape.

pub mod schema;
pub mod structural;

use crate::graph::Graph;
use crate::llm::{LlmAdapter, Violation};

const DEFAULT_MAX_RETRIES: u32 = 2;
const MAX_NODES: usize = 12;
const MAX_EDGES: usize = 24;

#[derive(Debug, Clone)]
pub struct GraphValidationError {
    pub errors: Vec<String>,
    pub attempts: u32,
    pub last_graph: Graph,
}

impl std::fmt::Display for GraphValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph validation failed after {} attempts: {}", self.attempts, self.errors.join("; "))
    }
}

impl std::error::Error for GraphValidationError {}

#[derive(Debug, Clone, Default)]
pub struct GenerateGraphResult {
    pub graph: Graph,
    pub attempts: u32,
    pub repair_used: bool,
    pub repair_history: Vec<Vec<String>>,
}

/// Draft → validate → (on failure) LLM repair → validate, capped at
/// `max_retries`. If repair is exhausted or the adapter errors, fall back to
/// a deterministic repair; if that still fails, return `GraphValidationError`.
pub async fn generate_graph(
    brief: &str,
    adapter: &dyn LlmAdapter,
    seed: u64,
    max_retries: Option<u32>,
) -> Result<GenerateGraphResult, GraphValidationError> {
    let max_retries = max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

    let draft = adapter
        .draft_graph(&crate::llm::DraftRequest {
            brief: brief.to_string(),
            archetype_hint: None,
            seed,
        })
        .await
        .map_err(|e| GraphValidationError {
            errors: vec![format!("draft call failed: {e}")],
            attempts: 0,
            last_graph: Graph::default(),
        })?;

    let mut graph = cap_and_clean(draft.graph);
    let mut attempts = 0;
    let mut repair_used = false;
    let mut repair_history = Vec::new();

    let mut errors = schema::validate_graph_schema(&graph);
    while !errors.is_empty() && attempts < max_retries {
        attempts += 1;
        repair_used = true;
        let violations: Vec<Violation> = errors
            .iter()
            .map(|e| Violation {
                code: "SCHEMA_VIOLATION".to_string(),
                message: e.clone(),
            })
            .collect();

        match adapter.repair_graph(&graph, &violations).await {
            Ok(repaired) => {
                graph = cap_and_clean(repaired.graph);
                repair_history.push(repaired.rationales);
            }
            Err(_) => break,
        }
        errors = schema::validate_graph_schema(&graph);
    }

    if !errors.is_empty() {
        graph = deterministic_repair(graph);
        errors = schema::validate_graph_schema(&graph);
        repair_used = true;
    }

    if !errors.is_empty() {
        return Err(GraphValidationError {
            errors,
            attempts,
            last_graph: graph,
        });
    }

    graph.schema_version = "3.0".to_string();
    graph.default_seed = seed;
    graph.sort_canonical();

    Ok(GenerateGraphResult {
        graph,
        attempts,
        repair_used,
        repair_history,
    })
}

/// Trims to at most `MAX_NODES`/`MAX_EDGES`, drops edges whose endpoints
/// don't resolve, assigns stable edge ids, and sorts canonically (spec §4.E
/// Stage 1).
fn cap_and_clean(mut graph: Graph) -> Graph {
    graph.nodes.truncate(MAX_NODES);
    let ids = graph.node_ids();

    let mut occurrence: std::collections::HashMap<(String, String), usize> = std::collections::HashMap::new();
    graph.edges.retain(|e| ids.contains(e.from.as_str()) && ids.contains(e.to.as_str()));
    graph.edges.truncate(MAX_EDGES);
    for edge in &mut graph.edges {
        let key = (edge.from.clone(), edge.to.clone());
        let idx = occurrence.entry(key).or_insert(0);
        edge.id = crate::graph::derive_edge_id(&edge.from, &edge.to, *idx);
        *idx += 1;
        edge.exists_probability = edge.exists_probability.clamp(0.0, 1.0);
    }

    graph.sort_canonical();
    graph
}

/// Deterministic last-resort repair (spec §4.F): truncate to max nodes, drop
/// self-loops, drop edges referencing unknown nodes, sort canonically.
fn deterministic_repair(mut graph: Graph) -> Graph {
    graph.nodes.truncate(MAX_NODES);
    let ids = graph.node_ids();
    graph
        .edges
        .retain(|e| e.from != e.to && ids.contains(e.from.as_str()) && ids.contains(e.to.as_str()));
    graph.sort_canonical();
    graph
}
