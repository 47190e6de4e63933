//! Deterministic fixture adapter — the default provider (`LLM_PROVIDER=fixtures`).
//!
//! Produces a stable graph from `(brief, seed)` with no network calls, for
//! local development and the scenario tests in spec §8. Mirrors the real
//! adapters' contract exactly so the pipeline cannot tell fixtures apart
//! from a live provider at the type level.

use super::{DraftRequest, DraftResult, LlmAdapter, RepairResult, SuggestOptionsResult, SuggestOptionsRequest, Usage, Violation};
use crate::graph::{derive_edge_id, Edge, Graph, Node, NodeKind};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub struct FixtureAdapter;

impl FixtureAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FixtureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn plain_node(id: &str, kind: NodeKind, label: &str) -> Node {
    Node {
        id: id.to_string(),
        kind,
        label: label.to_string(),
        body: None,
        suggested_position: None,
        observed_state: None,
        extra: BTreeMap::new(),
    }
}

fn plain_edge(from: &str, to: &str, occurrence_idx: usize) -> Edge {
    Edge {
        id: derive_edge_id(from, to, occurrence_idx),
        from: from.to_string(),
        to: to.to_string(),
        // Mid-range rather than 1.0: a clean draft shouldn't itself trip
        // verify::weight_suggestions' near-one rule, and with two sibling
        // outcome edges this also sums to a normalized 1.0 branch split.
        exists_probability: 0.5,
        belief: None,
        strength: 1.0,
        strength_std: None,
        effect_direction: crate::graph::EffectDirection::None,
        provenance: None,
        extra: BTreeMap::new(),
    }
}

/// A brief containing this marker triggers an intentionally empty draft,
/// used for the CEE_GRAPH_INVALID scenario (spec §8 S3).
pub const EMPTY_GRAPH_MARKER: &str = "FIXTURE_EMPTY_GRAPH";

#[async_trait]
impl LlmAdapter for FixtureAdapter {
    async fn draft_graph(&self, req: &DraftRequest) -> anyhow::Result<DraftResult> {
        if req.brief.contains(EMPTY_GRAPH_MARKER) {
            return Ok(DraftResult {
                graph: Graph::default(),
                rationales: vec![],
                usage: Usage::default(),
            });
        }

        let is_buy_vs_build = req.brief.to_lowercase().contains("buy")
            && req.brief.to_lowercase().contains("build");

        let mut graph = Graph {
            nodes: vec![
                plain_node("goal-1", NodeKind::Goal, "Decide on the best path forward"),
                plain_node("decision-1", NodeKind::Decision, "Choose an approach"),
            ],
            edges: vec![],
            options: vec![],
            ..Default::default()
        };

        let option_labels: Vec<&str> = if is_buy_vs_build {
            vec!["Buy commercial system", "Build in-house"]
        } else {
            vec!["Option A", "Option B"]
        };

        for (i, label) in option_labels.iter().enumerate() {
            let outcome_id = format!("outcome-{}", i + 1);
            graph
                .nodes
                .push(plain_node(&outcome_id, NodeKind::Outcome, &format!("Result of {label}")));
            graph.edges.push(plain_edge("decision-1", &outcome_id, i));
            graph.options.push(crate::graph::OptionNode {
                id: format!("option-{}", i + 1),
                decision_id: "decision-1".to_string(),
                label: label.to_string(),
                outcome_ids: vec![outcome_id],
                interventions: BTreeMap::new(),
                status: crate::graph::OptionStatus::Ready,
                target_match: None,
            });
        }
        graph.edges.insert(0, plain_edge("goal-1", "decision-1", 0));
        graph.sort_canonical();

        Ok(DraftResult {
            graph,
            rationales: vec!["fixture adapter: deterministic draft".to_string()],
            usage: Usage {
                prompt_tokens: req.brief.len() as u32,
                completion_tokens: 64,
            },
        })
    }

    async fn suggest_options(&self, req: &SuggestOptionsRequest) -> anyhow::Result<SuggestOptionsResult> {
        Ok(SuggestOptionsResult {
            options: vec![format!("Option derived from goal: {}", req.goal)],
            usage: Usage::default(),
        })
    }

    async fn repair_graph(&self, graph: &Graph, violations: &[Violation]) -> anyhow::Result<RepairResult> {
        let mut repaired = graph.clone();
        repaired.sort_canonical();
        Ok(RepairResult {
            graph: repaired,
            rationales: violations.iter().map(|v| format!("addressed {}", v.code)).collect(),
            usage: Usage::default(),
        })
    }

    fn name(&self) -> &'static str {
        "fixtures"
    }
}
