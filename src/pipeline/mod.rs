//! Unified generation pipeline (spec §4.E): five ordered stages sharing a
//! mutable context, a frozen-graph invariant from Stage 5 onward, and a
//! bounded repair loop coordinated with the LLM (§4.F).

pub mod archetype;
pub mod checkpoint;
pub mod options;
pub mod strp;

use crate::errors::AppError;
use crate::graph::{layout, Graph};
use crate::llm::LlmAdapter;
use crate::validation::{self, structural::StructuralIssue};
use crate::verify::{self, engine::EngineClient, VerificationReport};
use checkpoint::Checkpoint;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub brief: String,
    pub seed: Option<u64>,
    pub archetype_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanAnnotation {
    pub plan_id: String,
    pub plan_hash: String,
    pub confidence: f64,
    pub open_questions: Vec<String>,
    pub context_hash: String,
    pub model_id: String,
    pub prompt_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Blocker {
    pub code: String,
    pub severity: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReadyEnvelope {
    pub status: &'static str,
    pub goal_node_id: Option<String>,
    pub options: Vec<String>,
    pub blockers: Vec<Blocker>,
    pub model_adjustments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Quality {
    pub overall: f64,
    pub structure: f64,
    pub causality: f64,
    pub coverage: f64,
    pub safety: f64,
    pub error_issue_count: usize,
    pub warning_issue_count: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Guidance {
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub commit: String,
    pub version: String,
    pub build_timestamp: String,
    pub prompt_version: String,
    pub prompt_source: &'static str,
    pub prompt_override_active: bool,
    pub model: String,
    pub pipeline_path: &'static str,
    pub engine_base_url_configured: bool,
    pub model_override_active: bool,
    pub prompt_store_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub mutations: Vec<strp::Mutation>,
    pub checkpoints: Vec<Checkpoint>,
    pub verification: VerificationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_annotation: Option<PlanAnnotation>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub schema_version: &'static str,
    pub graph: Option<Graph>,
    pub nodes: Vec<crate::graph::Node>,
    pub edges: Vec<crate::graph::Edge>,
    pub options: Vec<crate::graph::OptionNode>,
    pub analysis_ready: AnalysisReadyEnvelope,
    pub quality: Quality,
    pub guidance: Guidance,
    pub trace: Trace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_suggestions: Option<Vec<verify::WeightSuggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_suggested: Option<bool>,
}

pub struct PipelineDeps<'a> {
    pub adapter: &'a dyn LlmAdapter,
    pub engine_client: Option<&'a dyn EngineClient>,
    pub require_engine: bool,
    pub production: bool,
    pub model_name: String,
    pub max_repair_retries: Option<u32>,
}

/// Run the full five-stage pipeline for a fresh brief. Returns either a
/// ready/blocked [`PipelineResponse`] (200 either way) or an [`AppError`]
/// for the small set of conditions the boundary must reject outright (spec
/// §4.H, §8 S3: zero-node drafts are `CEE_GRAPH_INVALID`, not blocked).
pub async fn run(req: PipelineRequest, deps: &PipelineDeps<'_>) -> Result<PipelineResponse, AppError> {
    let seed = req.seed.unwrap_or(0);
    let mut checkpoints = Vec::new();
    let mut all_mutations = Vec::new();

    // Stage 1 — LLM draft.
    let generated = validation::generate_graph(&req.brief, deps.adapter, seed, deps.max_repair_retries).await;
    let (mut graph, _repair_used) = match generated {
        Ok(result) => (result.graph, result.repair_used),
        Err(e) if e.last_graph.nodes.is_empty() => {
            return Err(AppError::GraphInvalid {
                reason: "empty_graph".to_string(),
                node_count: 0,
                edge_count: 0,
            });
        }
        Err(e) => return Ok(blocked_response(e.errors, deps)),
    };

    let positions = layout::compute_positions(&graph);
    for node in &mut graph.nodes {
        if let Some(pos) = positions.get(&node.id) {
            node.suggested_position = Some(*pos);
        }
    }
    checkpoints.push(checkpoint::capture("draft", &graph, now_ms()));

    // Stage 2 — Normalise & validate. Structural issues (cycles, orphans,
    // …) are scanned once here, after early STRP has had a chance to fix up
    // numeric fields — not inside `generate_graph`'s draft/validate loop,
    // which only runs schema validation and predates STRP entirely.
    all_mutations.extend(strp::early_pass(&mut graph));
    let mut warnings = validation::structural::scan(&graph);
    checkpoints.push(checkpoint::capture("normalize", &graph, now_ms()));

    // Stage 3 — Enrich.
    let archetype_match = archetype::infer(&req.brief, req.archetype_hint.as_deref());
    let plan_annotation = PlanAnnotation {
        plan_id: format!("plan-{seed}"),
        plan_hash: format!("{:x}", md5_like_hash(&graph.canonical_json().to_string())),
        confidence: archetype_match.confidence,
        open_questions: vec![],
        context_hash: format!("{:x}", md5_like_hash(&req.brief)),
        model_id: deps.model_name.clone(),
        prompt_version: "v1".to_string(),
    };
    checkpoints.push(checkpoint::capture("enrich", &graph, now_ms()));

    // Stage 4 — Stabilise & repair.
    all_mutations.extend(strp::late_pass(&mut graph));
    options::derive(&mut graph);
    let error_issues: Vec<&StructuralIssue> = warnings
        .iter()
        .filter(|w| matches!(w.severity, validation::structural::Severity::Error))
        .collect();
    if !error_issues.is_empty() {
        let errors: Vec<String> = error_issues.iter().map(|i| i.message.clone()).collect();
        return Ok(blocked_response(errors, deps));
    }
    checkpoints.push(checkpoint::capture("stabilize", &graph, now_ms()));

    // Stage 5 — Package (frozen).
    let frozen_snapshot = (!deps.production).then(|| graph.canonical_json());
    let packaged = package(graph, warnings, checkpoints, all_mutations, plan_annotation, deps).await;
    if let Some(snapshot) = frozen_snapshot {
        if let Some(ref g) = packaged.graph {
            if g.canonical_json() != snapshot {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "frozen-graph invariant violated: graph mutated after Stage 5 entry"
                )));
            }
        }
    }
    Ok(packaged)
}

async fn package(
    graph: Graph,
    warnings: Vec<StructuralIssue>,
    checkpoints: Vec<Checkpoint>,
    mutations: Vec<strp::Mutation>,
    plan_annotation: PlanAnnotation,
    deps: &PipelineDeps<'_>,
) -> PipelineResponse {
    let verification = verify::verify(&graph, deps.engine_client, deps.require_engine).await;

    let error_count = warnings
        .iter()
        .filter(|w| matches!(w.severity, validation::structural::Severity::Error))
        .count();
    let warning_count = warnings.len() - error_count;

    let quality = Quality {
        overall: quality_score(error_count, warning_count),
        structure: if error_count == 0 { 1.0 } else { 0.0 },
        causality: 1.0 - (verification.issues_detected.len() as f64 * 0.05).min(1.0),
        coverage: (graph.nodes.len() as f64 / 12.0).min(1.0),
        safety: 1.0,
        error_issue_count: error_count,
        warning_issue_count: warning_count,
    };

    let goal_node_id = graph
        .nodes
        .iter()
        .find(|n| n.kind == crate::graph::NodeKind::Goal)
        .map(|n| n.id.clone());

    let analysis_ready = AnalysisReadyEnvelope {
        status: "ready",
        goal_node_id,
        options: graph.options.iter().map(|o| o.id.clone()).collect(),
        blockers: vec![],
        model_adjustments: vec![],
    };

    let provenance = Provenance {
        commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_timestamp: "unknown".to_string(),
        prompt_version: "v1".to_string(),
        prompt_source: "builtin",
        prompt_override_active: false,
        model: deps.model_name.clone(),
        pipeline_path: "unified",
        engine_base_url_configured: deps.engine_client.is_some(),
        model_override_active: false,
        prompt_store_version: "v1",
        plan_id: Some(plan_annotation.plan_id.clone()),
        plan_hash: Some(plan_annotation.plan_hash.clone()),
    };

    let weight_suggestions = (!verification.weight_suggestions.is_empty()).then(|| verification.weight_suggestions.clone());
    let comparison_suggested = verification.comparison_suggested.then_some(true);

    PipelineResponse {
        schema_version: "3.0",
        nodes: graph.nodes.clone(),
        edges: graph.edges.clone(),
        options: graph.options.clone(),
        graph: Some(graph),
        analysis_ready,
        quality,
        guidance: Guidance::default(),
        trace: Trace {
            mutations,
            checkpoints,
            verification,
            plan_annotation: Some(plan_annotation),
            provenance,
        },
        weight_suggestions,
        comparison_suggested,
    }
}

/// Canonical blocked shape (spec §4.H, glossary "Canonical blocked shape").
fn blocked_response(errors: Vec<String>, deps: &PipelineDeps<'_>) -> PipelineResponse {
    let blockers: Vec<Blocker> = errors
        .into_iter()
        .map(|message| Blocker {
            code: "validation_failure".to_string(),
            severity: "error",
            message,
        })
        .collect();

    PipelineResponse {
        schema_version: "3.0",
        graph: None,
        nodes: vec![],
        edges: vec![],
        options: vec![],
        analysis_ready: AnalysisReadyEnvelope {
            status: "blocked",
            goal_node_id: None,
            options: vec![],
            blockers,
            model_adjustments: vec![],
        },
        quality: Quality {
            overall: 0.0,
            structure: 0.0,
            causality: 0.0,
            coverage: 0.0,
            safety: 1.0,
            error_issue_count: 1,
            warning_issue_count: 0,
        },
        guidance: Guidance::default(),
        trace: Trace {
            mutations: vec![],
            checkpoints: vec![],
            verification: VerificationReport {
                schema_valid: false,
                verification_latency_ms: 0,
                issues_detected: vec![],
                total_stages: 0,
                weight_suggestions: vec![],
                comparison_suggested: false,
            },
            plan_annotation: None,
            provenance: Provenance {
                commit: "unknown".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                build_timestamp: "unknown".to_string(),
                prompt_version: "v1".to_string(),
                prompt_source: "builtin",
                prompt_override_active: false,
                model: deps.model_name.clone(),
                pipeline_path: "unified",
                engine_base_url_configured: deps.engine_client.is_some(),
                model_override_active: false,
                prompt_store_version: "v1",
                plan_id: None,
                plan_hash: None,
            },
        },
        weight_suggestions: None,
        comparison_suggested: None,
    }
}

fn quality_score(error_count: usize, warning_count: usize) -> f64 {
    let penalty = (error_count as f64) * 0.3 + (warning_count as f64) * 0.05;
    (1.0 - penalty).max(0.0)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Cheap deterministic fingerprint used for plan_hash/context_hash — not a
/// cryptographic hash, just a stable short digest for trace correlation.
fn md5_like_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fixtures::{FixtureAdapter, EMPTY_GRAPH_MARKER};

    fn deps(adapter: &FixtureAdapter) -> PipelineDeps<'_> {
        PipelineDeps {
            adapter,
            engine_client: None,
            require_engine: false,
            production: false,
            model_name: "fixtures".to_string(),
            max_repair_retries: None,
        }
    }

    #[tokio::test]
    async fn buy_vs_build_brief_produces_ready_response() {
        let adapter = FixtureAdapter::new();
        let req = PipelineRequest {
            brief: "Should we buy a commercial CRM system or build our own? We need to launch within 6 months with a budget of $200k.".to_string(),
            seed: Some(17),
            archetype_hint: None,
        };
        let response = run(req, &deps(&adapter)).await.unwrap();
        assert_eq!(response.analysis_ready.status, "ready");
        assert_eq!(response.graph.as_ref().unwrap().default_seed, 17);
        assert!(response.weight_suggestions.is_none());
    }

    #[tokio::test]
    async fn empty_draft_is_rejected_as_graph_invalid() {
        let adapter = FixtureAdapter::new();
        let req = PipelineRequest {
            brief: format!("{EMPTY_GRAPH_MARKER} anything"),
            seed: Some(1),
            archetype_hint: None,
        };
        let err = run(req, &deps(&adapter)).await.unwrap_err();
        match err {
            AppError::GraphInvalid { reason, node_count, edge_count } => {
                assert_eq!(reason, "empty_graph");
                assert_eq!(node_count, 0);
                assert_eq!(edge_count, 0);
            }
            other => panic!("expected GraphInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_brief_and_seed_produce_byte_identical_graph() {
        let adapter = FixtureAdapter::new();
        let req = || PipelineRequest {
            brief: "Hire a new VP of Sales".to_string(),
            seed: Some(5),
            archetype_hint: None,
        };
        let a = run(req(), &deps(&adapter)).await.unwrap();
        let b = run(req(), &deps(&adapter)).await.unwrap();
        assert_eq!(a.graph.unwrap().canonical_json(), b.graph.unwrap().canonical_json());
    }
}
