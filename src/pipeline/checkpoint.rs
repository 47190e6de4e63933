//! Typed pipeline checkpoints (spec §3 "Checkpoint").

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub stage_name: &'static str,
    pub node_count: usize,
    pub edge_count: usize,
    pub timestamp_ms: u64,
}

pub fn capture(stage_name: &'static str, graph: &crate::graph::Graph, now_ms: u64) -> Checkpoint {
    Checkpoint {
        stage_name,
        node_count: graph.nodes.len(),
        edge_count: graph.edges.len(),
        timestamp_ms: now_ms,
    }
}
