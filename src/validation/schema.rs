//! JSON Schema validation for drafted/repaired graphs.
//!
//! Same `jsonschema::JSONSchema::compile` + collected-errors idiom as the
//! teacher's `middleware/guardrail.rs::validate_schema`, applied to the
//! graph shape instead of an upstream LLM response body.

use crate::graph::Graph;
use once_cell::sync::Lazy;
use serde_json::json;

static DRAFT_GRAPH_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["nodes", "edges", "options"],
        "properties": {
            "nodes": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["id", "kind", "label"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1, "pattern": "^[A-Za-z]" },
                        "kind": { "enum": ["goal", "decision", "option", "factor", "outcome", "risk", "action"] },
                        "label": { "type": "string" }
                    }
                }
            },
            "edges": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "from", "to"],
                    "properties": {
                        "id": { "type": "string" },
                        "from": { "type": "string" },
                        "to": { "type": "string" },
                        "exists_probability": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    }
                }
            },
            "options": { "type": "array" }
        }
    })
});

/// Validate `graph` against the draft-graph schema and report every error
/// found (not just the first), matching the teacher's eager-collection
/// pattern.
pub fn validate_graph_schema(graph: &Graph) -> Vec<String> {
    let value = match serde_json::to_value(graph) {
        Ok(v) => v,
        Err(e) => return vec![format!("graph failed to serialise: {e}")],
    };

    let compiled = match jsonschema::JSONSchema::compile(&DRAFT_GRAPH_SCHEMA) {
        Ok(c) => c,
        Err(e) => return vec![format!("invalid internal schema: {e}")],
    };

    match compiled.validate(&value) {
        Ok(()) => vec![],
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeKind};
    use std::collections::BTreeMap;

    #[test]
    fn empty_graph_fails_minItems() {
        let graph = Graph::default();
        let errors = validate_graph_schema(&graph);
        assert!(!errors.is_empty());
    }

    #[test]
    fn single_node_graph_passes() {
        let graph = Graph {
            nodes: vec![Node {
                id: "a".into(),
                kind: NodeKind::Goal,
                label: "Goal".into(),
                body: None,
                suggested_position: None,
                observed_state: None,
                extra: BTreeMap::new(),
            }],
            edges: vec![],
            options: vec![],
            ..Default::default()
        };
        assert!(validate_graph_schema(&graph).is_empty());
    }
}
