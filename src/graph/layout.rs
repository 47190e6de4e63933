//! Deterministic node layout (spec §9 "Deterministic layout").
//!
//! Layer assignment is by longest path from any root via BFS relaxation;
//! intra-layer order is alphabetical by node id; disconnected nodes land one
//! layer below the maximum assigned layer. Positions are centred
//! horizontally with fixed spacing.

use super::{Graph, Position};
use std::collections::{BTreeMap, VecDeque};

const LAYER_HEIGHT: f64 = 150.0;
const NODE_WIDTH: f64 = 180.0;
const CANVAS_WIDTH: f64 = 800.0;
const TOP_MARGIN: f64 = 80.0;

/// Compute `suggested_position` for every node, returned as an id -> position
/// map (the graph itself is not mutated here; callers splice positions onto
/// `Node::suggested_position` during Stage 1 assembly).
pub fn compute_positions(graph: &Graph) -> BTreeMap<String, Position> {
    let layers = assign_layers(graph);

    let mut by_layer: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for (id, layer) in &layers {
        by_layer.entry(*layer).or_default().push(id.as_str());
    }

    let mut positions = BTreeMap::new();
    for (layer, mut ids) in by_layer {
        ids.sort_unstable();
        let count = ids.len() as f64;
        let total_width = count * NODE_WIDTH;
        let start_x = (CANVAS_WIDTH - total_width) / 2.0;
        for (i, id) in ids.into_iter().enumerate() {
            let x = start_x + (i as f64) * NODE_WIDTH + NODE_WIDTH / 2.0;
            let y = TOP_MARGIN + (layer as f64) * LAYER_HEIGHT;
            positions.insert(id.to_string(), Position { x, y });
        }
    }
    positions
}

/// Layer = longest path length from any root, computed by relaxing forward
/// edges in BFS order starting from all roots simultaneously. Nodes
/// unreachable from any root (disconnected) are placed one layer below the
/// maximum layer actually assigned.
fn assign_layers(graph: &Graph) -> BTreeMap<String, u32> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in &graph.nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for edge in &graph.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let mut layer: BTreeMap<&str, u32> = BTreeMap::new();
    let roots = graph.roots();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for &root in &roots {
        layer.insert(root, 0);
        queue.push_back(root);
    }

    while let Some(id) = queue.pop_front() {
        let current = layer[id];
        if let Some(children) = adjacency.get(id) {
            for &child in children {
                let candidate = current + 1;
                let improved = match layer.get(child) {
                    Some(&existing) => candidate > existing,
                    None => true,
                };
                if improved {
                    layer.insert(child, candidate);
                    queue.push_back(child);
                }
            }
        }
    }

    let max_layer = layer.values().copied().max().unwrap_or(0);
    let disconnected_layer = max_layer + 1;

    graph
        .nodes
        .iter()
        .map(|n| {
            let l = layer.get(n.id.as_str()).copied().unwrap_or(disconnected_layer);
            (n.id.clone(), l)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeKind};
    use std::collections::BTreeMap as Map;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Decision,
            label: id.to_string(),
            body: None,
            suggested_position: None,
            observed_state: None,
            extra: Map::new(),
        }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge {
            id: format!("{from}::{to}::0"),
            from: from.to_string(),
            to: to.to_string(),
            exists_probability: 1.0,
            belief: None,
            strength: 1.0,
            strength_std: None,
            effect_direction: crate::graph::EffectDirection::None,
            provenance: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn chain_layers_increase_monotonically() {
        let graph = Graph {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![edge("a", "b"), edge("b", "c")],
            options: vec![],
            ..Default::default()
        };
        let layers = assign_layers(&graph);
        assert_eq!(layers["a"], 0);
        assert_eq!(layers["b"], 1);
        assert_eq!(layers["c"], 2);
    }

    #[test]
    fn disconnected_node_lands_one_layer_below_max() {
        let graph = Graph {
            nodes: vec![node("a"), node("b"), node("lonely")],
            edges: vec![edge("a", "b")],
            options: vec![],
            ..Default::default()
        };
        let layers = assign_layers(&graph);
        assert_eq!(layers["lonely"], layers["b"] + 1);
    }

    #[test]
    fn same_layer_nodes_are_ordered_alphabetically() {
        let graph = Graph {
            nodes: vec![node("a"), node("zeta"), node("beta")],
            edges: vec![edge("a", "zeta"), edge("a", "beta")],
            options: vec![],
            ..Default::default()
        };
        let positions = compute_positions(&graph);
        assert!(positions["beta"].x < positions["zeta"].x);
    }

    #[test]
    fn longest_path_wins_over_shortest() {
        // a -> c directly, and a -> b -> c; c's layer must reflect the
        // longest path (2), not the shortest (1).
        let graph = Graph {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![edge("a", "c"), edge("a", "b"), edge("b", "c")],
            options: vec![],
            ..Default::default()
        };
        let layers = assign_layers(&graph);
        assert_eq!(layers["c"], 2);
    }
}
