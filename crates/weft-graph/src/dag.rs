use std::collections::{HashMap, VecDeque};

use weft_core::error::{Result, WeftError};
use weft_core::types::{Edge, Graph, Node};

/// Kahn's algorithm over borrowed nodes/edges.
///
/// Returns the visit order and the ids left with non-zero in-degree (the
/// nodes on or downstream of a cycle). Edges whose endpoints are not in
/// `nodes` are ignored.
fn kahn<'a>(nodes: &'a [Node], edges: &'a [Edge]) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::with_capacity(nodes.len());

    for edge in edges {
        let (source, target) = (edge.source_node_id.as_str(), edge.target_node_id.as_str());
        if !in_degree.contains_key(source) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(target) {
            *degree += 1;
            successors.entry(source).or_default().push(target);
        }
    }

    // Seed in node order so the visit order is deterministic.
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut visited = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        visited.push(id);
        if let Some(next) = successors.get(id) {
            for &succ in next {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }
    }

    let remaining = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id).is_some_and(|d| *d > 0))
        .collect();

    (visited, remaining)
}

/// True iff every node can be placed in a topological order.
pub fn is_acyclic(nodes: &[Node], edges: &[Edge]) -> bool {
    let (visited, _) = kahn(nodes, edges);
    visited.len() == nodes.len()
}

/// A topological ordering of node ids, or `None` when the graph has a cycle.
pub fn topological_order(nodes: &[Node], edges: &[Edge]) -> Option<Vec<String>> {
    let (visited, _) = kahn(nodes, edges);
    if visited.len() == nodes.len() {
        Some(visited.into_iter().map(String::from).collect())
    } else {
        None
    }
}

/// Gate for saving: errors with the blocked node ids when a cycle exists.
pub fn validate(graph: &Graph) -> Result<()> {
    let (visited, remaining) = kahn(&graph.nodes, &graph.edges);
    if visited.len() == graph.nodes.len() {
        Ok(())
    } else {
        Err(WeftError::CycleDetected {
            nodes: remaining.into_iter().map(String::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::{EdgeConfig, EdgeType, Position};

    fn nodes(ids: &[&str]) -> Vec<Node> {
        ids.iter()
            .map(|id| Node::new("analyst", Position::default()).with_id(*id))
            .collect()
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<Edge> {
        pairs
            .iter()
            .map(|(s, t)| Edge::new(*s, *t, EdgeType::DataFlow, EdgeConfig::default()))
            .collect()
    }

    #[test]
    fn test_empty_graph_is_acyclic() {
        assert!(is_acyclic(&[], &[]));
        assert_eq!(topological_order(&[], &[]), Some(vec![]));
    }

    #[test]
    fn test_single_node_is_acyclic() {
        assert!(is_acyclic(&nodes(&["a"]), &[]));
    }

    #[test]
    fn test_linear_chain() {
        let n = nodes(&["a", "b", "c"]);
        let e = edges(&[("a", "b"), ("b", "c")]);
        assert!(is_acyclic(&n, &e));
        assert_eq!(
            topological_order(&n, &e),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_closing_edge_to_ancestor_creates_cycle() {
        let n = nodes(&["a", "b", "c"]);
        let mut e = edges(&[("a", "b"), ("b", "c")]);
        e.extend(edges(&[("c", "a")]));
        assert!(!is_acyclic(&n, &e));
        assert!(topological_order(&n, &e).is_none());
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let n = nodes(&["a", "b", "c", "d"]);
        let e = edges(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let order = topological_order(&n, &e).unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for edge in &e {
            assert!(pos(&edge.source_node_id) < pos(&edge.target_node_id));
        }
    }

    #[test]
    fn test_validate_reports_cycle_members() {
        let mut graph = Graph::new("wf", "cyclic");
        graph.nodes = nodes(&["root", "x", "y", "tail"]);
        graph.edges = edges(&[("root", "x"), ("x", "y"), ("y", "x"), ("y", "tail")]);

        let err = validate(&graph).unwrap_err();
        match err {
            WeftError::CycleDetected { nodes } => {
                assert!(nodes.contains(&"x".to_string()));
                assert!(nodes.contains(&"y".to_string()));
                assert!(!nodes.contains(&"root".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_does_not_mutate_input() {
        let n = nodes(&["a", "b"]);
        let e = edges(&[("a", "b"), ("b", "a")]);
        let (n_before, e_before) = (n.clone(), e.clone());
        let _ = is_acyclic(&n, &e);
        assert_eq!(n, n_before);
        assert_eq!(e, e_before);
    }

    #[test]
    fn test_large_chain_completes() {
        let ids: Vec<String> = (0..20_000).map(|i| format!("n{i}")).collect();
        let n: Vec<Node> = ids
            .iter()
            .map(|id| Node::new("analyst", Position::default()).with_id(id.clone()))
            .collect();
        let e: Vec<Edge> = ids
            .windows(2)
            .map(|w| Edge::new(w[0].clone(), w[1].clone(), EdgeType::DataFlow, EdgeConfig::default()))
            .collect();
        assert!(is_acyclic(&n, &e));
    }
}
