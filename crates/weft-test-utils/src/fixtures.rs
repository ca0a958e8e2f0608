use weft_core::config::AppConfig;
use weft_core::types::{Edge, EdgeConfig, EdgeType, Graph, Node, Position};

/// Agent types assigned to fixture nodes, cycled in order.
const FIXTURE_AGENTS: &[&str] = &["researcher", "analyst", "reporter", "validator", "writer"];

/// A node at grid slot `index`.
pub fn node(id: &str, agent_type: &str, index: usize) -> Node {
    Node::new(agent_type, Position::new(index as f64 * 260.0, 120.0)).with_id(id)
}

/// A graph with no nodes or edges.
pub fn empty_graph(id: &str) -> Graph {
    Graph::new(id, "Empty workflow")
}

/// Nodes `ids` laid out left to right; chained `ids[0] -> ids[1] -> ...`
/// when `connect` is set.
pub fn linear_graph(id: &str, ids: &[&str], connect: bool) -> Graph {
    let mut graph = Graph::new(id, "Linear workflow");
    graph.nodes = ids
        .iter()
        .enumerate()
        .map(|(i, nid)| node(nid, FIXTURE_AGENTS[i % FIXTURE_AGENTS.len()], i))
        .collect();
    if connect {
        graph.edges = ids
            .windows(2)
            .map(|w| Edge::new(w[0], w[1], EdgeType::DataFlow, EdgeConfig::default()))
            .collect();
    }
    graph
}

/// Config with streaming off and millisecond-scale simulated timing.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.execution.streaming = false;
    config.execution.tick_interval_ms = 10;
    config.execution.sim_min_duration_ms = 5;
    config.execution.sim_max_duration_ms = 20;
    config
}
