use weft_core::traits::AgentDirectory;
use weft_core::types::{Graph, NewMission, SubTask};

/// Plan used when the graph has no nodes: (agent type, title).
const CANONICAL_PLAN: &[(&str, &str)] = &[
    ("coordinator", "Coordinate the mission plan"),
    ("researcher", "Research background material"),
    ("analyst", "Analyze the findings"),
    ("validator", "Validate the conclusions"),
    ("reporter", "Compile the final report"),
];

/// One sub-task per node, in stored node order.
///
/// The stored order is authoritative; no topological re-sort happens here.
/// Only the first sub-task receives `description` as its input.
pub fn derive_sub_tasks(
    graph: &Graph,
    description: &str,
    directory: &dyn AgentDirectory,
) -> Vec<SubTask> {
    let mut tasks: Vec<SubTask> = if graph.nodes.is_empty() {
        CANONICAL_PLAN
            .iter()
            .map(|(agent_type, title)| {
                SubTask::new(*title, *agent_type, directory.display_name(agent_type))
            })
            .collect()
    } else {
        graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let title = node
                    .label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| format!("Step {}: {}", i + 1, node.agent_type));
                SubTask::new(title, &node.agent_type, directory.display_name(&node.agent_type))
            })
            .collect()
    };

    if let Some(first) = tasks.first_mut() {
        first.input = Some(description.to_string());
    }
    tasks
}

/// Creation request for a mission over `graph`, led by `leader_type`.
pub fn plan_mission(
    graph: &Graph,
    description: &str,
    leader_type: &str,
    directory: &dyn AgentDirectory,
) -> NewMission {
    NewMission {
        leader_type: leader_type.to_string(),
        leader_name: directory.display_name(leader_type),
        description: description.to_string(),
        sub_tasks: derive_sub_tasks(graph, description, directory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::directory::AgentCatalog;
    use weft_core::types::SubTaskStatus;
    use weft_test_utils::{empty_graph, linear_graph, node};

    #[test]
    fn test_empty_graph_gets_canonical_plan() {
        let tasks = derive_sub_tasks(&empty_graph("wf"), "Survey the market", &AgentCatalog::builtin());
        assert_eq!(tasks.len(), 5);
        let types: Vec<&str> = tasks.iter().map(|t| t.agent_type.as_str()).collect();
        assert_eq!(types, ["coordinator", "researcher", "analyst", "validator", "reporter"]);
        assert!(tasks.iter().all(|t| t.status == SubTaskStatus::Pending));
    }

    #[test]
    fn test_follows_stored_node_order() {
        let mut graph = linear_graph("wf", &["a", "b", "c"], true);
        // Stored order wins even against edge direction.
        graph.nodes.swap(0, 2);
        let tasks = derive_sub_tasks(&graph, "d", &AgentCatalog::builtin());
        let types: Vec<&str> = tasks.iter().map(|t| t.agent_type.as_str()).collect();
        assert_eq!(types, ["reporter", "analyst", "researcher"]);
    }

    #[test]
    fn test_titles_and_agent_names() {
        let mut graph = empty_graph("wf");
        graph.nodes.push(node("n1", "researcher", 0).with_label("Dig through filings"));
        graph.nodes.push(node("n2", "mystery_agent", 1));
        let tasks = derive_sub_tasks(&graph, "d", &AgentCatalog::builtin());

        assert_eq!(tasks[0].title, "Dig through filings");
        assert_eq!(tasks[0].agent_name, "Researcher");
        assert_eq!(tasks[1].title, "Step 2: mystery_agent");
        assert_eq!(tasks[1].agent_name, "mystery_agent");
    }

    #[test]
    fn test_only_first_input_seeded() {
        let graph = linear_graph("wf", &["a", "b", "c"], true);
        let tasks = derive_sub_tasks(&graph, "Find churn drivers", &AgentCatalog::builtin());
        assert_eq!(tasks[0].input.as_deref(), Some("Find churn drivers"));
        assert!(tasks[1..].iter().all(|t| t.input.is_none()));
    }

    #[test]
    fn test_plan_mission_resolves_leader() {
        let new = plan_mission(&empty_graph("wf"), "d", "coordinator", &AgentCatalog::builtin());
        assert_eq!(new.leader_name, "Coordinator");
        assert_eq!(new.sub_tasks.len(), 5);
    }
}
