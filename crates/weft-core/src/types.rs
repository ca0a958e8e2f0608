use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique mission identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub String);

impl MissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a fresh element id with a readable prefix (`node-…`, `edge-…`).
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

// ── Graph ───────────────────────────────────────────────────────

/// A point in graph (canvas) coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::ops::Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Per-node agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub persona: String,
    /// Personality traits, e.g. `creativity -> 0.8`.
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 4096 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            persona: String::new(),
            traits: BTreeMap::new(),
            responsibilities: vec![],
            data_sources: vec![],
            custom_prompt: None,
        }
    }
}

/// An agent node on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub agent_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default)]
    pub config: NodeConfig,
}

impl Node {
    /// Create a node with a fresh id and default config.
    pub fn new(agent_type: impl Into<String>, position: Position) -> Self {
        Self {
            id: new_id("node"),
            agent_type: agent_type.into(),
            position,
            label: None,
            cluster: None,
            config: NodeConfig::default(),
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }
}

/// Partial node update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub config: Option<NodeConfig>,
}

/// Kind of relation an edge expresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    #[default]
    DataFlow,
    Conditional,
    StorageRead,
    StorageWrite,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DataFlow => "data_flow",
            Self::Conditional => "conditional",
            Self::StorageRead => "storage_read",
            Self::StorageWrite => "storage_write",
        };
        f.write_str(s)
    }
}

/// Condition attached to a `conditional` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCondition {
    /// Field of the upstream output the condition inspects.
    pub field: String,
    /// Comparison operator, e.g. `equals`, `contains`, `gt`.
    pub operator: String,
    pub value: serde_json::Value,
}

/// Transfer settings for an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeConfig {
    #[serde(default = "default_data_format")]
    pub data_format: String,
    #[serde(default = "default_transform")]
    pub transform: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

fn default_data_format() -> String { "auto".to_string() }
fn default_transform() -> String { "pass".to_string() }
fn default_priority() -> u8 { 5 }
fn default_blocking() -> bool { true }
fn default_timeout() -> u64 { 300 }

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            data_format: default_data_format(),
            transform: default_transform(),
            priority: default_priority(),
            blocking: default_blocking(),
            timeout: default_timeout(),
            condition: None,
        }
    }
}

/// A directed, typed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub config: EdgeConfig,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
        config: EdgeConfig,
    ) -> Self {
        Self {
            id: new_id("edge"),
            source_node_id: source.into(),
            target_node_id: target.into(),
            edge_type,
            config,
        }
    }

    /// Whether this edge touches `node_id` at either end.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// A workflow graph. Persisted as a whole unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: vec![],
            edges: vec![],
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn has_edge_between(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source_node_id == source && e.target_node_id == target)
    }
}

// ── Missions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One node's execution step within a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    pub title: String,
    pub agent_type: String,
    pub agent_name: String,
    #[serde(default)]
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SubTask {
    pub fn new(
        title: impl Into<String>,
        agent_type: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("task"),
            title: title.into(),
            agent_type: agent_type.into(),
            agent_name: agent_name.into(),
            status: SubTaskStatus::Pending,
            input: None,
            output: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Return to `pending`, dropping everything execution wrote.
    pub fn reset(&mut self) {
        self.status = SubTaskStatus::Pending;
        self.output = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// One execution run of a graph's nodes as an ordered task sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: MissionId,
    pub workflow_id: String,
    pub leader_type: String,
    pub leader_name: String,
    pub description: String,
    #[serde(default)]
    pub status: MissionStatus,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Build a fresh `pending` mission from a creation request.
    pub fn from_new(workflow_id: impl Into<String>, new: NewMission) -> Self {
        let now = Utc::now();
        let total = new.sub_tasks.len();
        Self {
            id: MissionId::new(),
            workflow_id: workflow_id.into(),
            leader_type: new.leader_type,
            leader_name: new.leader_name,
            description: new.description,
            status: MissionStatus::Pending,
            progress: Progress { current: 0, total },
            sub_tasks: new.sub_tasks,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.sub_tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.sub_tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Failed)
            .count()
    }

    /// Apply a partial update as the persistence layer would.
    pub fn apply_patch(&mut self, patch: &MissionPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(ref sub_tasks) = patch.sub_tasks {
            self.sub_tasks = sub_tasks.clone();
        }
        if let Some(ref result) = patch.result {
            self.result = result.clone();
        }
        self.updated_at = patch.updated_at.unwrap_or_else(Utc::now);
    }
}

/// Fields needed to create a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMission {
    pub leader_type: String,
    pub leader_name: String,
    pub description: String,
    pub sub_tasks: Vec<SubTask>,
}

/// Partial mission update sent to the persistence adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_tasks: Option<Vec<SubTask>>,
    /// `Some(None)` clears the stored result.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub result: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Distinguish a missing field (`None`) from an explicit `null` (`Some(None)`).
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl MissionPatch {
    /// Patch mirroring every mutable field of `mission`.
    pub fn snapshot(mission: &Mission) -> Self {
        Self {
            status: Some(mission.status),
            progress: Some(mission.progress),
            sub_tasks: Some(mission.sub_tasks.clone()),
            result: Some(mission.result.clone()),
            updated_at: Some(mission.updated_at),
        }
    }
}

/// Reference to a document written into the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDocument {
    pub document_id: String,
}

/// Agent descriptor resolved from the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_type: String,
    pub display_name: String,
    #[serde(default)]
    pub display_name_cn: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Mission lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum MissionEvent {
    /// Mission entered `running`.
    Started { mission_id: MissionId, total: usize },
    /// A sub-task started.
    StepStarted { mission_id: MissionId, step: usize, title: String },
    /// A sub-task completed.
    StepCompleted { mission_id: MissionId, step: usize, duration_ms: u64 },
    /// A sub-task failed; the mission continues.
    StepFailed { mission_id: MissionId, step: usize, error: String },
    /// The stream runner gave up and the simulated runner took over.
    RunnerFallback { mission_id: MissionId, reason: String },
    /// Mission reached `completed`.
    Completed { mission_id: MissionId, result: String },
    /// Mission reached `failed`.
    Failed { mission_id: MissionId, reason: String },
    /// Mission was cancelled.
    Cancelled { mission_id: MissionId },
    /// A mirror write to the persistence adapter failed.
    SyncFailed { mission_id: MissionId, error: String },
}

impl MissionEvent {
    pub fn mission_id(&self) -> &MissionId {
        match self {
            Self::Started { mission_id, .. }
            | Self::StepStarted { mission_id, .. }
            | Self::StepCompleted { mission_id, .. }
            | Self::StepFailed { mission_id, .. }
            | Self::RunnerFallback { mission_id, .. }
            | Self::Completed { mission_id, .. }
            | Self::Failed { mission_id, .. }
            | Self::Cancelled { mission_id }
            | Self::SyncFailed { mission_id, .. } => mission_id,
        }
    }

    /// Whether this event ends the current run.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
