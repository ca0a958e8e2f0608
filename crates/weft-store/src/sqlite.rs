use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::traits::PersistenceAdapter;
use weft_core::types::{
    new_id, Edge, Graph, LibraryDocument, Mission, MissionId, MissionPatch, NewMission, Node,
    SubTaskStatus,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS graphs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS graph_nodes (
        graph_id TEXT NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
        ord INTEGER NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (graph_id, id)
    );

    CREATE TABLE IF NOT EXISTS graph_edges (
        graph_id TEXT NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
        ord INTEGER NOT NULL,
        id TEXT NOT NULL,
        source_node_id TEXT NOT NULL,
        target_node_id TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (graph_id, id)
    );

    CREATE TABLE IF NOT EXISTS missions (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_missions_workflow
        ON missions(workflow_id, created_at);

    CREATE TABLE IF NOT EXISTS library_documents (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        mission_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        tags TEXT NOT NULL,
        created_at TEXT NOT NULL
    );";

/// A document stored in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub workflow_id: String,
    pub mission_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

/// SQLite-backed persistence adapter.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        Self::init(conn, Some(path))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        if let Some(path) = path {
            debug!(path = %path.display(), "SQLite store opened");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| WeftError::Database(e.to_string()))
    }

    /// Ids and names of every stored graph.
    pub fn list_graphs(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM graphs ORDER BY updated_at DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Fetch a library document by id.
    pub fn document(&self, id: &str) -> Result<Option<StoredDocument>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, workflow_id, mission_id, title, content, tags
                 FROM library_documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(id, workflow_id, mission_id, title, content, tags)| {
            Ok(StoredDocument {
                id,
                workflow_id,
                mission_id,
                title,
                content,
                tags: serde_json::from_str(&tags)?,
            })
        })
        .transpose()
    }

    fn read_mission(conn: &Connection, workflow_id: &str, mission_id: &str) -> Result<Mission> {
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM missions WHERE id = ?1 AND workflow_id = ?2",
                params![mission_id, workflow_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let data = data
            .ok_or_else(|| WeftError::MissionNotFound(format!("{}/{}", workflow_id, mission_id)))?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_mission(conn: &Connection, mission: &Mission) -> Result<()> {
        let data = serde_json::to_string(mission)?;
        conn.execute(
            "INSERT INTO missions (id, workflow_id, status, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                mission.id.as_str(),
                mission.workflow_id,
                mission.status.to_string(),
                data,
                mission.created_at.to_rfc3339(),
                mission.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl PersistenceAdapter for SqliteStore {
    fn load_graph(&self, id: &str) -> BoxFuture<'_, Result<Graph>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let name: Option<String> = conn
                .query_row("SELECT name FROM graphs WHERE id = ?1", params![id], |row| row.get(0))
                .optional()
                .map_err(db_err)?;
            let name = name.ok_or_else(|| WeftError::NotFound(format!("graph {}", id)))?;

            let mut stmt = conn
                .prepare("SELECT data FROM graph_nodes WHERE graph_id = ?1 ORDER BY ord ASC")
                .map_err(db_err)?;
            let nodes = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .map(|data| Ok(serde_json::from_str::<Node>(&data.map_err(db_err)?)?))
                .collect::<Result<Vec<_>>>()?;

            let mut stmt = conn
                .prepare("SELECT data FROM graph_edges WHERE graph_id = ?1 ORDER BY ord ASC")
                .map_err(db_err)?;
            let edges = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .map(|data| Ok(serde_json::from_str::<Edge>(&data.map_err(db_err)?)?))
                .collect::<Result<Vec<_>>>()?;

            Ok(Graph { id, name, nodes, edges })
        })
    }

    fn save_graph(&self, id: &str, graph: &Graph) -> BoxFuture<'_, Result<Graph>> {
        let mut graph = graph.clone();
        graph.id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let tx = conn.unchecked_transaction().map_err(db_err)?;

            tx.execute(
                "INSERT INTO graphs (id, name, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
                params![graph.id, graph.name, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            tx.execute("DELETE FROM graph_nodes WHERE graph_id = ?1", params![graph.id])
                .map_err(db_err)?;
            tx.execute("DELETE FROM graph_edges WHERE graph_id = ?1", params![graph.id])
                .map_err(db_err)?;

            for (ord, node) in graph.nodes.iter().enumerate() {
                tx.execute(
                    "INSERT INTO graph_nodes (graph_id, ord, id, data) VALUES (?1, ?2, ?3, ?4)",
                    params![graph.id, ord as i64, node.id, serde_json::to_string(node)?],
                )
                .map_err(db_err)?;
            }
            for (ord, edge) in graph.edges.iter().enumerate() {
                tx.execute(
                    "INSERT INTO graph_edges (graph_id, ord, id, source_node_id, target_node_id, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        graph.id,
                        ord as i64,
                        edge.id,
                        edge.source_node_id,
                        edge.target_node_id,
                        serde_json::to_string(edge)?
                    ],
                )
                .map_err(db_err)?;
            }

            tx.commit().map_err(db_err)?;
            info!(graph_id = %graph.id, nodes = graph.nodes.len(), edges = graph.edges.len(), "Graph stored");
            Ok(graph)
        })
    }

    fn list_missions(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<Mission>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM missions WHERE workflow_id = ?1
                     ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let missions = stmt
                .query_map(params![workflow_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .map(|data| Ok(serde_json::from_str::<Mission>(&data.map_err(db_err)?)?))
                .collect::<Result<Vec<_>>>()?;
            Ok(missions)
        })
    }

    fn create_mission(&self, workflow_id: &str, new: NewMission) -> BoxFuture<'_, Result<Mission>> {
        let mission = Mission::from_new(workflow_id, new);
        Box::pin(async move {
            let conn = self.lock()?;
            Self::write_mission(&conn, &mission)?;
            debug!(mission_id = %mission.id, workflow_id = %mission.workflow_id, "Mission stored");
            Ok(mission)
        })
    }

    fn update_mission(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        patch: MissionPatch,
    ) -> BoxFuture<'_, Result<()>> {
        let workflow_id = workflow_id.to_string();
        let mission_id = mission_id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut mission = Self::read_mission(&conn, &workflow_id, mission_id.as_str())?;
            mission.apply_patch(&patch);
            Self::write_mission(&conn, &mission)?;
            debug!(mission_id = %mission_id, status = %mission.status, "Mission updated");
            Ok(())
        })
    }

    fn save_mission_result_to_library(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        tags: Vec<String>,
    ) -> BoxFuture<'_, Result<LibraryDocument>> {
        let workflow_id = workflow_id.to_string();
        let mission_id = mission_id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let mission = Self::read_mission(&conn, &workflow_id, mission_id.as_str())?;
            let document_id = new_id("doc");
            conn.execute(
                "INSERT INTO library_documents (id, workflow_id, mission_id, title, content, tags, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    document_id,
                    workflow_id,
                    mission_id.as_str(),
                    document_title(&mission),
                    render_document(&mission, &tags),
                    serde_json::to_string(&tags)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            info!(mission_id = %mission_id, document_id = %document_id, "Library document written");
            Ok(LibraryDocument { document_id })
        })
    }
}

fn db_err(e: rusqlite::Error) -> WeftError {
    WeftError::Database(e.to_string())
}

fn document_title(mission: &Mission) -> String {
    let title: String = mission.description.chars().take(80).collect();
    if title.trim().is_empty() {
        format!("Mission {}", mission.id)
    } else {
        title
    }
}

/// Markdown body: description, per-step outputs, and the final result.
fn render_document(mission: &Mission, tags: &[String]) -> String {
    let mut out = format!("# {}\n\n", document_title(mission));
    out.push_str(&format!("- Mission: {}\n", mission.id));
    out.push_str(&format!("- Leader: {}\n", mission.leader_name));
    out.push_str(&format!("- Status: {}\n", mission.status));
    if !tags.is_empty() {
        out.push_str(&format!("- Tags: {}\n", tags.join(", ")));
    }

    out.push_str("\n## Steps\n");
    for (i, task) in mission.sub_tasks.iter().enumerate() {
        out.push_str(&format!("\n### {}. {} ({})\n\n", i + 1, task.title, task.agent_name));
        match (task.status, task.output.as_deref()) {
            (SubTaskStatus::Failed, Some(err)) => out.push_str(&format!("**Failed:** {}\n", err)),
            (_, Some(output)) => out.push_str(&format!("{}\n", output)),
            (_, None) => out.push_str("_No output._\n"),
        }
    }

    if let Some(ref result) = mission.result {
        out.push_str(&format!("\n## Result\n\n{}\n", result));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::{MissionStatus, SubTask};
    use weft_test_utils::linear_graph;

    fn new_mission() -> NewMission {
        NewMission {
            leader_type: "coordinator".into(),
            leader_name: "Coordinator".into(),
            description: "Churn analysis".into(),
            sub_tasks: vec![
                SubTask::new("Pull data", "data_engineer", "Data Engineer"),
                SubTask::new("Report", "reporter", "Reporter"),
            ],
        }
    }

    #[tokio::test]
    async fn test_graph_round_trip_preserves_order() {
        let store = SqliteStore::in_memory().unwrap();
        let mut graph = linear_graph("wf", &["c", "a", "b"], true);
        graph.name = "Pipeline".into();
        let saved = store.save_graph("wf", &graph).await.unwrap();
        let loaded = store.load_graph("wf").await.unwrap();
        assert_eq!(loaded, saved);
        let ids: Vec<&str> = loaded.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_graph() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .save_graph("wf", &linear_graph("wf", &["a", "b", "c"], true))
            .await
            .unwrap();
        store
            .save_graph("wf", &linear_graph("wf", &["x"], false))
            .await
            .unwrap();
        let loaded = store.load_graph("wf").await.unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert!(loaded.edges.is_empty());
        assert_eq!(store.list_graphs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_graph_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.load_graph("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_persistence());
    }

    #[tokio::test]
    async fn test_update_mission_merges_patch() {
        let store = SqliteStore::in_memory().unwrap();
        let mission = store.create_mission("wf", new_mission()).await.unwrap();
        let patch = MissionPatch {
            status: Some(MissionStatus::Running),
            ..Default::default()
        };
        store.update_mission("wf", &mission.id, patch).await.unwrap();

        let listed = store.list_missions("wf").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, MissionStatus::Running);
        assert_eq!(listed[0].sub_tasks.len(), 2);
        assert!(listed[0].updated_at >= mission.updated_at);

        let err = store
            .update_mission("other", &mission.id, MissionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::MissionNotFound(_)));
    }

    #[tokio::test]
    async fn test_library_document_content() {
        let store = SqliteStore::in_memory().unwrap();
        let mut mission = store.create_mission("wf", new_mission()).await.unwrap();
        mission.sub_tasks[0].status = SubTaskStatus::Completed;
        mission.sub_tasks[0].output = Some("42 rows".into());
        mission.sub_tasks[1].status = SubTaskStatus::Failed;
        mission.sub_tasks[1].output = Some("template missing".into());
        mission.status = MissionStatus::Completed;
        mission.result = Some("Churn is seasonal.".into());
        store
            .update_mission("wf", &mission.id, MissionPatch::snapshot(&mission))
            .await
            .unwrap();

        let doc = store
            .save_mission_result_to_library("wf", &mission.id, vec!["churn".into(), "q3".into()])
            .await
            .unwrap();
        let stored = store.document(&doc.document_id).unwrap().unwrap();
        assert_eq!(stored.title, "Churn analysis");
        assert_eq!(stored.tags, vec!["churn".to_string(), "q3".to_string()]);
        assert!(stored.content.contains("42 rows"));
        assert!(stored.content.contains("**Failed:** template missing"));
        assert!(stored.content.contains("## Result\n\nChurn is seasonal."));
        assert!(stored.content.contains("- Tags: churn, q3"));
    }

    #[tokio::test]
    async fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weft.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_mission("wf", new_mission()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_missions("wf").await.unwrap().len(), 1);
    }
}
