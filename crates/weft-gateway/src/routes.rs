use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use weft_core::error::WeftError;
use weft_core::types::{Graph, Mission, MissionId, MissionStatus};
use weft_graph::{dag, GraphModel};
use weft_mission::plan_mission;

use crate::sequencer;
use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(e: WeftError) -> ApiError {
    let status = match &e {
        e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        WeftError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/workflows/{id}
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Graph>> {
    let graph = state.store.load_graph(&id).await.map_err(api_error)?;
    Ok(Json(graph))
}

// PUT /api/workflows/{id} rejects cycles and malformed graphs with 422
pub async fn put_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut graph): Json<Graph>,
) -> ApiResult<Json<Graph>> {
    graph.id = id.clone();
    let graph = GraphModel::import(graph)
        .map_err(|e| api_error(WeftError::Validation(e.to_string())))?
        .into_graph();
    dag::validate(&graph).map_err(api_error)?;

    let saved = state.store.save_graph(&id, &graph).await.map_err(api_error)?;
    info!(workflow_id = %id, nodes = saved.nodes.len(), edges = saved.edges.len(), "Workflow saved");
    Ok(Json(saved))
}

// GET /api/workflows/{id}/missions (a failed listing reads as empty)
pub async fn list_missions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let missions = match state.store.list_missions(&id).await {
        Ok(missions) => missions,
        Err(e) => {
            warn!(workflow_id = %id, error = %e, "Mission listing failed");
            Vec::new()
        }
    };
    Json(json!({ "missions": missions }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMissionBody {
    pub description: String,
    #[serde(default)]
    pub leader_type: Option<String>,
}

// POST /api/workflows/{id}/missions
pub async fn create_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CreateMissionBody>,
) -> ApiResult<(StatusCode, Json<Mission>)> {
    if body.description.trim().is_empty() {
        return Err(api_error(WeftError::Validation(
            "mission description is empty".into(),
        )));
    }
    let graph = state.store.load_graph(&id).await.map_err(api_error)?;
    let leader = body
        .leader_type
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| state.default_leader.clone());
    let new = plan_mission(&graph, &body.description, &leader, state.directory.as_ref());

    let mission = state
        .store
        .create_mission(&id, new)
        .await
        .map_err(api_error)?;
    info!(workflow_id = %id, mission_id = %mission.id, steps = mission.sub_tasks.len(), "Mission created");
    Ok((StatusCode::CREATED, Json(mission)))
}

// POST /api/workflows/{id}/missions/{mid}/execute streams `data:` frames
pub async fn execute_mission(
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let mission = find_mission(&state, &id, &MissionId::from_string(&mid)).await?;
    let delay = Duration::from_millis(state.config.step_delay_ms);
    let rx = sequencer::spawn(mission, delay, state.store.clone());

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
pub struct LibraryBody {
    #[serde(default)]
    pub tags: Vec<String>,
}

// POST /api/workflows/{id}/missions/{mid}/library, completed missions only
pub async fn save_to_library(
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
    Json(body): Json<LibraryBody>,
) -> ApiResult<Json<Value>> {
    let mission = find_mission(&state, &id, &MissionId::from_string(&mid)).await?;
    if mission.status != MissionStatus::Completed {
        return Err(api_error(WeftError::InvalidTransition {
            mission_id: mission.id.to_string(),
            action: "save to library".into(),
            status: mission.status.to_string(),
        }));
    }
    let doc = state
        .store
        .save_mission_result_to_library(&id, &mission.id, body.tags)
        .await
        .map_err(api_error)?;
    info!(workflow_id = %id, mission_id = %mission.id, document_id = %doc.document_id, "Mission saved to library");
    Ok(Json(json!({ "documentId": doc.document_id })))
}

async fn find_mission(state: &AppState, workflow_id: &str, mission_id: &MissionId) -> ApiResult<Mission> {
    let missions = state
        .store
        .list_missions(workflow_id)
        .await
        .map_err(api_error)?;
    missions
        .into_iter()
        .find(|m| &m.id == mission_id)
        .ok_or_else(|| api_error(WeftError::MissionNotFound(mission_id.to_string())))
}
