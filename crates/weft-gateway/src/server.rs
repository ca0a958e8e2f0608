use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use weft_core::config::GatewayConfig;
use weft_core::traits::{AgentDirectory, PersistenceAdapter};

use crate::routes;
use crate::state::AppState;

/// The HTTP gateway server.
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn PersistenceAdapter>,
        directory: Arc<dyn AgentDirectory>,
        default_leader: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                store,
                directory,
                default_leader: default_leader.into(),
            }),
        }
    }

    /// Start serving until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let bind = self.state.config.bind.clone();
        let app = router(self.state);

        let listener = TcpListener::bind(&bind).await?;
        info!(bind = %bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// All gateway routes over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/workflows/{id}",
            get(routes::get_workflow).put(routes::put_workflow),
        )
        .route(
            "/api/workflows/{id}/missions",
            get(routes::list_missions).post(routes::create_mission),
        )
        .route(
            "/api/workflows/{id}/missions/{mid}/execute",
            post(routes::execute_mission),
        )
        .route(
            "/api/workflows/{id}/missions/{mid}/library",
            post(routes::save_to_library),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
