use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::routes::AppState;
use crate::api::{auth, routes};

/// HTTP front of the analyzer: the public ingestion route plus the
/// key-guarded admin/reporting routes, on one listener.
pub struct ApiServer {
    state: AppState,
    bind_addr: String,
}

impl ApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let api_key = state.api_key.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let admin = Router::new()
            .route("/api/status", get(routes::get_status))
            .route("/api/dashboard-data", get(routes::get_dashboard_data))
            .route("/api/reset-blocked", post(routes::reset_blocked))
            .route("/api/wipe", post(routes::wipe_all))
            .layer(middleware::from_fn_with_state(
                api_key,
                auth::auth_middleware,
            ));

        let app = Router::new()
            .route("/api/logs", post(routes::ingest_log))
            .merge(admin)
            .layer(cors)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
