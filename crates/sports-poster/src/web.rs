use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono_tz::Tz;
use tracing::{error, info};

use shared::{Controller, Trigger};

use crate::panel::PanelRenderer;

pub struct AppState {
    pub controller: Arc<Controller>,
    pub schedule: String,
    pub timezone: Tz,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(panel_page))
        .route("/api/status", get(api_status))
        .route("/api/runs/latest", get(api_latest_run))
        .route("/api/run", post(api_run_now))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

async fn panel_page(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.controller.snapshot();
    Html(PanelRenderer::generate(&status, &state.schedule, state.timezone))
}

async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.snapshot())
}

async fn api_latest_run(State(state): State<Arc<AppState>>) -> Response {
    let status = state.controller.snapshot();
    match status.latest_run() {
        Some(run) => Json(run.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No runs yet"})),
        )
            .into_response(),
    }
}

/// Run the pipeline and answer with the finished run. The run lives on its
/// own task so a dropped connection cannot cut it short.
async fn api_run_now(State(state): State<Arc<AppState>>) -> Response {
    info!("Manual run requested from control panel");
    let controller = state.controller.clone();
    let handle = tokio::spawn(async move { controller.run_now(Trigger::Manual).await });

    match handle.await {
        Ok(Ok(run)) => Json(run).into_response(),
        Ok(Err(already_running)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": already_running.to_string()})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Manual run task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Run task failed"})),
            )
                .into_response()
        }
    }
}
