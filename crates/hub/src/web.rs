use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::db::Db;
use crate::irrigation::{Irrigation, ToggleError};
use crate::settings::{SettingsStore, ThresholdError, Thresholds};
use crate::state::StateHandle;

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub monitor: StateHandle,
    pub settings: SettingsStore,
    pub db: Db,
    pub irrigation: Irrigation,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route(
            "/api/settings",
            get(get_settings).put(put_settings).delete(reset_settings),
        )
        .route("/api/irrigation/toggle", post(toggle_irrigation))
        .route("/api/history", get(list_history).delete(clear_history))
        .with_state(app)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.monitor.snapshot().to_status())
}

#[derive(Serialize)]
struct SettingsResponse {
    saved: bool,
    thresholds: Thresholds,
}

async fn get_settings(State(app): State<AppState>) -> Result<Json<SettingsResponse>, ApiError> {
    let latest = app.settings.get_latest().await?;
    Ok(Json(SettingsResponse {
        saved: latest.is_some(),
        thresholds: latest.unwrap_or_default(),
    }))
}

async fn put_settings(
    State(app): State<AppState>,
    Json(t): Json<Thresholds>,
) -> Result<Json<SettingsResponse>, ApiError> {
    app.settings.save(&t).await?;
    app.monitor
        .update(|s| s.record_system("settings updated".to_string()));
    Ok(Json(SettingsResponse {
        saved: true,
        thresholds: t,
    }))
}

async fn reset_settings(State(app): State<AppState>) -> Result<Json<SettingsResponse>, ApiError> {
    app.settings.clear().await?;
    app.monitor
        .update(|s| s.record_system("settings reset".to_string()));
    info!("settings reset");
    Ok(Json(SettingsResponse {
        saved: false,
        thresholds: Thresholds::default(),
    }))
}

async fn toggle_irrigation(State(app): State<AppState>) -> Result<Response, ApiError> {
    let automatic = app
        .settings
        .get_latest()
        .await?
        .is_some_and(|t| t.automatic_irrigation);

    match app.irrigation.toggle(automatic).await {
        Ok(st) => Ok(Json(json!({ "on": st.on })).into_response()),
        Err(e @ (ToggleError::AutomaticMode | ToggleError::Busy)) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn list_history(
    State(app): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(app.db.list_history(limit).await?))
}

async fn clear_history(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let removed = app.db.clear_history().await?;
    info!(removed, "history cleared");
    Ok(Json(json!({ "removed": removed })))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<ThresholdError>().is_some() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            error!("api error: {:#}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": format!("{:#}", self.0) }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("control surface listening on http://{addr}");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
