//! REST control API over the ingester registry.
//!
//! - `POST /api/cmaf-ingests` - create and start an ingest session
//! - `GET /api/cmaf-ingests` - list session ids
//! - `GET /api/cmaf-ingests/{id}` - current report of a session
//! - `POST /api/cmaf-ingests/{id}/next` - push the next segment now
//! - `DELETE /api/cmaf-ingests/{id}` - stop a session, returning its report

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cmaf_ingest_engine::{IngestRequest, IngesterRegistry, VodSource};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::AppError;

pub type Registry = IngesterRegistry<VodSource>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub id: u64,
    pub report: Vec<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/cmaf-ingests", post(create_ingest).get(list_ingests))
        .route("/api/cmaf-ingests/{id}", get(get_report).delete(stop_ingest))
        .route("/api/cmaf-ingests/{id}/next", post(next_segment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn create_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state.registry.create(request)?;
    state.registry.start_session(id)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn list_ingests(State(state): State<AppState>) -> Json<Vec<u64>> {
    Json(state.registry.session_ids())
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ReportResponse>, AppError> {
    let report = state.registry.report(id)?;
    Ok(Json(ReportResponse { id, report }))
}

async fn next_segment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.registry.trigger_next_segment(id)?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop_ingest(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ReportResponse>, AppError> {
    let report = state.registry.stop(id).await?;
    Ok(Json(ReportResponse { id, report }))
}

/// Serve the API on `listener` until Ctrl-C, then stop every session.
pub async fn serve(listener: TcpListener, registry: Arc<Registry>) -> Result<(), AppError> {
    let app = build_router(AppState {
        registry: Arc::clone(&registry),
    });
    info!("Control API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
