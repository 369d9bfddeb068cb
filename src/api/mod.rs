//! Local HTTP API.
//!
//! Exposes the tracker's query/command surface as JSON routes for whatever
//! front end sits on top (overlay, desktop shell, scripts). CORS is open so
//! a locally served page can call it.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::types::TrackerError;
use routes::AppState;

/// Bind `port` on localhost and serve the API in a background task.
pub async fn spawn_api(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    }))
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        // Sessions
        .route("/api/session", get(routes::get_active_session))
        .route("/api/session/start", post(routes::start_session))
        .route("/api/session/stop", post(routes::stop_session))
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/:id", delete(routes::delete_session))
        // Statistics
        .route("/api/stats", get(routes::get_stats))
        .route("/api/cards/hidden", put(routes::set_card_hidden))
        // Prices
        .route("/api/prices/source", put(routes::set_price_source))
        .route("/api/prices/:league_id/refresh", post(routes::refresh_prices))
        .route("/api/prices/:league_id/latest", get(routes::latest_prices))
        // Leagues
        .route("/api/leagues/:game", get(routes::list_leagues))
        .route("/api/leagues/:game/sync", post(routes::sync_leagues))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error responses
// ---------------------------------------------------------------------------

/// All error responses have the shape
/// `{ "error": { "code": "conflict", "message": "..." } }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

fn status_and_code(err: &TrackerError) -> (StatusCode, &'static str) {
    match err {
        TrackerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        TrackerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        TrackerError::TransientFetch { .. } => (StatusCode::SERVICE_UNAVAILABLE, "fetch_failed"),
        TrackerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        TrackerError::Migration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "migration"),
        TrackerError::Storage(_) | TrackerError::Io(_) | TrackerError::Corrupt(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let (status, code) = status_and_code(&self);
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
