//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<Tracker>`; errors
//! are `TrackerError`s rendered by its `IntoResponse` impl.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::service::{LeagueSync, ScopeSummary, SessionSnapshot, Tracker};
use crate::types::{
    Game, League, Page, Paged, PriceSnapshot, PriceSource, Session, SessionFilter, SessionRow,
    StatsScope, TrackerError,
};

pub type AppState = Arc<Tracker>;

type ApiResult<T> = Result<Json<T>, TrackerError>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartParams {
    /// Omitted: the league last reported by the client log.
    pub league_id: Option<i64>,
}

/// Flat query form of [`StatsScope`]: `kind` plus the field it needs.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub kind: String,
    pub session_id: Option<String>,
    pub league_id: Option<i64>,
    pub game: Option<Game>,
}

impl StatsParams {
    fn into_scope(self) -> Result<StatsScope, TrackerError> {
        let missing = |field: &str| TrackerError::InvalidInput(format!("{} scope needs {field}", self.kind));
        match self.kind.as_str() {
            "session" => Ok(StatsScope::Session {
                session_id: self.session_id.clone().ok_or_else(|| missing("session_id"))?,
            }),
            "league" => Ok(StatsScope::League {
                league_id: self.league_id.ok_or_else(|| missing("league_id"))?,
            }),
            "all_time" => Ok(StatsScope::AllTime {
                game: self.game.ok_or_else(|| missing("game"))?,
            }),
            other => Err(TrackerError::InvalidInput(format!("unknown stats scope: {other}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HiddenCardRequest {
    pub game: Game,
    pub card_name: String,
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct PriceSourceRequest {
    pub source: PriceSource,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/session
pub async fn get_active_session(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.get_active_session_snapshot().await?))
}

/// POST /api/session/start[?league_id=N]
pub async fn start_session(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> ApiResult<Session> {
    let session = match params.league_id {
        Some(id) => state.start_session(id).await?,
        None => state.start_session_in_selected_league().await?,
    };
    Ok(Json(session))
}

/// POST /api/session/stop
pub async fn stop_session(State(state): State<AppState>) -> ApiResult<Session> {
    Ok(Json(state.stop_session().await?))
}

/// GET /api/sessions?league_id&game&active_only&page&per_page
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
    Query(page): Query<Page>,
) -> ApiResult<Paged<SessionRow>> {
    Ok(Json(state.list_sessions(&filter, page).await?))
}

/// DELETE /api/sessions/:id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, TrackerError> {
    state.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/stats?kind=session|league|all_time&...
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<ScopeSummary> {
    let scope = params.into_scope()?;
    Ok(Json(state.get_scope_summary(&scope).await?))
}

/// PUT /api/cards/hidden
pub async fn set_card_hidden(
    State(state): State<AppState>,
    Json(req): Json<HiddenCardRequest>,
) -> Result<StatusCode, TrackerError> {
    state.set_card_hidden(req.game, &req.card_name, req.hidden).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/prices/source
pub async fn set_price_source(
    State(state): State<AppState>,
    Json(req): Json<PriceSourceRequest>,
) -> StatusCode {
    state.set_price_source(req.source).await;
    StatusCode::NO_CONTENT
}

/// POST /api/prices/:league_id/refresh
pub async fn refresh_prices(
    State(state): State<AppState>,
    Path(league_id): Path<i64>,
) -> ApiResult<PriceSnapshot> {
    Ok(Json(state.refresh_prices(league_id).await?))
}

/// GET /api/prices/:league_id/latest
pub async fn latest_prices(
    State(state): State<AppState>,
    Path(league_id): Path<i64>,
) -> ApiResult<Option<PriceSnapshot>> {
    Ok(Json(state.get_latest_price_snapshot(league_id).await?))
}

/// GET /api/leagues/:game
pub async fn list_leagues(
    State(state): State<AppState>,
    Path(game): Path<String>,
) -> ApiResult<Vec<League>> {
    let game: Game = game.parse()?;
    Ok(Json(state.list_leagues(game).await?))
}

/// POST /api/leagues/:game/sync
pub async fn sync_leagues(
    State(state): State<AppState>,
    Path(game): Path<String>,
) -> ApiResult<LeagueSync> {
    let game: Game = game.parse()?;
    Ok(Json(state.sync_leagues(game).await?))
}
