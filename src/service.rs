//! Query/command surface over the tracker core.
//!
//! [`Tracker`] is what outer layers (the HTTP API, the binary's background
//! loops, tests) talk to. It owns no state of its own beyond the selected
//! price source; sessions live in the [`SessionTracker`], prices in the
//! [`PriceSnapshotManager`], everything durable in the [`Store`].

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::engine::session::SessionState;
use crate::engine::snapshots::PriceSnapshotManager;
use crate::engine::stats::{summarize, Summary, ValuationOptions};
use crate::engine::tracker::SessionTracker;
use crate::feeds::LeagueFeed;
use crate::storage::Store;
use crate::types::{
    CardStats, Game, League, Page, Paged, PriceSnapshot, PriceSource, Session, SessionFilter,
    SessionRow, StatsScope, TrackerError,
};

/// The active session plus its valuation against the latest snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub selected_league: Option<String>,
    pub summary: Option<Summary>,
}

/// Stored statistics for a scope, valued where a league applies.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub stats: CardStats,
    pub summary: Summary,
}

/// Counts from one league sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeagueSync {
    pub upserted: usize,
    pub ended: u64,
}

pub struct Tracker {
    store: Store,
    sessions: Arc<SessionTracker>,
    prices: Arc<PriceSnapshotManager>,
    league_feed: Option<Arc<dyn LeagueFeed>>,
    price_source: RwLock<PriceSource>,
}

impl Tracker {
    pub fn new(
        store: Store,
        sessions: Arc<SessionTracker>,
        prices: Arc<PriceSnapshotManager>,
        league_feed: Option<Arc<dyn LeagueFeed>>,
        price_source: PriceSource,
    ) -> Self {
        Self {
            store,
            sessions,
            prices,
            league_feed,
            price_source: RwLock::new(price_source),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -- Sessions ---------------------------------------------------------

    pub async fn start_session(&self, league_id: i64) -> Result<Session, TrackerError> {
        self.sessions.start_session(league_id).await
    }

    pub async fn start_session_in_selected_league(&self) -> Result<Session, TrackerError> {
        self.sessions.start_session_in_selected_league().await
    }

    pub async fn stop_session(&self) -> Result<Session, TrackerError> {
        self.sessions.stop_session().await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), TrackerError> {
        self.sessions.delete_session(id).await
    }

    /// Current state, with a valued summary while a session is active.
    pub async fn get_active_session_snapshot(&self) -> Result<SessionSnapshot, TrackerError> {
        let state = self.sessions.state().await;
        let summary = match &state {
            SessionState::Active(session) => {
                let league = self.store.require_league(session.league_id).await?;
                let snapshot = self.prices.latest(league.id).await?;
                let options = self.valuation_options(league.game).await?;
                Some(summarize(
                    &session.tallies(),
                    session.decks_opened,
                    snapshot.as_ref(),
                    &options,
                ))
            }
            _ => None,
        };
        Ok(SessionSnapshot {
            state,
            selected_league: self.sessions.selected_league().await,
            summary,
        })
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: Page,
    ) -> Result<Paged<SessionRow>, TrackerError> {
        self.store.list_sessions(filter, page).await
    }

    // -- Statistics -------------------------------------------------------

    pub async fn get_card_stats(&self, scope: &StatsScope) -> Result<CardStats, TrackerError> {
        self.store.card_stats(scope).await
    }

    /// Card statistics for `scope` valued against the latest snapshot of
    /// the scope's league. All-time scopes span leagues and are not valued.
    pub async fn get_scope_summary(&self, scope: &StatsScope) -> Result<ScopeSummary, TrackerError> {
        let stats = self.store.card_stats(scope).await?;

        let (game, league_id, tallies) = match scope {
            StatsScope::Session { session_id } => {
                let session = self
                    .store
                    .load_session(session_id)
                    .await?
                    .ok_or_else(|| TrackerError::NotFound(format!("session {session_id}")))?;
                let league = self.store.require_league(session.league_id).await?;
                (league.game, Some(league.id), session.tallies())
            }
            StatsScope::League { league_id } => {
                let league = self.store.require_league(*league_id).await?;
                (league.game, Some(league.id), stats.tallies())
            }
            StatsScope::AllTime { game } => (*game, None, stats.tallies()),
        };

        let snapshot = match league_id {
            Some(id) => self.prices.latest(id).await?,
            None => None,
        };
        let options = self.valuation_options(game).await?;
        let summary = summarize(&tallies, stats.decks_opened, snapshot.as_ref(), &options);
        Ok(ScopeSummary { stats, summary })
    }

    pub async fn set_card_hidden(&self, game: Game, card_name: &str, hidden: bool) -> Result<(), TrackerError> {
        if card_name.trim().is_empty() {
            return Err(TrackerError::InvalidInput("card name is empty".into()));
        }
        self.store.set_card_hidden(game, card_name.trim(), hidden).await
    }

    async fn valuation_options(&self, game: Game) -> Result<ValuationOptions, TrackerError> {
        Ok(ValuationOptions {
            price_source: *self.price_source.read().await,
            hidden: self.store.hidden_cards(game).await?,
        })
    }

    // -- Prices -----------------------------------------------------------

    pub async fn refresh_prices(&self, league_id: i64) -> Result<PriceSnapshot, TrackerError> {
        self.prices.refresh(league_id).await
    }

    pub async fn get_latest_price_snapshot(&self, league_id: i64) -> Result<Option<PriceSnapshot>, TrackerError> {
        self.store.require_league(league_id).await?;
        self.prices.latest(league_id).await
    }

    pub async fn price_source(&self) -> PriceSource {
        *self.price_source.read().await
    }

    pub async fn set_price_source(&self, source: PriceSource) {
        *self.price_source.write().await = source;
        info!(source = %source, "Price source selected");
    }

    // -- Leagues ----------------------------------------------------------

    pub async fn list_leagues(&self, game: Game) -> Result<Vec<League>, TrackerError> {
        self.store.list_leagues(game).await
    }

    /// Pull the current league list and upsert it. Leagues that dropped off
    /// the list are marked ended; nothing is deleted.
    pub async fn sync_leagues(&self, game: Game) -> Result<LeagueSync, TrackerError> {
        let feed = self
            .league_feed
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidInput("no league feed configured".into()))?;

        let infos = feed.fetch_leagues(game).await?;
        for info in &infos {
            self.store.upsert_league(game, info).await?;
        }
        // An empty list says more about the feed than about the leagues.
        let ended = if infos.is_empty() {
            warn!(game = %game, "League feed returned no leagues, leaving known leagues open");
            0
        } else {
            let names: Vec<String> = infos.iter().map(|i| i.name.clone()).collect();
            self.store.end_leagues_not_in(game, &names, Utc::now()).await?
        };

        let sync = LeagueSync {
            upserted: infos.len(),
            ended,
        };
        info!(game = %game, upserted = sync.upserted, ended = sync.ended, "Leagues synced");
        Ok(sync)
    }
}
