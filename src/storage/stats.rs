//! Set-based card statistics and per-card visibility flags.

use sqlx::Row;
use std::collections::{BTreeMap, HashSet};

use super::{to_u64, Store};
use crate::types::{CardStats, Game, StatsScope, TrackerError};

/// SQL fragment and bind value selecting the sessions in a scope.
enum ScopeKey<'a> {
    Text(&'a str),
    Int(i64),
}

fn scope_filter(scope: &StatsScope) -> (&'static str, ScopeKey<'_>) {
    match scope {
        StatsScope::Session { session_id } => ("s.id = ?", ScopeKey::Text(session_id)),
        StatsScope::League { league_id } => ("s.league_id = ?", ScopeKey::Int(*league_id)),
        StatsScope::AllTime { game } => ("l.game = ?", ScopeKey::Text(game.as_str())),
    }
}

impl Store {
    /// Aggregate card counts over every stored session in `scope`.
    pub async fn card_stats(&self, scope: &StatsScope) -> Result<CardStats, TrackerError> {
        match scope {
            StatsScope::Session { session_id } => {
                if !self.session_exists(session_id).await? {
                    return Err(TrackerError::NotFound(format!("session {session_id}")));
                }
            }
            StatsScope::League { league_id } => {
                self.require_league(*league_id).await?;
            }
            StatsScope::AllTime { .. } => {}
        }

        let (clause, key) = scope_filter(scope);
        let head_sql = format!(
            "SELECT COUNT(*) AS session_count, COALESCE(SUM(s.decks_opened), 0) AS decks_opened \
             FROM sessions s JOIN leagues l ON l.id = s.league_id WHERE {clause}"
        );
        let cards_sql = format!(
            "SELECT c.card_name, SUM(c.count) AS total \
             FROM session_cards c \
             JOIN sessions s ON s.id = c.session_id \
             JOIN leagues l ON l.id = s.league_id \
             WHERE {clause} \
             GROUP BY c.card_name"
        );

        let (head, rows) = match key {
            ScopeKey::Text(v) => (
                sqlx::query(&head_sql).bind(v).fetch_one(self.pool()).await?,
                sqlx::query(&cards_sql).bind(v).fetch_all(self.pool()).await?,
            ),
            ScopeKey::Int(v) => (
                sqlx::query(&head_sql).bind(v).fetch_one(self.pool()).await?,
                sqlx::query(&cards_sql).bind(v).fetch_all(self.pool()).await?,
            ),
        };

        let mut cards = BTreeMap::new();
        for row in &rows {
            let count = to_u64(row.try_get("total")?);
            if count > 0 {
                cards.insert(row.try_get::<String, _>("card_name")?, count);
            }
        }

        Ok(CardStats {
            scope: scope.clone(),
            total_count: cards.values().sum(),
            decks_opened: to_u64(head.try_get("decks_opened")?),
            session_count: to_u64(head.try_get("session_count")?),
            cards,
        })
    }

    /// Cards the user excluded from value calculations for a game.
    pub async fn hidden_cards(&self, game: Game) -> Result<HashSet<String>, TrackerError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT card_name FROM card_settings WHERE game = ? AND hidden_from_calculation = 1",
        )
        .bind(game.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(names.into_iter().collect())
    }

    pub async fn set_card_hidden(&self, game: Game, card_name: &str, hidden: bool) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO card_settings (game, card_name, hidden_from_calculation) VALUES (?, ?, ?) \
             ON CONFLICT (game, card_name) DO UPDATE SET hidden_from_calculation = excluded.hidden_from_calculation",
        )
        .bind(game.as_str())
        .bind(card_name)
        .bind(hidden)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
