//! Session rows and their per-card counts.
//!
//! Writes here come only from the session tracker. Every write that
//! touches a count also bumps the session's `updated_at` in the same
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeMap;

use super::{fmt_ts, parse_opt_ts, parse_ts, to_i64, to_u64, Store};
use crate::types::{
    CardCount, Page, Paged, Session, SessionFilter, SessionRow, TrackerError,
};

const SESSION_COLUMNS: &str = "id, league_id, started_at, ended_at, decks_opened, last_zone";

fn session_from_row(row: &SqliteRow) -> Result<Session, TrackerError> {
    Ok(Session {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        started_at: parse_ts(row.try_get::<&str, _>("started_at")?)?,
        ended_at: parse_opt_ts(row.try_get("ended_at")?)?,
        decks_opened: to_u64(row.try_get("decks_opened")?),
        last_zone: row.try_get("last_zone")?,
        cards: BTreeMap::new(),
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<SessionRow, TrackerError> {
    let game: String = row.try_get("game")?;
    Ok(SessionRow {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        league_name: row.try_get("league_name")?,
        game: game
            .parse()
            .map_err(|_| TrackerError::Corrupt(format!("session game {game:?}")))?,
        started_at: parse_ts(row.try_get::<&str, _>("started_at")?)?,
        ended_at: parse_opt_ts(row.try_get("ended_at")?)?,
        total_cards: to_u64(row.try_get("total_cards")?),
        unique_cards: to_u64(row.try_get("unique_cards")?),
        decks_opened: to_u64(row.try_get("decks_opened")?),
    })
}

/// A second open session trips the partial unique index.
fn map_insert_error(e: sqlx::Error) -> TrackerError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            TrackerError::Conflict("another session is already active".into())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            TrackerError::NotFound("league for new session".into())
        }
        _ => TrackerError::Storage(e),
    }
}

async fn upsert_card(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    card_name: &str,
    card: &CardCount,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO session_cards (session_id, card_name, count, first_seen) VALUES (?, ?, ?, ?) \
         ON CONFLICT (session_id, card_name) DO UPDATE SET count = excluded.count",
    )
    .bind(session_id)
    .bind(card_name)
    .bind(to_i64(card.count))
    .bind(to_i64(card.first_seen))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn touch(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
        .bind(fmt_ts(now))
        .bind(session_id)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

impl Store {
    /// Persist a freshly started session.
    pub async fn insert_session(&self, session: &Session) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO sessions (id, league_id, started_at, ended_at, decks_opened, last_zone, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(session.league_id)
        .bind(fmt_ts(session.started_at))
        .bind(session.ended_at.map(fmt_ts))
        .bind(to_i64(session.decks_opened))
        .bind(&session.last_zone)
        .bind(fmt_ts(session.started_at))
        .execute(self.pool())
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    /// Write one card's absolute count. Replaying the same write is harmless.
    pub async fn save_card_count(
        &self,
        session_id: &str,
        card_name: &str,
        card: &CardCount,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut tx = self.pool().begin().await?;
        if touch(&mut tx, session_id, now).await? == 0 {
            return Err(TrackerError::NotFound(format!("session {session_id}")));
        }
        upsert_card(&mut tx, session_id, card_name, card).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write the session-level counters (decks opened, last zone).
    pub async fn save_counters(&self, session: &Session, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let res = sqlx::query(
            "UPDATE sessions SET decks_opened = ?, last_zone = ?, updated_at = ? WHERE id = ?",
        )
        .bind(to_i64(session.decks_opened))
        .bind(&session.last_zone)
        .bind(fmt_ts(now))
        .bind(&session.id)
        .execute(self.pool())
        .await?;
        if res.rows_affected() == 0 {
            return Err(TrackerError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    /// Close a session: `ended_at`, counters and every card count land
    /// together or not at all.
    pub async fn finish_session(&self, session: &Session) -> Result<(), TrackerError> {
        let ended_at = session
            .ended_at
            .ok_or_else(|| TrackerError::InvalidInput(format!("session {} has no end time", session.id)))?;

        let mut tx = self.pool().begin().await?;
        let res = sqlx::query(
            "UPDATE sessions SET ended_at = ?, decks_opened = ?, last_zone = ?, updated_at = ? \
             WHERE id = ? AND ended_at IS NULL",
        )
        .bind(fmt_ts(ended_at))
        .bind(to_i64(session.decks_opened))
        .bind(&session.last_zone)
        .bind(fmt_ts(ended_at))
        .bind(&session.id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(TrackerError::Conflict(format!(
                "session {} is not active in the store",
                session.id
            )));
        }
        for (name, card) in &session.cards {
            upsert_card(&mut tx, &session.id, name, card).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn session_exists(&self, id: &str) -> Result<bool, TrackerError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(found.is_some())
    }

    pub async fn load_session(&self, id: &str) -> Result<Option<Session>, TrackerError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => {
                let mut session = session_from_row(&row)?;
                session.cards = self.load_cards(&session.id).await?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// The session left open by a previous run, if any.
    pub async fn load_active_session(&self) -> Result<Option<Session>, TrackerError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM sessions WHERE ended_at IS NULL LIMIT 1")
                .fetch_optional(self.pool())
                .await?;
        match id {
            Some(id) => self.load_session(&id).await,
            None => Ok(None),
        }
    }

    async fn load_cards(&self, session_id: &str) -> Result<BTreeMap<String, CardCount>, TrackerError> {
        let rows = sqlx::query(
            "SELECT card_name, count, first_seen FROM session_cards WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, CardCount), TrackerError> {
                Ok((
                    row.try_get("card_name")?,
                    CardCount {
                        count: to_u64(row.try_get("count")?),
                        first_seen: to_u64(row.try_get("first_seen")?),
                    },
                ))
            })
            .collect()
    }

    /// Sessions matching `filter`, newest first.
    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
        page: Page,
    ) -> Result<Paged<SessionRow>, TrackerError> {
        let page = page.normalized();
        let game = filter.game.map(|g| g.as_str());
        const WHERE: &str = "WHERE (? IS NULL OR s.league_id = ?) \
                             AND (? IS NULL OR l.game = ?) \
                             AND (? = 0 OR s.ended_at IS NULL)";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM sessions s JOIN leagues l ON l.id = s.league_id {WHERE}"
        ))
        .bind(filter.league_id)
        .bind(filter.league_id)
        .bind(game)
        .bind(game)
        .bind(filter.active_only)
        .fetch_one(self.pool())
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT s.id, s.league_id, l.name AS league_name, l.game, s.started_at, s.ended_at, \
                    s.decks_opened, \
                    COALESCE(c.total_cards, 0) AS total_cards, \
                    COALESCE(c.unique_cards, 0) AS unique_cards \
             FROM sessions s \
             JOIN leagues l ON l.id = s.league_id \
             LEFT JOIN ( \
                 SELECT session_id, SUM(count) AS total_cards, COUNT(*) AS unique_cards \
                 FROM session_cards GROUP BY session_id \
             ) c ON c.session_id = s.id \
             {WHERE} \
             ORDER BY s.started_at DESC, s.id DESC \
             LIMIT ? OFFSET ?"
        ))
        .bind(filter.league_id)
        .bind(filter.league_id)
        .bind(game)
        .bind(game)
        .bind(filter.active_only)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await?;

        Ok(Paged {
            items: rows.iter().map(summary_from_row).collect::<Result<_, _>>()?,
            page: page.page,
            per_page: page.per_page,
            total: to_u64(total),
        })
    }

    /// Remove a session and its card rows. Returns false if it did not exist.
    pub async fn delete_session(&self, id: &str) -> Result<bool, TrackerError> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
