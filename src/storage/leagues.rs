//! League reference data.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{fmt_ts, parse_opt_ts, Store};
use crate::types::{Game, League, LeagueInfo, TrackerError, STANDARD_LEAGUE};

const LEAGUE_COLUMNS: &str = "id, game, name, start_date, end_date";

fn league_from_row(row: &SqliteRow) -> Result<League, TrackerError> {
    let game: String = row.try_get("game")?;
    Ok(League {
        id: row.try_get("id")?,
        game: game
            .parse()
            .map_err(|_| TrackerError::Corrupt(format!("league game {game:?}")))?,
        name: row.try_get("name")?,
        start_date: parse_opt_ts(row.try_get("start_date")?)?,
        end_date: parse_opt_ts(row.try_get("end_date")?)?,
    })
}

impl Store {
    pub async fn get_league(&self, id: i64) -> Result<Option<League>, TrackerError> {
        let row = sqlx::query(&format!("SELECT {LEAGUE_COLUMNS} FROM leagues WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(league_from_row).transpose()
    }

    /// Like [`Store::get_league`] but unknown ids are `NotFound`.
    pub async fn require_league(&self, id: i64) -> Result<League, TrackerError> {
        self.get_league(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("league {id}")))
    }

    pub async fn find_league(&self, game: Game, name: &str) -> Result<Option<League>, TrackerError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAGUE_COLUMNS} FROM leagues WHERE game = ? AND name = ?"
        ))
        .bind(game.as_str())
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(league_from_row).transpose()
    }

    /// The game's permanent league. Seeded by migration, so its absence
    /// means the store is broken.
    pub async fn standard_league(&self, game: Game) -> Result<League, TrackerError> {
        self.find_league(game, STANDARD_LEAGUE)
            .await?
            .ok_or_else(|| TrackerError::Corrupt(format!("missing {STANDARD_LEAGUE} league for {game}")))
    }

    /// Leagues of a game: running ones first, then most recently started.
    pub async fn list_leagues(&self, game: Game) -> Result<Vec<League>, TrackerError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAGUE_COLUMNS} FROM leagues WHERE game = ? \
             ORDER BY (end_date IS NOT NULL), start_date DESC, name"
        ))
        .bind(game.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(league_from_row).collect()
    }

    /// Insert or refresh a league by (game, name). A known start date is
    /// never cleared by a feed that omits it.
    pub async fn upsert_league(&self, game: Game, info: &LeagueInfo) -> Result<League, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO leagues (game, name, start_date, end_date) VALUES (?, ?, ?, ?) \
             ON CONFLICT (game, name) DO UPDATE SET \
                start_date = COALESCE(excluded.start_date, leagues.start_date), \
                end_date = excluded.end_date \
             RETURNING id",
        )
        .bind(game.as_str())
        .bind(&info.name)
        .bind(info.start_date.map(fmt_ts))
        .bind(info.end_date.map(fmt_ts))
        .fetch_one(self.pool())
        .await?;
        self.require_league(id).await
    }

    /// Mark leagues that no longer appear in the feed as ended at `now`.
    /// Standard never ends. Returns how many rows changed.
    pub async fn end_leagues_not_in(
        &self,
        game: Game,
        current: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64, TrackerError> {
        let mut ended = 0;
        for league in self.list_leagues(game).await? {
            if league.end_date.is_some() || league.is_standard() || current.contains(&league.name) {
                continue;
            }
            let res = sqlx::query("UPDATE leagues SET end_date = ? WHERE id = ?")
                .bind(fmt_ts(now))
                .bind(league.id)
                .execute(self.pool())
                .await?;
            ended += res.rows_affected();
        }
        Ok(ended)
    }
}
