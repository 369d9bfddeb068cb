//! Persistence layer.
//!
//! An embedded SQLite database holds leagues, sessions and their card
//! counts, price snapshots, per-card visibility flags and the migration
//! ledger. All access goes through [`Store`], a cheap-to-clone handle
//! around a `sqlx` connection pool.
//!
//! Timestamps are stored as RFC 3339 text with a fixed precision so that
//! lexical order is chronological. Money values are stored as decimal
//! text so they round-trip exactly.

pub mod leagues;
pub mod migrations;
pub mod prices;
pub mod sessions;
pub mod stats;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::types::TrackerError;

/// Handle to the embedded store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file. Does not migrate.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %path.as_ref().display(), "Store opened");
        Ok(Self { pool })
    }

    /// A private in-memory database. One connection, kept alive for the
    /// lifetime of the pool, since every new connection would see an
    /// empty database.
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Open the database and bring its schema up to date. The store is not
    /// returned unless every pending migration succeeded.
    pub async fn open_migrated(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let store = Self::open(path).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Apply all pending migrations.
    pub async fn migrate(&self) -> Result<Vec<&'static str>, TrackerError> {
        migrations::apply_pending_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrackerError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, TrackerError> {
    raw.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, TrackerError> {
    Decimal::from_str(raw).map_err(|e| TrackerError::Corrupt(format!("decimal {raw:?}: {e}")))
}

pub(crate) fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

pub(crate) fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timestamp_codec_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let a = fmt_ts(Utc::now());
        let b = fmt_ts(Utc::now() + chrono::Duration::milliseconds(5));
        assert!(a < b);
    }

    #[test]
    fn test_decimal_codec_is_exact() {
        assert_eq!(parse_decimal(&dec!(0.1).to_string()).unwrap(), dec!(0.1));
        assert!(parse_decimal("ten").is_err());
    }

    #[tokio::test]
    async fn test_open_file_store_and_migrate() {
        let mut path = std::env::temp_dir();
        path.push(format!("divtrack_store_{}.db", uuid::Uuid::new_v4()));
        let store = Store::open_migrated(&path).await.unwrap();
        let applied = store.migrate().await.unwrap();
        assert!(applied.is_empty(), "second migrate should be a no-op");
        store.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
