//! Versioned schema migrations.
//!
//! Every migration is a static description: a sortable, timestamp-prefixed
//! id plus lists of `up` and `down` steps. Each step knows how to tell
//! whether its change is already present, and is skipped if so, which
//! makes re-running a half-applied migration safe.
//!
//! The runner applies, in ascending id order, every migration whose id is
//! greater than the highest id in the `_migrations` ledger. Each migration
//! and its ledger row commit in one transaction. `down` steps only run
//! through an explicit [`rollback`].

use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::fmt_ts;
use crate::types::TrackerError;

// ---------------------------------------------------------------------------
// Description types
// ---------------------------------------------------------------------------

/// One idempotent schema change.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// `sql` must be a single `CREATE TABLE <name> (...)` statement.
    CreateTable { name: &'static str, sql: &'static str },
    /// `sql` must be a single `CREATE [UNIQUE] INDEX <name> ...` statement.
    CreateIndex { name: &'static str, sql: &'static str },
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    /// Reference data. The statement itself must tolerate re-runs
    /// (e.g. `INSERT OR IGNORE`).
    Seed { sql: &'static str },
    DropTable { name: &'static str },
    DropIndex { name: &'static str },
    DropColumn { table: &'static str, column: &'static str },
}

/// A named, ordered schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub name: &'static str,
    pub up: &'static [Step],
    pub down: &'static [Step],
}

// ---------------------------------------------------------------------------
// Schema history
// ---------------------------------------------------------------------------

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        id: "20240101120000",
        name: "create_leagues",
        up: &[
            Step::CreateTable {
                name: "leagues",
                sql: "CREATE TABLE leagues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    game TEXT NOT NULL,
                    name TEXT NOT NULL,
                    start_date TEXT,
                    end_date TEXT,
                    UNIQUE (game, name)
                )",
            },
            Step::Seed {
                sql: "INSERT OR IGNORE INTO leagues (game, name) VALUES ('poe1', 'Standard'), ('poe2', 'Standard')",
            },
        ],
        down: &[Step::DropTable { name: "leagues" }],
    },
    Migration {
        id: "20240101120100",
        name: "create_sessions",
        up: &[
            Step::CreateTable {
                name: "sessions",
                sql: "CREATE TABLE sessions (
                    id TEXT PRIMARY KEY,
                    league_id INTEGER NOT NULL REFERENCES leagues(id),
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    decks_opened INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                )",
            },
            Step::CreateTable {
                name: "session_cards",
                sql: "CREATE TABLE session_cards (
                    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    card_name TEXT NOT NULL,
                    count INTEGER NOT NULL DEFAULT 0,
                    first_seen INTEGER NOT NULL,
                    PRIMARY KEY (session_id, card_name)
                )",
            },
            Step::CreateIndex {
                name: "idx_sessions_single_active",
                sql: "CREATE UNIQUE INDEX idx_sessions_single_active ON sessions ((ended_at IS NULL)) WHERE ended_at IS NULL",
            },
            Step::CreateIndex {
                name: "idx_sessions_league_started",
                sql: "CREATE INDEX idx_sessions_league_started ON sessions (league_id, started_at DESC)",
            },
        ],
        down: &[
            Step::DropIndex { name: "idx_sessions_league_started" },
            Step::DropIndex { name: "idx_sessions_single_active" },
            Step::DropTable { name: "session_cards" },
            Step::DropTable { name: "sessions" },
        ],
    },
    Migration {
        id: "20240101120200",
        name: "create_price_snapshots",
        up: &[
            Step::CreateTable {
                name: "price_snapshots",
                sql: "CREATE TABLE price_snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    league_id INTEGER NOT NULL REFERENCES leagues(id),
                    fetched_at TEXT NOT NULL,
                    exchange_divine_rate TEXT NOT NULL,
                    stash_divine_rate TEXT NOT NULL
                )",
            },
            Step::CreateTable {
                name: "snapshot_card_prices",
                sql: "CREATE TABLE snapshot_card_prices (
                    snapshot_id INTEGER NOT NULL REFERENCES price_snapshots(id) ON DELETE CASCADE,
                    card_name TEXT NOT NULL,
                    price_source TEXT NOT NULL CHECK (price_source IN ('exchange', 'stash')),
                    chaos_value TEXT NOT NULL,
                    divine_value TEXT NOT NULL,
                    stack_size INTEGER,
                    PRIMARY KEY (snapshot_id, card_name, price_source)
                )",
            },
            Step::CreateIndex {
                name: "idx_price_snapshots_league_fetched",
                sql: "CREATE INDEX idx_price_snapshots_league_fetched ON price_snapshots (league_id, fetched_at DESC, id DESC)",
            },
        ],
        down: &[
            Step::DropIndex { name: "idx_price_snapshots_league_fetched" },
            Step::DropTable { name: "snapshot_card_prices" },
            Step::DropTable { name: "price_snapshots" },
        ],
    },
    Migration {
        id: "20240315090000",
        name: "create_card_settings",
        up: &[Step::CreateTable {
            name: "card_settings",
            sql: "CREATE TABLE card_settings (
                game TEXT NOT NULL,
                card_name TEXT NOT NULL,
                hidden_from_calculation INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (game, card_name)
            )",
        }],
        down: &[Step::DropTable { name: "card_settings" }],
    },
    Migration {
        id: "20240610180000",
        name: "add_session_last_zone",
        up: &[Step::AddColumn {
            table: "sessions",
            column: "last_zone",
            definition: "TEXT",
        }],
        down: &[Step::DropColumn {
            table: "sessions",
            column: "last_zone",
        }],
    },
];

// ---------------------------------------------------------------------------
// Step checks & application
// ---------------------------------------------------------------------------

async fn object_exists(
    conn: &mut SqliteConnection,
    kind: &str,
    name: &str,
) -> Result<bool, sqlx::Error> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = ? AND name = ?")
        .bind(kind)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(n > 0)
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
        .bind(table)
        .bind(column)
        .fetch_one(&mut *conn)
        .await?;
    Ok(n > 0)
}

impl Step {
    /// Whether the change this step makes is already in place.
    pub async fn is_applied(&self, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
        match *self {
            Step::CreateTable { name, .. } => object_exists(conn, "table", name).await,
            Step::CreateIndex { name, .. } => object_exists(conn, "index", name).await,
            Step::AddColumn { table, column, .. } => column_exists(conn, table, column).await,
            Step::Seed { .. } => Ok(false),
            Step::DropTable { name } => Ok(!object_exists(conn, "table", name).await?),
            Step::DropIndex { name } => Ok(!object_exists(conn, "index", name).await?),
            Step::DropColumn { table, column } => Ok(!column_exists(conn, table, column).await?),
        }
    }

    pub async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        let sql = match *self {
            Step::CreateTable { sql, .. } | Step::CreateIndex { sql, .. } | Step::Seed { sql } => {
                sql.to_string()
            }
            Step::AddColumn { table, column, definition } => {
                format!("ALTER TABLE {table} ADD COLUMN {column} {definition}")
            }
            Step::DropTable { name } => format!("DROP TABLE {name}"),
            Step::DropIndex { name } => format!("DROP INDEX {name}"),
            Step::DropColumn { table, column } => format!("ALTER TABLE {table} DROP COLUMN {column}"),
        };
        sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            Step::CreateTable { name, .. } => format!("create table {name}"),
            Step::CreateIndex { name, .. } => format!("create index {name}"),
            Step::AddColumn { table, column, .. } => format!("add column {table}.{column}"),
            Step::Seed { .. } => "seed".to_string(),
            Step::DropTable { name } => format!("drop table {name}"),
            Step::DropIndex { name } => format!("drop index {name}"),
            Step::DropColumn { table, column } => format!("drop column {table}.{column}"),
        }
    }
}

async fn run_steps(conn: &mut SqliteConnection, steps: &[Step]) -> Result<(), sqlx::Error> {
    for step in steps {
        if step.is_applied(conn).await? {
            debug!(step = %step.describe(), "Step already applied, skipping");
            continue;
        }
        step.apply(conn).await?;
        debug!(step = %step.describe(), "Step applied");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

async fn ensure_ledger(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Ids recorded in the ledger, ascending.
pub async fn applied_ids(pool: &SqlitePool) -> Result<Vec<String>, TrackerError> {
    ensure_ledger(pool).await?;
    let ids = sqlx::query_scalar("SELECT id FROM _migrations ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Apply every pending migration from the built-in history.
pub async fn apply_pending_migrations(pool: &SqlitePool) -> Result<Vec<&'static str>, TrackerError> {
    apply_migrations(pool, MIGRATIONS).await
}

/// Apply every migration in `history` newer than the ledger's highest id.
/// Returns the ids applied by this call. Stops at the first failure.
pub async fn apply_migrations(
    pool: &SqlitePool,
    history: &'static [Migration],
) -> Result<Vec<&'static str>, TrackerError> {
    let ledger_err = |e: sqlx::Error| TrackerError::Migration {
        id: "_migrations".to_string(),
        message: e.to_string(),
    };

    ensure_ledger(pool).await.map_err(ledger_err)?;
    let latest: Option<String> = sqlx::query_scalar("SELECT MAX(id) FROM _migrations")
        .fetch_one(pool)
        .await
        .map_err(ledger_err)?;

    let mut pending: Vec<&Migration> = history
        .iter()
        .filter(|m| latest.as_deref().map_or(true, |l| m.id > l))
        .collect();
    pending.sort_by_key(|m| m.id);

    if pending.is_empty() {
        debug!(latest = ?latest, "Schema up to date");
        return Ok(Vec::new());
    }

    info!(
        latest = ?latest,
        pending = pending.len(),
        "Applying schema migrations"
    );

    let mut applied = Vec::with_capacity(pending.len());
    for migration in pending {
        apply_one(pool, migration).await.map_err(|e| {
            warn!(id = migration.id, name = migration.name, error = %e, "Migration failed");
            TrackerError::Migration {
                id: migration.id.to_string(),
                message: e.to_string(),
            }
        })?;
        info!(id = migration.id, name = migration.name, "Migration applied");
        applied.push(migration.id);
    }
    Ok(applied)
}

async fn apply_one(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    run_steps(&mut tx, migration.up).await?;
    sqlx::query("INSERT OR REPLACE INTO _migrations (id, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.id)
        .bind(migration.name)
        .bind(fmt_ts(Utc::now()))
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

/// Undo the newest applied migration from the built-in history and drop
/// its ledger row. Only the ledger's highest id can be rolled back, since
/// pending detection only looks above that id.
pub async fn rollback(pool: &SqlitePool, id: &str) -> Result<(), TrackerError> {
    rollback_in(pool, MIGRATIONS, id).await
}

pub async fn rollback_in(
    pool: &SqlitePool,
    history: &'static [Migration],
    id: &str,
) -> Result<(), TrackerError> {
    let migration = history
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| TrackerError::NotFound(format!("migration {id}")))?;

    ensure_ledger(pool).await?;
    let latest: Option<String> = sqlx::query_scalar("SELECT MAX(id) FROM _migrations")
        .fetch_one(pool)
        .await?;
    match latest.as_deref() {
        Some(l) if l == migration.id => {}
        Some(l) => {
            return Err(TrackerError::Conflict(format!(
                "migration {id} is not the latest applied ({l})"
            )))
        }
        None => return Err(TrackerError::NotFound(format!("migration {id} is not applied"))),
    }

    undo_one(pool, migration)
        .await
        .map_err(|e| TrackerError::Migration {
            id: migration.id.to_string(),
            message: e.to_string(),
        })?;
    info!(id = migration.id, name = migration.name, "Migration rolled back");
    Ok(())
}

async fn undo_one(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    run_steps(&mut tx, migration.down).await?;
    sqlx::query("DELETE FROM _migrations WHERE id = ?")
        .bind(migration.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
