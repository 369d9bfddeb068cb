//! Price snapshots. Append-only: rows are inserted once and never updated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use super::{fmt_ts, parse_decimal, parse_ts, Store};
use crate::types::{PriceSnapshot, SnapshotCardPrice, TrackerError};

impl Store {
    /// Persist a new snapshot with all of its card prices in one
    /// transaction and return it with its assigned id.
    pub async fn insert_snapshot(
        &self,
        league_id: i64,
        fetched_at: DateTime<Utc>,
        exchange_divine_rate: Decimal,
        stash_divine_rate: Decimal,
        prices: Vec<SnapshotCardPrice>,
    ) -> Result<PriceSnapshot, TrackerError> {
        let mut tx = self.pool().begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO price_snapshots (league_id, fetched_at, exchange_divine_rate, stash_divine_rate) \
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(league_id)
        .bind(fmt_ts(fetched_at))
        .bind(exchange_divine_rate.to_string())
        .bind(stash_divine_rate.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                TrackerError::NotFound(format!("league {league_id}"))
            }
            _ => TrackerError::Storage(e),
        })?;

        for p in &prices {
            sqlx::query(
                "INSERT INTO snapshot_card_prices \
                 (snapshot_id, card_name, price_source, chaos_value, divine_value, stack_size) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&p.card_name)
            .bind(p.source.as_str())
            .bind(p.chaos_value.to_string())
            .bind(p.divine_value.to_string())
            .bind(p.stack_size.map(i64::from))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(PriceSnapshot::new(
            id,
            league_id,
            fetched_at,
            exchange_divine_rate,
            stash_divine_rate,
            prices,
        ))
    }

    /// Most recently fetched snapshot for a league. Ties on `fetched_at`
    /// go to the later insert.
    pub async fn latest_snapshot(&self, league_id: i64) -> Result<Option<PriceSnapshot>, TrackerError> {
        let head = sqlx::query(
            "SELECT id, fetched_at, exchange_divine_rate, stash_divine_rate FROM price_snapshots \
             WHERE league_id = ? ORDER BY fetched_at DESC, id DESC LIMIT 1",
        )
        .bind(league_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(head) = head else {
            return Ok(None);
        };
        let id: i64 = head.try_get("id")?;

        let rows = sqlx::query(
            "SELECT card_name, price_source, chaos_value, divine_value, stack_size \
             FROM snapshot_card_prices WHERE snapshot_id = ? ORDER BY price_source, card_name",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;

        let mut prices = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.try_get("price_source")?;
            let stack_size: Option<i64> = row.try_get("stack_size")?;
            prices.push(SnapshotCardPrice {
                card_name: row.try_get("card_name")?,
                source: source
                    .parse()
                    .map_err(|_| TrackerError::Corrupt(format!("price source {source:?}")))?,
                chaos_value: parse_decimal(row.try_get("chaos_value")?)?,
                divine_value: parse_decimal(row.try_get("divine_value")?)?,
                stack_size: stack_size.and_then(|n| u32::try_from(n).ok()),
            });
        }

        Ok(Some(PriceSnapshot::new(
            id,
            league_id,
            parse_ts(head.try_get("fetched_at")?)?,
            parse_decimal(head.try_get("exchange_divine_rate")?)?,
            parse_decimal(head.try_get("stash_divine_rate")?)?,
            prices,
        )))
    }

    pub async fn snapshot_count(&self, league_id: i64) -> Result<u64, TrackerError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_snapshots WHERE league_id = ?")
            .bind(league_id)
            .fetch_one(self.pool())
            .await?;
        Ok(super::to_u64(n))
    }
}
