//! Price snapshot manager.
//!
//! A refresh fetches both price sources for a league concurrently, each
//! bounded by its own timeout, normalizes them into one row set and appends
//! a new snapshot. If either source fails nothing is written and the
//! previous snapshot stays the latest.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::feeds::{normalize, PriceFeed, RawPriceList};
use crate::storage::Store;
use crate::types::{Game, PriceSnapshot, TrackerError};

pub struct PriceSnapshotManager {
    store: Store,
    exchange: Arc<dyn PriceFeed>,
    stash: Arc<dyn PriceFeed>,
    fetch_timeout: Duration,
    latest: RwLock<HashMap<i64, PriceSnapshot>>,
}

impl PriceSnapshotManager {
    pub fn new(
        store: Store,
        exchange: Arc<dyn PriceFeed>,
        stash: Arc<dyn PriceFeed>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            exchange,
            stash,
            fetch_timeout,
            latest: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch_one(
        &self,
        feed: &dyn PriceFeed,
        game: Game,
        league: &str,
    ) -> Result<RawPriceList, TrackerError> {
        match tokio::time::timeout(self.fetch_timeout, feed.fetch(game, league)).await {
            Ok(result) => result,
            Err(_) => Err(TrackerError::transient(
                feed.source().as_str(),
                format!("timed out after {:?}", self.fetch_timeout),
            )),
        }
    }

    /// Fetch both sources and append a new snapshot for `league_id`.
    pub async fn refresh(&self, league_id: i64) -> Result<PriceSnapshot, TrackerError> {
        let league = self.store.require_league(league_id).await?;

        let (exchange, stash) = tokio::join!(
            self.fetch_one(self.exchange.as_ref(), league.game, &league.name),
            self.fetch_one(self.stash.as_ref(), league.game, &league.name),
        );
        let (exchange, stash) = match (exchange, stash) {
            (Ok(e), Ok(s)) => (e, s),
            (Err(e), _) | (_, Err(e)) => {
                warn!(league = %league.name, error = %e, "Price refresh failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let mut prices = normalize(&exchange);
        prices.extend(normalize(&stash));

        let snapshot = self
            .store
            .insert_snapshot(
                league.id,
                Utc::now(),
                exchange.divine_rate,
                stash.divine_rate,
                prices,
            )
            .await?;

        info!(
            league = %league.name,
            snapshot = snapshot.id,
            exchange_rows = snapshot.len_for(crate::types::PriceSource::Exchange),
            stash_rows = snapshot.len_for(crate::types::PriceSource::Stash),
            "Price snapshot stored"
        );

        let mut cache = self.latest.write().await;
        let newer = cache.get(&league.id).map_or(true, |cur| {
            (snapshot.fetched_at, snapshot.id) >= (cur.fetched_at, cur.id)
        });
        if newer {
            cache.insert(league.id, snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Most recent snapshot for a league, loading it from the store on a
    /// cache miss.
    pub async fn latest(&self, league_id: i64) -> Result<Option<PriceSnapshot>, TrackerError> {
        if let Some(s) = self.latest.read().await.get(&league_id) {
            return Ok(Some(s.clone()));
        }
        let loaded = self.store.latest_snapshot(league_id).await?;
        if let Some(s) = &loaded {
            self.latest.write().await.entry(league_id).or_insert_with(|| s.clone());
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{MockPriceFeed, RawPriceRow};
    use crate::types::{CardValue, PriceSource};
    use rust_decimal_macros::dec;

    async fn store() -> (Store, i64) {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let id = store.standard_league(Game::Poe1).await.unwrap().id;
        (store, id)
    }

    fn exchange_feed(rows: Vec<RawPriceRow>) -> MockPriceFeed {
        let mut feed = MockPriceFeed::new();
        feed.expect_source().return_const(PriceSource::Exchange);
        feed.expect_fetch().returning(move |_, _| {
            Ok(RawPriceList {
                divine_rate: dec!(200),
                rows: rows.clone(),
            })
        });
        feed
    }

    fn stash_feed(rows: Vec<RawPriceRow>) -> MockPriceFeed {
        let mut feed = MockPriceFeed::new();
        feed.expect_source().return_const(PriceSource::Stash);
        feed.expect_fetch().returning(move |_, _| {
            Ok(RawPriceList {
                divine_rate: dec!(190),
                rows: rows.clone(),
            })
        });
        feed
    }

    fn failing_feed(source: PriceSource) -> MockPriceFeed {
        let mut feed = MockPriceFeed::new();
        feed.expect_source().return_const(source);
        feed.expect_fetch()
            .returning(move |_, _| Err(TrackerError::transient(source.as_str(), "connection refused")));
        feed
    }

    fn stash_row(name: &str, chaos: f64) -> RawPriceRow {
        RawPriceRow::Stash {
            name: name.into(),
            chaos_value: chaos,
            divine_value: None,
            stack_size: None,
        }
    }

    #[tokio::test]
    async fn test_refresh_merges_both_sources() {
        let (store, league) = store().await;
        let mgr = PriceSnapshotManager::new(
            store,
            Arc::new(exchange_feed(vec![RawPriceRow::Exchange {
                name: "The Fool".into(),
                chaos_value: 10.0,
            }])),
            Arc::new(stash_feed(vec![stash_row("The Fool", 12.0), stash_row("Her Mask", 1.0)])),
            Duration::from_secs(5),
        );

        let snap = mgr.refresh(league).await.unwrap();
        assert_eq!(snap.exchange_divine_rate, dec!(200));
        assert_eq!(snap.stash_divine_rate, dec!(190));
        assert_eq!(snap.len_for(PriceSource::Exchange), 1);
        assert_eq!(snap.len_for(PriceSource::Stash), 2);
        // Only in stash, still priced when exchange is selected.
        assert!(matches!(
            snap.value_of("Her Mask", PriceSource::Exchange),
            CardValue::Priced { source: PriceSource::Stash, fell_back: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_two_refreshes_two_snapshots_latest_is_second() {
        let (store, league) = store().await;
        let mgr = PriceSnapshotManager::new(
            store.clone(),
            Arc::new(exchange_feed(vec![])),
            Arc::new(stash_feed(vec![stash_row("The Fool", 12.0)])),
            Duration::from_secs(5),
        );
        let first = mgr.refresh(league).await.unwrap();
        let second = mgr.refresh(league).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(mgr.latest(league).await.unwrap().unwrap().id, second.id);
        assert_eq!(store.latest_snapshot(league).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_failed_source_keeps_previous_snapshot() {
        let (store, league) = store().await;
        let good = PriceSnapshotManager::new(
            store.clone(),
            Arc::new(exchange_feed(vec![])),
            Arc::new(stash_feed(vec![stash_row("The Fool", 12.0)])),
            Duration::from_secs(5),
        );
        let kept = good.refresh(league).await.unwrap();

        let bad = PriceSnapshotManager::new(
            store.clone(),
            Arc::new(exchange_feed(vec![])),
            Arc::new(failing_feed(PriceSource::Stash)),
            Duration::from_secs(5),
        );
        let err = bad.refresh(league).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(bad.latest(league).await.unwrap().unwrap().id, kept.id);
        assert_eq!(store.snapshot_count(league).await.unwrap(), 1);
    }

    struct SlowFeed;

    #[async_trait::async_trait]
    impl PriceFeed for SlowFeed {
        fn source(&self) -> PriceSource {
            PriceSource::Exchange
        }

        async fn fetch(&self, _game: Game, _league: &str) -> Result<RawPriceList, TrackerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawPriceList {
                divine_rate: dec!(1),
                rows: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_stalled_source_times_out() {
        let (store, league) = store().await;
        let mgr = PriceSnapshotManager::new(
            store,
            Arc::new(SlowFeed),
            Arc::new(stash_feed(vec![])),
            Duration::from_millis(50),
        );
        let err = mgr.refresh(league).await.unwrap_err();
        assert!(matches!(err, TrackerError::TransientFetch { ref source_name, .. } if source_name == "exchange"));
        assert!(mgr.latest(league).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_league() {
        let (store, _) = store().await;
        let mgr = PriceSnapshotManager::new(
            store,
            Arc::new(MockPriceFeed::new()),
            Arc::new(MockPriceFeed::new()),
            Duration::from_secs(1),
        );
        assert!(matches!(mgr.refresh(999).await, Err(TrackerError::NotFound(_))));
    }
}
