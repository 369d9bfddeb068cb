//! Price refreshes and valuation of tracked cards.

use rust_decimal_macros::dec;

use divtrack::types::{CardValue, Game, PriceSource, TrackerError};

use crate::harness::{Harness, TempDir};
use crate::mock_feeds::{exchange_row, stash_row};

async fn session_with_drops(h: &Harness) -> i64 {
    let standard = h.store.standard_league(Game::Poe1).await.unwrap();
    h.tracker.start_session(standard.id).await.unwrap();
    h.write_log(&[
        "Card drop: The Doctor",
        "Card drop: Rain of Chaos",
        "Card drop: House of Mirrors",
        "Card drop: A Card Nobody Prices",
    ]);
    h.wait_for_cards(4).await;
    standard.id
}

fn seed_prices(h: &Harness) {
    h.exchange
        .set_rows(vec![exchange_row("The Doctor", 1200.0), exchange_row("Rain of Chaos", 1.0)]);
    h.stash
        .set_rows(vec![stash_row("Rain of Chaos", 0.5), stash_row("House of Mirrors", 9000.0)]);
}

#[tokio::test]
async fn test_refresh_values_session_with_fallback() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;
    let league_id = session_with_drops(&h).await;
    seed_prices(&h);

    let snapshot = h.tracker.refresh_prices(league_id).await.unwrap();
    assert_eq!(snapshot.len_for(PriceSource::Exchange), 2);
    assert_eq!(snapshot.len_for(PriceSource::Stash), 2);
    assert_eq!(snapshot.exchange_divine_rate, dec!(150));
    assert_eq!(h.exchange.calls(), vec![(Game::Poe1, "Standard".to_string())]);

    let view = h.tracker.get_active_session_snapshot().await.unwrap();
    let summary = view.summary.unwrap();
    assert_eq!(summary.snapshot_id, Some(snapshot.id));
    assert_eq!(summary.total_cards, 4);
    assert_eq!(summary.total_chaos, dec!(10201));
    assert_eq!(summary.unpriced, vec!["A Card Nobody Prices".to_string()]);

    let best = summary.most_valuable.unwrap();
    assert_eq!(best.name, "House of Mirrors");
    assert!(matches!(
        best.value,
        CardValue::Priced { source: PriceSource::Stash, fell_back: true, .. }
    ));

    h.tracker.set_price_source(PriceSource::Stash).await;
    let summary = h.tracker.get_active_session_snapshot().await.unwrap().summary.unwrap();
    assert_eq!(summary.price_source, PriceSource::Stash);
    assert_eq!(summary.total_chaos, dec!(10200.5));

    h.shutdown().await;
}

#[tokio::test]
async fn test_failed_source_keeps_previous_snapshot() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;
    let league_id = session_with_drops(&h).await;
    seed_prices(&h);

    let first = h.tracker.refresh_prices(league_id).await.unwrap();

    h.stash.set_error("503 Service Unavailable");
    h.exchange.set_rows(vec![exchange_row("The Doctor", 1500.0)]);
    let err = h.tracker.refresh_prices(league_id).await.unwrap_err();
    assert!(matches!(err, TrackerError::TransientFetch { .. }));
    assert!(err.is_retryable());

    assert_eq!(h.store.snapshot_count(league_id).await.unwrap(), 1);
    let latest = h.tracker.get_latest_price_snapshot(league_id).await.unwrap().unwrap();
    assert_eq!(latest.id, first.id);
    assert_eq!(latest.price("The Doctor", PriceSource::Exchange).unwrap().chaos_value, dec!(1200));

    h.stash.clear_error();
    let second = h.tracker.refresh_prices(league_id).await.unwrap();
    assert!(second.id > first.id);
    let latest = h.tracker.get_latest_price_snapshot(league_id).await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    assert_eq!(latest.price("The Doctor", PriceSource::Exchange).unwrap().chaos_value, dec!(1500));

    h.shutdown().await;
}

#[tokio::test]
async fn test_hidden_cards_are_counted_but_not_valued() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;
    let league_id = session_with_drops(&h).await;
    seed_prices(&h);
    h.tracker.refresh_prices(league_id).await.unwrap();

    h.tracker
        .set_card_hidden(Game::Poe1, "House of Mirrors", true)
        .await
        .unwrap();

    let summary = h.tracker.get_active_session_snapshot().await.unwrap().summary.unwrap();
    assert_eq!(summary.total_cards, 4);
    assert_eq!(summary.total_chaos, dec!(1201));
    assert_eq!(summary.most_valuable.unwrap().name, "The Doctor");
    assert!(summary.cards.iter().any(|c| c.name == "House of Mirrors" && c.hidden));

    h.shutdown().await;
}

#[tokio::test]
async fn test_latest_snapshot_survives_restart() {
    let dir = TempDir::new();

    let first = Harness::start(&dir).await;
    let standard = first.store.standard_league(Game::Poe1).await.unwrap();
    seed_prices(&first);
    let snapshot = first.tracker.refresh_prices(standard.id).await.unwrap();
    first.shutdown().await;

    let second = Harness::start(&dir).await;
    let latest = second
        .tracker
        .get_latest_price_snapshot(standard.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, snapshot.id);
    assert_eq!(latest.prices.len(), 4);
    assert_eq!(
        latest.value_of("Rain of Chaos", PriceSource::Stash).chaos(),
        Some(dec!(0.5))
    );

    second.shutdown().await;
}
