//! Client log → session → store, across restarts.

use divtrack::types::{Game, Page, SessionFilter, StatsScope, TrackerError};

use crate::harness::{Harness, TempDir};

#[tokio::test]
async fn test_log_lines_drive_a_session_end_to_end() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;
    h.tracker.sync_leagues(Game::Poe1).await.unwrap();

    h.write_log(&["Current league: Settlers"]);
    h.wait_for_league("Settlers").await;

    let session = h.tracker.start_session_in_selected_league().await.unwrap();
    let settlers = h.store.find_league(Game::Poe1, "Settlers").await.unwrap().unwrap();
    assert_eq!(session.league_id, settlers.id);

    h.write_log(&[
        "You have entered Lioneye's Watch.",
        "Card drop: The Doctor",
        "Some unrelated chatter",
        "Card drop: Rain of Chaos x8",
        "Card drop: Rain of Chaos",
        "Card drop: Stacked Deck opened",
    ]);
    h.wait_for_cards(3).await;
    h.wait_for_decks(1).await;

    let active = h.tracker.sessions().active_session().await.unwrap();
    assert_eq!(active.count_of("The Doctor"), 1);
    assert_eq!(active.count_of("Rain of Chaos"), 2);
    assert_eq!(active.cards["The Doctor"].first_seen, 0);
    assert_eq!(active.cards["Rain of Chaos"].first_seen, 1);
    assert_eq!(active.last_zone.as_deref(), Some("Lioneye's Watch"));

    // Counts are persisted as they arrive, before the session ends.
    let stored = h.store.load_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.total_cards(), 3);

    let ended = h.tracker.stop_session().await.unwrap();
    assert!(ended.ended_at.is_some());

    let page = h
        .tracker
        .list_sessions(&SessionFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    let row = &page.items[0];
    assert_eq!(row.id, session.id);
    assert_eq!(row.league_name, "Settlers");
    assert_eq!(row.total_cards, 3);
    assert_eq!(row.unique_cards, 2);
    assert_eq!(row.decks_opened, 1);
    assert!(row.ended_at.is_some());

    let stats = h
        .tracker
        .get_card_stats(&StatsScope::League { league_id: settlers.id })
        .await
        .unwrap();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.session_count, 1);
    assert_eq!(stats.cards["Rain of Chaos"], 2);

    h.shutdown().await;
}

#[tokio::test]
async fn test_drops_without_a_session_are_not_counted() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;

    h.write_log(&["Card drop: The Doctor", "Current league: Settlers"]);
    h.wait_for_league("Settlers").await;

    // Settlers was never synced; starting in it registers it.
    let session = h.tracker.start_session_in_selected_league().await.unwrap();
    assert_eq!(session.total_cards(), 0);
    let settlers = h.store.find_league(Game::Poe1, "Settlers").await.unwrap().unwrap();
    assert_eq!(session.league_id, settlers.id);

    let stats = h
        .tracker
        .get_card_stats(&StatsScope::AllTime { game: Game::Poe1 })
        .await
        .unwrap();
    assert_eq!(stats.total_count, 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_open_session_resumes_after_restart() {
    let dir = TempDir::new();

    let first = Harness::start(&dir).await;
    let standard = first.store.standard_league(Game::Poe1).await.unwrap();
    let session = first.tracker.start_session(standard.id).await.unwrap();
    first.write_log(&["Card drop: The Fiend", "Card drop: The Fiend"]);
    first.wait_for_cards(2).await;
    first.shutdown().await;

    let second = Harness::start(&dir).await;
    let resumed = second.tracker.sessions().active_session().await.unwrap();
    assert_eq!(resumed.id, session.id);
    assert_eq!(resumed.count_of("The Fiend"), 2);

    // Lines written before the restart are not replayed.
    second.write_log(&["Card drop: The Fiend"]);
    second.wait_for_cards(3).await;
    assert_eq!(
        second.tracker.sessions().active_session().await.unwrap().count_of("The Fiend"),
        3
    );

    let err = second.tracker.start_session(standard.id).await.unwrap_err();
    assert!(matches!(err, TrackerError::Conflict(_)));

    second.tracker.stop_session().await.unwrap();
    let stored = second.store.load_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.count_of("The Fiend"), 3);
    assert!(stored.ended_at.is_some());

    second.shutdown().await;
}

#[tokio::test]
async fn test_ended_league_falls_back_to_standard() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;

    h.tracker.sync_leagues(Game::Poe1).await.unwrap();
    let settlers = h.store.find_league(Game::Poe1, "Settlers").await.unwrap().unwrap();

    h.leagues.set(&["Standard"]);
    let sync = h.tracker.sync_leagues(Game::Poe1).await.unwrap();
    assert_eq!(sync.ended, 1);

    let session = h.tracker.start_session(settlers.id).await.unwrap();
    let standard = h.store.standard_league(Game::Poe1).await.unwrap();
    assert_eq!(session.league_id, standard.id);

    // The ended league is kept.
    let leagues = h.tracker.list_leagues(Game::Poe1).await.unwrap();
    assert!(leagues.iter().any(|l| l.name == "Settlers" && l.end_date.is_some()));

    h.shutdown().await;
}

#[tokio::test]
async fn test_delete_session_rules() {
    let dir = TempDir::new();
    let h = Harness::start(&dir).await;
    let standard = h.store.standard_league(Game::Poe1).await.unwrap();

    let session = h.tracker.start_session(standard.id).await.unwrap();
    h.write_log(&["Card drop: Humility"]);
    h.wait_for_cards(1).await;

    let err = h.tracker.delete_session(&session.id).await.unwrap_err();
    assert!(matches!(err, TrackerError::Conflict(_)));

    h.tracker.stop_session().await.unwrap();
    h.tracker.delete_session(&session.id).await.unwrap();
    assert!(h.store.load_session(&session.id).await.unwrap().is_none());

    let err = h.tracker.delete_session(&session.id).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)));

    let stats = h
        .tracker
        .get_card_stats(&StatsScope::AllTime { game: Game::Poe1 })
        .await
        .unwrap();
    assert_eq!(stats.total_count, 0);

    h.shutdown().await;
}
