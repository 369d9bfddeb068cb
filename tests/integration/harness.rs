//! Wiring shared by the integration tests: the same components the binary
//! builds, over a throwaway directory.

use rust_decimal_macros::dec;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use divtrack::engine::snapshots::PriceSnapshotManager;
use divtrack::engine::tracker::{spawn_event_pump, SessionTracker};
use divtrack::logs::{self, LogTail};
use divtrack::service::Tracker;
use divtrack::storage::Store;
use divtrack::types::{Game, PriceSource};

use crate::mock_feeds::{StaticLeagueFeed, StaticPriceFeed};

/// A directory removed when dropped.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("divtrack_it_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub struct Harness {
    pub store: Store,
    pub tracker: Arc<Tracker>,
    pub exchange: Arc<StaticPriceFeed>,
    pub stash: Arc<StaticPriceFeed>,
    pub leagues: Arc<StaticLeagueFeed>,
    log_path: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Build the full pipeline over `dir`, tailing `Client.txt` from its
    /// current end.
    pub async fn start(dir: &TempDir) -> Self {
        let log_path = dir.path().join("Client.txt");
        let store = Store::open_migrated(dir.path().join("divtrack.db")).await.unwrap();

        let sessions = Arc::new(SessionTracker::new(store.clone(), Game::Poe1, "Standard").await.unwrap());
        let exchange = StaticPriceFeed::new(PriceSource::Exchange, dec!(150), Vec::new());
        let stash = StaticPriceFeed::new(PriceSource::Stash, dec!(160), Vec::new());
        let leagues = StaticLeagueFeed::new(&["Settlers", "Standard"]);

        let prices = Arc::new(PriceSnapshotManager::new(
            store.clone(),
            exchange.clone(),
            stash.clone(),
            Duration::from_secs(2),
        ));
        let tracker = Arc::new(Tracker::new(
            store.clone(),
            sessions.clone(),
            prices,
            Some(leagues.clone()),
            PriceSource::Exchange,
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let tail = logs::spawn_tail(LogTail::open(&log_path), Duration::from_millis(10), tx);
        let pump = spawn_event_pump(rx, sessions);

        Self {
            store,
            tracker,
            exchange,
            stash,
            leagues,
            log_path,
            tasks: vec![tail, pump],
        }
    }

    /// Append client log messages, each wrapped in a realistic line header.
    pub fn write_log(&self, messages: &[&str]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .unwrap();
        for m in messages {
            writeln!(f, "2024/07/23 19:04:11 123456789 cffb0719 [INFO Client 1234] : {m}").unwrap();
        }
    }

    /// Wait until the active session has counted `n` cards.
    pub async fn wait_for_cards(&self, n: u64) {
        self.wait_until(move || async move {
            self.tracker
                .sessions()
                .active_session()
                .await
                .is_some_and(|s| s.total_cards() >= n)
        })
        .await;
    }

    pub async fn wait_for_decks(&self, n: u64) {
        self.wait_until(move || async move {
            self.tracker
                .sessions()
                .active_session()
                .await
                .is_some_and(|s| s.decks_opened >= n)
        })
        .await;
    }

    /// Wait until the client log has selected `league`.
    pub async fn wait_for_league(&self, league: &str) {
        self.wait_until(move || async move {
            self.tracker.sessions().selected_league().await.as_deref() == Some(league)
        })
        .await;
    }

    async fn wait_until<F, Fut>(&self, mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond().await {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop background tasks and close the store, as the binary does on
    /// Ctrl+C.
    pub async fn shutdown(self) {
        for t in &self.tasks {
            t.abort();
        }
        self.store.close().await;
    }
}
