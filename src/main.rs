//! divtrack: divination card drop tracker
//!
//! Entry point. Loads configuration, initialises structured logging,
//! migrates the store, resumes any open session, then runs the log tail,
//! the event pump, the price and league refresh loops and the local API
//! until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use divtrack::api;
use divtrack::config::AppConfig;
use divtrack::engine::snapshots::PriceSnapshotManager;
use divtrack::engine::tracker::{spawn_event_pump, SessionTracker};
use divtrack::feeds::leagues::OfficialLeagueFeed;
use divtrack::feeds::ninja::{ExchangeFeed, StashFeed};
use divtrack::feeds::{LeagueFeed, PriceFeed};
use divtrack::logs::{self, LogTail};
use divtrack::service::Tracker;
use divtrack::storage::Store;

const BANNER: &str = r#"
     _ _       _                  _
  __| (_)_   _| |_ _ __ __ _  ___| | __
 / _` | \ \ / / __| '__/ _` |/ __| |/ /
| (_| | |\ V /| |_| | | (_| | (__|   <
 \__,_|_| \_/  \__|_|  \__,_|\___|_|\_\

  Divination card drop tracker
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_default()?;

    init_logging();

    println!("{BANNER}");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        game = %cfg.tracker.game,
        log_path = %cfg.tracker.log_path.display(),
        database = %cfg.tracker.database_path.display(),
        price_source = %cfg.prices.selected_source,
        "divtrack starting up"
    );

    // -- Store -----------------------------------------------------------

    // A failed migration stops startup here; the store is never used
    // half-migrated.
    let store = Store::open_migrated(&cfg.tracker.database_path)
        .await
        .context("Failed to open or migrate the database")?;

    // -- Components ------------------------------------------------------

    let sessions = Arc::new(
        SessionTracker::new(store.clone(), cfg.tracker.game, &cfg.tracker.default_league).await?,
    );
    if let Some(s) = sessions.active_session().await {
        info!(session = %s.id, cards = s.total_cards(), "Resumed open session");
    }

    let timeout = cfg.prices.fetch_timeout();
    let exchange: Arc<dyn PriceFeed> = Arc::new(ExchangeFeed::new(&cfg.prices.exchange_base_url, timeout)?);
    let stash: Arc<dyn PriceFeed> = Arc::new(StashFeed::new(&cfg.prices.stash_base_url, timeout)?);
    let prices = Arc::new(PriceSnapshotManager::new(store.clone(), exchange, stash, timeout));
    let league_feed: Arc<dyn LeagueFeed> = Arc::new(OfficialLeagueFeed::new(&cfg.leagues.api_url, timeout)?);

    let tracker = Arc::new(Tracker::new(
        store.clone(),
        sessions.clone(),
        prices,
        Some(league_feed),
        cfg.prices.selected_source,
    ));

    // -- Log pipeline ----------------------------------------------------

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let tail = logs::spawn_tail(
        LogTail::open(&cfg.tracker.log_path),
        cfg.tracker.poll_interval(),
        line_tx,
    );
    let pump = spawn_event_pump(line_rx, sessions.clone());

    // -- API -------------------------------------------------------------

    let api = if cfg.api.enabled {
        Some(api::spawn_api(tracker.clone(), cfg.api.port).await?)
    } else {
        None
    };

    // -- Main loop -------------------------------------------------------

    let mut price_tick = tokio::time::interval(cfg.prices.refresh_interval());
    price_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut league_tick = tokio::time::interval(cfg.leagues.refresh_interval());
    league_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Tracking. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = league_tick.tick() => {
                if let Err(e) = tracker.sync_leagues(cfg.tracker.game).await {
                    warn!(error = %e, "League sync failed, keeping known leagues");
                }
            }
            _ = price_tick.tick() => {
                refresh_current_prices(&tracker, &cfg).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // -- Shutdown --------------------------------------------------------

    tail.abort();
    pump.abort();
    if let Some(api) = api {
        api.abort();
    }
    if let Some(s) = sessions.active_session().await {
        info!(session = %s.id, "Session left open; it resumes on next start");
    }
    store.close().await;
    info!("divtrack shut down cleanly.");

    Ok(())
}

/// Refresh prices for the league of the active session, or for the
/// selected league when idle.
async fn refresh_current_prices(tracker: &Tracker, cfg: &AppConfig) {
    let league_id = match tracker.sessions().active_session().await {
        Some(s) => Some(s.league_id),
        None => {
            let name = tracker
                .sessions()
                .selected_league()
                .await
                .unwrap_or_else(|| cfg.tracker.default_league.clone());
            match tracker.store().find_league(cfg.tracker.game, &name).await {
                Ok(league) => league.map(|l| l.id),
                Err(e) => {
                    error!(error = %e, league = %name, "League lookup failed");
                    None
                }
            }
        }
    };

    let Some(league_id) = league_id else {
        warn!("No known league to price yet");
        return;
    };
    if let Err(e) = tracker.refresh_prices(league_id).await {
        warn!(league_id, error = %e, retryable = e.is_retryable(), "Price refresh failed");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("divtrack=info"));

    let json_logging = std::env::var("DIVTRACK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
