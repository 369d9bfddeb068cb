//! In-memory feeds for integration testing.
//!
//! Deterministic `PriceFeed` and `LeagueFeed` implementations whose
//! responses are controllable from test code.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use divtrack::feeds::{LeagueFeed, PriceFeed, RawPriceList, RawPriceRow};
use divtrack::types::{Game, LeagueInfo, PriceSource, TrackerError};
use rust_decimal::Decimal;

/// A price feed that returns whatever list it currently holds.
pub struct StaticPriceFeed {
    source: PriceSource,
    list: Mutex<RawPriceList>,
    /// If set, every fetch fails with this message.
    force_error: Mutex<Option<String>>,
    calls: Mutex<Vec<(Game, String)>>,
}

impl StaticPriceFeed {
    pub fn new(source: PriceSource, divine_rate: Decimal, rows: Vec<RawPriceRow>) -> Arc<Self> {
        Arc::new(Self {
            source,
            list: Mutex::new(RawPriceList { divine_rate, rows }),
            force_error: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_rows(&self, rows: Vec<RawPriceRow>) {
        self.list.lock().unwrap().rows = rows;
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<(Game, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    fn source(&self) -> PriceSource {
        self.source
    }

    async fn fetch(&self, game: Game, league: &str) -> Result<RawPriceList, TrackerError> {
        self.calls.lock().unwrap().push((game, league.to_string()));
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(TrackerError::transient(self.source.as_str(), msg));
        }
        Ok(self.list.lock().unwrap().clone())
    }
}

/// A league feed with a fixed, replaceable league list.
pub struct StaticLeagueFeed {
    leagues: Mutex<Vec<LeagueInfo>>,
}

impl StaticLeagueFeed {
    pub fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            leagues: Mutex::new(names.iter().map(|n| league(n)).collect()),
        })
    }

    pub fn set(&self, names: &[&str]) {
        *self.leagues.lock().unwrap() = names.iter().map(|n| league(n)).collect();
    }
}

fn league(name: &str) -> LeagueInfo {
    LeagueInfo {
        name: name.to_string(),
        start_date: None,
        end_date: None,
    }
}

#[async_trait]
impl LeagueFeed for StaticLeagueFeed {
    async fn fetch_leagues(&self, _game: Game) -> Result<Vec<LeagueInfo>, TrackerError> {
        Ok(self.leagues.lock().unwrap().clone())
    }
}

pub fn exchange_row(name: &str, chaos: f64) -> RawPriceRow {
    RawPriceRow::Exchange {
        name: name.to_string(),
        chaos_value: chaos,
    }
}

pub fn stash_row(name: &str, chaos: f64) -> RawPriceRow {
    RawPriceRow::Stash {
        name: name.to_string(),
        chaos_value: chaos,
        divine_value: None,
        stack_size: None,
    }
}
