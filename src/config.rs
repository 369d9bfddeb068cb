//! Configuration loading from TOML.
//!
//! Reads `config.toml` (or the file named by `DIVTRACK_CONFIG`) and
//! deserializes it into strongly-typed structs. Only the client log path
//! and the database path are mandatory; everything else has a default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{Game, PriceSource, STANDARD_LEAGUE};

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "DIVTRACK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub prices: PricesConfig,
    #[serde(default)]
    pub leagues: LeaguesConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// The game client's `Client.txt`.
    pub log_path: PathBuf,
    pub database_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_game")]
    pub game: Game,
    /// League selected for new sessions until the log reports another one.
    #[serde(default = "default_league")]
    pub default_league: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricesConfig {
    #[serde(default = "default_price_source")]
    pub selected_source: PriceSource,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_ninja_url")]
    pub exchange_base_url: String,
    #[serde(default = "default_ninja_url")]
    pub stash_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LeaguesConfig {
    #[serde(default = "default_leagues_url")]
    pub api_url: String,
    #[serde(default = "default_league_refresh_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_game() -> Game {
    Game::Poe1
}

fn default_league() -> String {
    STANDARD_LEAGUE.to_string()
}

fn default_price_source() -> PriceSource {
    PriceSource::Exchange
}

fn default_refresh_interval_secs() -> u64 {
    30 * 60
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_ninja_url() -> String {
    "https://poe.ninja".to_string()
}

fn default_leagues_url() -> String {
    "https://api.pathofexile.com/leagues".to_string()
}

fn default_league_refresh_secs() -> u64 {
    6 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    8731
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            selected_source: default_price_source(),
            refresh_interval_secs: default_refresh_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            exchange_base_url: default_ninja_url(),
            stash_base_url: default_ninja_url(),
        }
    }
}

impl Default for LeaguesConfig {
    fn default() -> Self {
        Self {
            api_url: default_leagues_url(),
            refresh_interval_secs: default_league_refresh_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_api_port(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}

impl PricesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(60))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

impl LeaguesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(60))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `DIVTRACK_CONFIG`, falling back to `config.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }
}
