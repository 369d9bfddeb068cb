//! Shared types for the divination card tracker.
//!
//! These types form the data model used across all modules.
//! They are kept free of I/O so that the log pipeline, the session
//! engine, the price manager and the store can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ---------------------------------------------------------------------------
// Games & leagues
// ---------------------------------------------------------------------------

/// Supported games. The string form is persisted, so variants are only
/// ever added, never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Poe1,
    Poe2,
}

impl Game {
    pub const ALL: &'static [Game] = &[Game::Poe1, Game::Poe2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Poe1 => "poe1",
            Game::Poe2 => "poe2",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Game {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poe1" | "poe" => Ok(Game::Poe1),
            "poe2" => Ok(Game::Poe2),
            other => Err(TrackerError::InvalidInput(format!("unknown game: {other}"))),
        }
    }
}

/// Name of the permanent league every game falls back to.
pub const STANDARD_LEAGUE: &str = "Standard";

/// A league row as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub id: i64,
    pub game: Game,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    /// Set once the league is over. Sessions that reference it keep doing so.
    pub end_date: Option<DateTime<Utc>>,
}

impl League {
    /// Whether the league has ended as of `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end <= now)
    }

    pub fn is_standard(&self) -> bool {
        self.name == STANDARD_LEAGUE
    }
}

/// A league as reported by the external league list, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeagueInfo {
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Log events
// ---------------------------------------------------------------------------

/// A typed event recognized in one client log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// One divination card was found. `stack_size` is the size reported by
    /// the log line; it is metadata, one event always counts as one card.
    ItemDropped { card_name: String, stack_size: u32 },
    StackedDeckOpened,
    ZoneChanged { zone_name: String },
    LeagueDetected { name: String },
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Per-card counter inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCount {
    pub count: u64,
    /// Position of this card's first drop within the session (0-based).
    pub first_seen: u64,
}

/// A tracking session and its accumulators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub league_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub decks_opened: u64,
    pub last_zone: Option<String>,
    pub cards: BTreeMap<String, CardCount>,
}

impl Session {
    pub fn new(id: String, league_id: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            league_id,
            started_at,
            ended_at: None,
            decks_opened: 0,
            last_zone: None,
            cards: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Sum of all card counts.
    pub fn total_cards(&self) -> u64 {
        self.cards.values().map(|c| c.count).sum()
    }

    pub fn unique_cards(&self) -> usize {
        self.cards.len()
    }

    /// Card counts as tallies, for valuation.
    pub fn tallies(&self) -> Vec<CardTally> {
        self.cards
            .iter()
            .map(|(name, c)| CardTally {
                name: name.clone(),
                count: c.count,
                first_seen: Some(c.first_seen),
            })
            .collect()
    }

    pub fn count_of(&self, card_name: &str) -> u64 {
        self.cards.get(card_name).map(|c| c.count).unwrap_or(0)
    }
}

/// One card and how many times it was found within some scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTally {
    pub name: String,
    pub count: u64,
    /// Ordinal of the first drop, when the scope records one.
    pub first_seen: Option<u64>,
}

/// A persisted session summarized for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub league_id: i64,
    pub league_name: String,
    pub game: Game,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_cards: u64,
    pub unique_cards: u64,
    pub decks_opened: u64,
}

/// Filter for listing sessions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub league_id: Option<i64>,
    pub game: Option<Game>,
    #[serde(default)]
    pub active_only: bool,
}

/// 1-based pagination request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub const MAX_PER_PAGE: u32 = 200;

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    25
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Page {
    /// Clamp to sane bounds: page >= 1, 1 <= per_page <= MAX_PER_PAGE.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        let p = self.normalized();
        i64::from(p.page - 1) * i64::from(p.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.normalized().per_page)
    }
}

/// A page of results with the total row count.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// The two independent markets cards are valued against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    #[default]
    Exchange,
    Stash,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Exchange => "exchange",
            PriceSource::Stash => "stash",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            PriceSource::Exchange => PriceSource::Stash,
            PriceSource::Stash => PriceSource::Exchange,
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PriceSource {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exchange" => Ok(PriceSource::Exchange),
            "stash" => Ok(PriceSource::Stash),
            other => Err(TrackerError::InvalidInput(format!(
                "unknown price source: {other}"
            ))),
        }
    }
}

/// One card's price from one source inside a snapshot.
///
/// `chaos_value` is the canonical value; `divine_value` is what the source
/// reported (or derived from the snapshot rate when it reported none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCardPrice {
    pub card_name: String,
    pub source: PriceSource,
    pub chaos_value: Decimal,
    pub divine_value: Decimal,
    /// Full stack size of the card; not every source reports it.
    pub stack_size: Option<u32>,
}

/// An immutable capture of both price sources for one league.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSnapshot {
    pub id: i64,
    pub league_id: i64,
    pub fetched_at: DateTime<Utc>,
    /// Chaos per divine on the exchange at fetch time.
    pub exchange_divine_rate: Decimal,
    /// Chaos per divine on the stash market at fetch time.
    pub stash_divine_rate: Decimal,
    pub prices: Vec<SnapshotCardPrice>,
    #[serde(skip)]
    index: HashMap<(String, PriceSource), usize>,
}

impl PriceSnapshot {
    pub fn new(
        id: i64,
        league_id: i64,
        fetched_at: DateTime<Utc>,
        exchange_divine_rate: Decimal,
        stash_divine_rate: Decimal,
        prices: Vec<SnapshotCardPrice>,
    ) -> Self {
        let index = prices
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.card_name.clone(), p.source), i))
            .collect();
        Self {
            id,
            league_id,
            fetched_at,
            exchange_divine_rate,
            stash_divine_rate,
            prices,
            index,
        }
    }

    /// Conversion rate (chaos per divine) recorded for a source.
    pub fn divine_rate(&self, source: PriceSource) -> Decimal {
        match source {
            PriceSource::Exchange => self.exchange_divine_rate,
            PriceSource::Stash => self.stash_divine_rate,
        }
    }

    /// The price row for a card from exactly one source.
    pub fn price(&self, card_name: &str, source: PriceSource) -> Option<&SnapshotCardPrice> {
        self.index
            .get(&(card_name.to_string(), source))
            .and_then(|&i| self.prices.get(i))
    }

    /// Value a card, preferring `preferred` and falling back to the other
    /// source. A card missing from both is `Unpriced`.
    pub fn value_of(&self, card_name: &str, preferred: PriceSource) -> CardValue {
        if let Some(p) = self.price(card_name, preferred) {
            return CardValue::Priced {
                chaos: p.chaos_value,
                divine: p.divine_value,
                source: preferred,
                fell_back: false,
            };
        }
        let fallback = preferred.other();
        match self.price(card_name, fallback) {
            Some(p) => CardValue::Priced {
                chaos: p.chaos_value,
                divine: p.divine_value,
                source: fallback,
                fell_back: true,
            },
            None => CardValue::Unpriced,
        }
    }

    pub fn len_for(&self, source: PriceSource) -> usize {
        self.prices.iter().filter(|p| p.source == source).count()
    }
}

/// Result of valuing a single card against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CardValue {
    Priced {
        chaos: Decimal,
        divine: Decimal,
        source: PriceSource,
        /// True when the preferred source had no price for the card.
        fell_back: bool,
    },
    Unpriced,
}

impl CardValue {
    pub fn chaos(&self) -> Option<Decimal> {
        match self {
            CardValue::Priced { chaos, .. } => Some(*chaos),
            CardValue::Unpriced => None,
        }
    }

    pub fn is_priced(&self) -> bool {
        matches!(self, CardValue::Priced { .. })
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Aggregation scope for card statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsScope {
    Session { session_id: String },
    League { league_id: i64 },
    AllTime { game: Game },
}

/// Card counts aggregated over a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardStats {
    pub scope: StatsScope,
    pub total_count: u64,
    pub decks_opened: u64,
    pub session_count: u64,
    pub cards: BTreeMap<String, u64>,
}

impl CardStats {
    pub fn empty(scope: StatsScope) -> Self {
        Self {
            scope,
            total_count: 0,
            decks_opened: 0,
            session_count: 0,
            cards: BTreeMap::new(),
        }
    }

    pub fn unique_cards(&self) -> usize {
        self.cards.len()
    }

    pub fn tallies(&self) -> Vec<CardTally> {
        self.cards
            .iter()
            .map(|(name, &count)| CardTally {
                name: name.clone(),
                count,
                first_seen: None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error taxonomy for the tracker core.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Invalid state transition (double start, stop without a session, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A price or league source could not be reached. Retryable.
    #[error("Fetch from {source_name} failed: {message}")]
    TransientFetch { source_name: String, message: String },

    /// A schema migration failed; the store must not be used.
    #[error("Migration {id} failed: {message}")]
    Migration { id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl TrackerError {
    pub fn transient(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        TrackerError::TransientFetch {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::TransientFetch { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
