//! poe.ninja price feeds.
//!
//! Two independent markets are read:
//! - the currency exchange overview, where cards trade as exchange lines
//!   keyed by item id (`/{game}/api/economy/exchange/current/overview`)
//! - the stash item overview, built from public stash listings
//!   (`/api/data/itemoverview`), plus the currency overview for the
//!   Divine Orb rate (`/api/data/currencyoverview`)
//!
//! Auth: none. Both endpoints are public and cached upstream, so one
//! request per refresh is enough.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{to_decimal, PriceFeed, RawPriceList, RawPriceRow};
use crate::types::{Game, PriceSource, TrackerError};

const USER_AGENT: &str = concat!("divtrack/", env!("CARGO_PKG_VERSION"));
const CARD_TYPE: &str = "DivinationCard";
const DIVINE_ORB: &str = "Divine Orb";

// ---------------------------------------------------------------------------
// API response types (poe.ninja JSON → Rust)
// ---------------------------------------------------------------------------

/// Exchange overview. `core.rates.divine` is divines per chaos.
#[derive(Debug, Deserialize)]
struct ExchangeOverview {
    core: ExchangeCore,
    #[serde(default)]
    lines: Vec<ExchangeLine>,
    #[serde(default)]
    items: Vec<ExchangeItem>,
}

#[derive(Debug, Deserialize)]
struct ExchangeCore {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeLine {
    id: String,
    /// Value in chaos.
    #[serde(default)]
    primary_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExchangeItem {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StashOverview {
    #[serde(default)]
    lines: Vec<StashLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashLine {
    name: String,
    #[serde(default)]
    chaos_value: Option<f64>,
    #[serde(default)]
    divine_value: Option<f64>,
    #[serde(default)]
    stack_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CurrencyOverview {
    #[serde(default)]
    lines: Vec<CurrencyLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyLine {
    currency_type_name: String,
    #[serde(default)]
    chaos_equivalent: Option<f64>,
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

fn http_client(timeout: Duration) -> Result<Client, TrackerError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TrackerError::InvalidInput(format!("HTTP client: {e}")))
}

async fn get_json<T: DeserializeOwned>(
    http: &Client,
    source_name: &str,
    url: &str,
) -> Result<T, TrackerError> {
    debug!(url = %url, source = source_name, "Fetching price feed");

    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| TrackerError::transient(source_name, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(TrackerError::transient(
            source_name,
            format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
        ));
    }

    resp.json()
        .await
        .map_err(|e| TrackerError::transient(source_name, format!("decode: {e}")))
}

/// Chaos per divine from a "divines per chaos" rate.
fn invert_rate(divines_per_chaos: Option<f64>) -> Decimal {
    divines_per_chaos
        .and_then(to_decimal)
        .filter(|r| *r > Decimal::ZERO)
        .map(|r| (Decimal::ONE / r).round_dp(4))
        .unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Exchange feed
// ---------------------------------------------------------------------------

/// Card prices from the currency exchange.
pub struct ExchangeFeed {
    http: Client,
    base_url: String,
}

impl ExchangeFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, game: Game, league: &str) -> String {
        format!(
            "{}/{}/api/economy/exchange/current/overview?league={}&type={CARD_TYPE}",
            self.base_url,
            game.as_str(),
            urlencoding::encode(league),
        )
    }

    fn into_list(overview: ExchangeOverview) -> RawPriceList {
        let names: HashMap<&str, &str> = overview
            .items
            .iter()
            .map(|i| (i.id.as_str(), i.name.as_str()))
            .collect();

        let rows = overview
            .lines
            .iter()
            .filter_map(|line| {
                let name = names.get(line.id.as_str())?;
                Some(RawPriceRow::Exchange {
                    name: (*name).to_string(),
                    chaos_value: line.primary_value?,
                })
            })
            .collect();

        RawPriceList {
            divine_rate: invert_rate(overview.core.rates.get("divine").copied()),
            rows,
        }
    }
}

#[async_trait]
impl PriceFeed for ExchangeFeed {
    fn source(&self) -> PriceSource {
        PriceSource::Exchange
    }

    async fn fetch(&self, game: Game, league: &str) -> Result<RawPriceList, TrackerError> {
        let overview: ExchangeOverview =
            get_json(&self.http, PriceSource::Exchange.as_str(), &self.url(game, league)).await?;
        let list = Self::into_list(overview);
        info!(
            league,
            game = %game,
            rows = list.rows.len(),
            divine_rate = %list.divine_rate,
            "Fetched exchange prices"
        );
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// Stash feed
// ---------------------------------------------------------------------------

/// Card prices from public stash listings.
pub struct StashFeed {
    http: Client,
    base_url: String,
}

impl StashFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn data_path(game: Game) -> &'static str {
        match game {
            Game::Poe1 => "api/data",
            Game::Poe2 => "poe2/api/data",
        }
    }

    fn item_url(&self, game: Game, league: &str) -> String {
        format!(
            "{}/{}/itemoverview?league={}&type={CARD_TYPE}",
            self.base_url,
            Self::data_path(game),
            urlencoding::encode(league),
        )
    }

    fn currency_url(&self, game: Game, league: &str) -> String {
        format!(
            "{}/{}/currencyoverview?league={}&type=Currency",
            self.base_url,
            Self::data_path(game),
            urlencoding::encode(league),
        )
    }

    fn into_list(items: StashOverview, currency: &CurrencyOverview) -> RawPriceList {
        let divine_rate = currency
            .lines
            .iter()
            .find(|l| l.currency_type_name == DIVINE_ORB)
            .and_then(|l| l.chaos_equivalent)
            .and_then(to_decimal)
            .filter(|r| *r > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO);

        let rows = items
            .lines
            .into_iter()
            .filter_map(|line| {
                Some(RawPriceRow::Stash {
                    chaos_value: line.chaos_value?,
                    name: line.name,
                    divine_value: line.divine_value,
                    stack_size: line.stack_size,
                })
            })
            .collect();

        RawPriceList { divine_rate, rows }
    }
}

#[async_trait]
impl PriceFeed for StashFeed {
    fn source(&self) -> PriceSource {
        PriceSource::Stash
    }

    async fn fetch(&self, game: Game, league: &str) -> Result<RawPriceList, TrackerError> {
        let name = PriceSource::Stash.as_str();
        let item_url = self.item_url(game, league);
        let currency_url = self.currency_url(game, league);
        let (items, currency) = futures::try_join!(
            get_json::<StashOverview>(&self.http, name, &item_url),
            get_json::<CurrencyOverview>(&self.http, name, &currency_url),
        )?;
        let list = Self::into_list(items, &currency);
        info!(
            league,
            game = %game,
            rows = list.rows.len(),
            divine_rate = %list.divine_rate,
            "Fetched stash prices"
        );
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_overview_parsing() {
        let json = r#"{
            "core": { "rates": { "divine": 0.005 }, "primary": "chaos" },
            "lines": [
                { "id": "the-fool", "primaryValue": 12.5 },
                { "id": "unknown-id", "primaryValue": 3.0 },
                { "id": "her-mask" }
            ],
            "items": [
                { "id": "the-fool", "name": "The Fool" },
                { "id": "her-mask", "name": "Her Mask" }
            ]
        }"#;
        let overview: ExchangeOverview = serde_json::from_str(json).unwrap();
        let list = ExchangeFeed::into_list(overview);
        assert_eq!(list.divine_rate, dec!(200));
        assert_eq!(
            list.rows,
            vec![RawPriceRow::Exchange {
                name: "The Fool".into(),
                chaos_value: 12.5
            }]
        );
    }

    #[test]
    fn test_stash_overview_parsing() {
        let items = r#"{
            "lines": [
                { "name": "The Doctor", "chaosValue": 2400.0, "divineValue": 12.0, "stackSize": 8 },
                { "name": "Rain of Chaos", "chaosValue": 0.4, "stackSize": 8 },
                { "name": "No Price" }
            ]
        }"#;
        let currency = r#"{
            "lines": [
                { "currencyTypeName": "Exalted Orb", "chaosEquivalent": 15.0 },
                { "currencyTypeName": "Divine Orb", "chaosEquivalent": 198.5 }
            ]
        }"#;
        let list = StashFeed::into_list(
            serde_json::from_str(items).unwrap(),
            &serde_json::from_str(currency).unwrap(),
        );
        assert_eq!(list.divine_rate, dec!(198.5));
        assert_eq!(list.rows.len(), 2);
        assert_eq!(
            list.rows[0],
            RawPriceRow::Stash {
                name: "The Doctor".into(),
                chaos_value: 2400.0,
                divine_value: Some(12.0),
                stack_size: Some(8)
            }
        );
    }

    #[test]
    fn test_missing_divine_rate_is_zero() {
        let overview: ExchangeOverview =
            serde_json::from_str(r#"{ "core": { "rates": {} } }"#).unwrap();
        assert_eq!(ExchangeFeed::into_list(overview).divine_rate, Decimal::ZERO);
    }

    #[test]
    fn test_urls_encode_league_names() {
        let ex = ExchangeFeed::new("https://poe.ninja/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            ex.url(Game::Poe1, "Settlers of Kalguur"),
            "https://poe.ninja/poe1/api/economy/exchange/current/overview?league=Settlers%20of%20Kalguur&type=DivinationCard"
        );
        let stash = StashFeed::new("https://poe.ninja", Duration::from_secs(5)).unwrap();
        assert!(stash
            .item_url(Game::Poe2, "Standard")
            .starts_with("https://poe.ninja/poe2/api/data/itemoverview?league=Standard"));
        assert!(stash.currency_url(Game::Poe1, "Standard").contains("type=Currency"));
    }
}
