//! Official league list.
//!
//! `GET {api_url}?type=main&realm=pc` for the first game, `realm=poe2` for
//! the second. The response is a JSON array of leagues with RFC 3339
//! `startAt`/`endAt` (both optional, Standard has neither). Rule variants
//! such as hardcore or SSF are tracked like any other league.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::LeagueFeed;
use crate::types::{Game, LeagueInfo, TrackerError};

const SOURCE_NAME: &str = "leagues";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLeague {
    id: String,
    #[serde(default)]
    start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    end_at: Option<DateTime<Utc>>,
}

/// Client for the official league endpoint.
pub struct OfficialLeagueFeed {
    http: Client,
    api_url: String,
}

impl OfficialLeagueFeed {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("divtrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::InvalidInput(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    fn realm(game: Game) -> &'static str {
        match game {
            Game::Poe1 => "pc",
            Game::Poe2 => "poe2",
        }
    }

    fn into_infos(leagues: Vec<ApiLeague>) -> Vec<LeagueInfo> {
        leagues
            .into_iter()
            .filter(|l| !l.id.trim().is_empty())
            .map(|l| LeagueInfo {
                name: l.id,
                start_date: l.start_at,
                end_date: l.end_at,
            })
            .collect()
    }
}

#[async_trait]
impl LeagueFeed for OfficialLeagueFeed {
    async fn fetch_leagues(&self, game: Game) -> Result<Vec<LeagueInfo>, TrackerError> {
        let resp = self
            .http
            .get(&self.api_url)
            .query(&[("type", "main"), ("realm", Self::realm(game))])
            .send()
            .await
            .map_err(|e| TrackerError::transient(SOURCE_NAME, e))?;

        if !resp.status().is_success() {
            return Err(TrackerError::transient(
                SOURCE_NAME,
                format!("HTTP {}", resp.status()),
            ));
        }

        let leagues: Vec<ApiLeague> = resp
            .json()
            .await
            .map_err(|e| TrackerError::transient(SOURCE_NAME, format!("decode: {e}")))?;

        let infos = Self::into_infos(leagues);
        info!(game = %game, count = infos.len(), "Fetched league list");
        Ok(infos)
    }
}
