//! External data feeds.
//!
//! Defines the `PriceFeed` and `LeagueFeed` traits and provides
//! implementations for:
//! - poe.ninja currency exchange (card prices as exchange lines)
//! - poe.ninja stash overview (card prices as listed-item lines)
//! - the official league list
//!
//! Each price feed returns its own raw row shape; [`normalize`] turns either
//! shape into [`SnapshotCardPrice`] rows.

pub mod leagues;
pub mod ninja;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;

use crate::types::{Game, LeagueInfo, PriceSource, SnapshotCardPrice, TrackerError};

/// A source of divination card prices for one game and league.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Which market this feed reads.
    fn source(&self) -> PriceSource;

    /// Retrieve the current card price list. Network or decode failures
    /// are `TrackerError::TransientFetch`.
    async fn fetch(&self, game: Game, league: &str) -> Result<RawPriceList, TrackerError>;
}

/// A source of the current league list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeagueFeed: Send + Sync {
    async fn fetch_leagues(&self, game: Game) -> Result<Vec<LeagueInfo>, TrackerError>;
}

/// One price row as a feed reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPriceRow {
    /// Exchange lines carry a chaos value only.
    Exchange { name: String, chaos_value: f64 },
    /// Stash lines may also report a divine value and the card's stack size.
    Stash {
        name: String,
        chaos_value: f64,
        divine_value: Option<f64>,
        stack_size: Option<u32>,
    },
}

impl RawPriceRow {
    pub fn source(&self) -> PriceSource {
        match self {
            RawPriceRow::Exchange { .. } => PriceSource::Exchange,
            RawPriceRow::Stash { .. } => PriceSource::Stash,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RawPriceRow::Exchange { name, .. } | RawPriceRow::Stash { name, .. } => name,
        }
    }
}

/// Everything one feed returned in one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceList {
    /// Chaos per divine on this market at fetch time.
    pub divine_rate: Decimal,
    pub rows: Vec<RawPriceRow>,
}

/// Convert a feed float to a decimal, keeping its shortest representation.
pub(crate) fn to_decimal(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }
    Decimal::from_f64(v).map(|d| d.normalize())
}

/// Turn raw rows into snapshot prices.
///
/// Rows without a positive chaos value are dropped. A card that appears
/// twice in the same source keeps its first row. A missing divine value is
/// derived from `divine_rate`.
pub fn normalize(list: &RawPriceList) -> Vec<SnapshotCardPrice> {
    let mut seen: HashSet<(PriceSource, &str)> = HashSet::new();
    let mut out = Vec::with_capacity(list.rows.len());

    for row in &list.rows {
        let name = row.name().trim();
        if name.is_empty() || !seen.insert((row.source(), name)) {
            continue;
        }

        let (chaos, reported_divine, stack_size) = match row {
            RawPriceRow::Exchange { chaos_value, .. } => (*chaos_value, None, None),
            RawPriceRow::Stash {
                chaos_value,
                divine_value,
                stack_size,
                ..
            } => (*chaos_value, *divine_value, *stack_size),
        };

        let Some(chaos_value) = to_decimal(chaos).filter(|c| c.is_sign_positive() && !c.is_zero())
        else {
            debug!(card = name, source = %row.source(), value = chaos, "Dropping unpriced row");
            // A bad first row must not shadow a good later one.
            seen.remove(&(row.source(), name));
            continue;
        };

        let divine_value = reported_divine
            .and_then(to_decimal)
            .filter(|d| d.is_sign_positive())
            .unwrap_or_else(|| {
                if list.divine_rate > Decimal::ZERO {
                    (chaos_value / list.divine_rate).round_dp(6)
                } else {
                    Decimal::ZERO
                }
            });

        out.push(SnapshotCardPrice {
            card_name: name.to_string(),
            source: row.source(),
            chaos_value,
            divine_value,
            stack_size: stack_size.filter(|&n| n > 0),
        });
    }

    out
}
