//! Valuation and summary statistics.
//!
//! [`summarize`] is pure: it takes card tallies (from one session or an
//! aggregated scope), an optional price snapshot and the user's valuation
//! options, and derives counts, values and the most valuable card.

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{CardTally, CardValue, PriceSnapshot, PriceSource};

/// How cards are valued.
#[derive(Debug, Clone, Default)]
pub struct ValuationOptions {
    pub price_source: PriceSource,
    /// Cards excluded from value totals. They are still counted.
    pub hidden: HashSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardSummary {
    pub name: String,
    pub count: u64,
    /// Share of all cards found, 0..=1.
    pub ratio: Decimal,
    pub value: CardValue,
    /// `count × unit value` in chaos; `None` when unpriced.
    pub total_chaos: Option<Decimal>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_cards: u64,
    pub unique_cards: usize,
    pub decks_opened: u64,
    pub price_source: PriceSource,
    /// Snapshot the values come from, if any.
    pub snapshot_id: Option<i64>,
    pub total_chaos: Decimal,
    pub total_divine: Decimal,
    pub most_valuable: Option<CardSummary>,
    /// Sorted by total value, then count, then name.
    pub cards: Vec<CardSummary>,
    /// Cards with no price in either source. Counted as zero in totals.
    pub unpriced: Vec<String>,
}

/// Derive summary statistics for a set of tallies.
pub fn summarize(
    tallies: &[CardTally],
    decks_opened: u64,
    snapshot: Option<&PriceSnapshot>,
    options: &ValuationOptions,
) -> Summary {
    let total_cards: u64 = tallies.iter().map(|t| t.count).sum();

    let mut total_chaos = Decimal::ZERO;
    let mut total_divine = Decimal::ZERO;
    let mut unpriced = Vec::new();
    let mut best: Option<(&CardTally, Decimal)> = None;
    let mut cards = Vec::with_capacity(tallies.len());

    for tally in tallies.iter().filter(|t| t.count > 0) {
        let value = snapshot
            .map(|s| s.value_of(&tally.name, options.price_source))
            .unwrap_or(CardValue::Unpriced);
        let hidden = options.hidden.contains(&tally.name);
        let count = Decimal::from(tally.count);

        let total = match value {
            CardValue::Priced { chaos, divine, .. } => {
                if !hidden {
                    total_chaos += chaos * count;
                    total_divine += divine * count;
                    if best.map_or(true, |(b, v)| beats(tally, chaos, b, v)) {
                        best = Some((tally, chaos));
                    }
                }
                Some(chaos * count)
            }
            CardValue::Unpriced => {
                unpriced.push(tally.name.clone());
                None
            }
        };

        cards.push(CardSummary {
            name: tally.name.clone(),
            count: tally.count,
            ratio: ratio(tally.count, total_cards),
            value,
            total_chaos: total,
            hidden,
        });
    }

    cards.sort_by(|a, b| {
        b.total_chaos
            .unwrap_or(Decimal::MIN)
            .cmp(&a.total_chaos.unwrap_or(Decimal::MIN))
            .then(b.count.cmp(&a.count))
            .then_with(|| a.name.cmp(&b.name))
    });
    unpriced.sort();

    let most_valuable = best.and_then(|(t, _)| cards.iter().find(|c| c.name == t.name).cloned());

    Summary {
        total_cards,
        unique_cards: cards.len(),
        decks_opened,
        price_source: options.price_source,
        snapshot_id: snapshot.map(|s| s.id),
        total_chaos,
        total_divine: total_divine.round_dp(4),
        most_valuable,
        cards,
        unpriced,
    }
}

/// Whether `card` at `value` should replace the current best. Higher unit
/// value wins; ties go to the earlier first drop, then to name order.
fn beats(card: &CardTally, value: Decimal, best: &CardTally, best_value: Decimal) -> bool {
    match value.cmp(&best_value) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match (card.first_seen, best.first_seen) {
            (Some(a), Some(b)) if a != b => a < b,
            _ => card.name < best.name,
        },
    }
}

fn ratio(count: u64, total: u64) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(count) / Decimal::from(total)).round_dp(4)
}
