//! Client log line classifier.
//!
//! Client log lines look like
//!
//! ```text
//! 2024/07/23 19:04:11 123456789 cffb0719 [INFO Client 1234] : You have entered Lioneye's Watch.
//! ```
//!
//! The timestamp/tick/hash/`[LEVEL Client pid]` header is stripped, then the
//! message is matched against an ordered list of recognizers. The first
//! match wins. Anything unrecognized is not an event and is dropped.
//!
//! Recognized messages:
//!
//! | Message                         | Event               |
//! |---------------------------------|---------------------|
//! | `Card drop: Stacked Deck opened`| `StackedDeckOpened` |
//! | `Card drop: <card> x<stack>`    | `ItemDropped`       |
//! | `Card drop: <card>`             | `ItemDropped` (1)   |
//! | `You have entered <zone>.`      | `ZoneChanged`       |
//! | `Current league: <league>`      | `LeagueDetected`    |

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::types::LogEvent;

#[derive(Debug, Clone, Copy)]
enum Kind {
    DeckOpened,
    Drop,
    Zone,
    League,
}

struct Recognizer {
    kind: Kind,
    pattern: Regex,
}

/// Order matters: the deck-opened message is also a valid drop message
/// (card "Stacked Deck opened"), so it must be tried first.
static RECOGNIZERS: LazyLock<Vec<Recognizer>> = LazyLock::new(|| {
    [
        (Kind::DeckOpened, r"^Card drop: Stacked Deck opened$"),
        (Kind::Drop, r"^Card drop: (?P<card>.+?)(?: x(?P<stack>\S+))?$"),
        (Kind::Zone, r"^You have entered (?P<zone>.+?)\.?$"),
        (Kind::League, r"^Current league: (?P<league>.+?)$"),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| {
        Regex::new(pattern)
            .ok()
            .map(|pattern| Recognizer { kind, pattern })
    })
    .collect()
});

/// Classify one raw log line.
pub fn parse(line: &str) -> Option<LogEvent> {
    let message = strip_header(line.trim());
    if message.is_empty() {
        return None;
    }

    RECOGNIZERS.iter().find_map(|r| {
        r.pattern
            .captures(message)
            // A match with a bad capture is still the final answer for this
            // line: later recognizers are not consulted.
            .map(|caps| build(r.kind, &caps))
    })?
}

/// Drop the `date time ticks hash [LEVEL Client pid]` prefix and the
/// `: ` that marks player-facing messages. Lines without a header are
/// returned unchanged.
fn strip_header(line: &str) -> &str {
    let message = match line.split_once("] ") {
        Some((head, rest)) if head.contains('[') => rest,
        _ => line,
    };
    message.strip_prefix(": ").unwrap_or(message).trim()
}

fn build(kind: Kind, caps: &Captures<'_>) -> Option<LogEvent> {
    match kind {
        Kind::DeckOpened => Some(LogEvent::StackedDeckOpened),
        Kind::Drop => {
            let card_name = caps.name("card")?.as_str().trim();
            if card_name.is_empty() {
                return None;
            }
            let stack_size = match caps.name("stack") {
                Some(m) => parse_positive(m.as_str())?,
                None => 1,
            };
            Some(LogEvent::ItemDropped {
                card_name: card_name.to_string(),
                stack_size,
            })
        }
        Kind::Zone => Some(LogEvent::ZoneChanged {
            zone_name: caps.name("zone")?.as_str().trim().to_string(),
        }),
        Kind::League => Some(LogEvent::LeagueDetected {
            name: caps.name("league")?.as_str().trim().to_string(),
        }),
    }
}

fn parse_positive(s: &str) -> Option<u32> {
    s.parse::<u32>().ok().filter(|&n| n > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
