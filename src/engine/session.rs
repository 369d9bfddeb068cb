//! Session state machine.
//!
//! Pure and synchronous: no I/O, no clock. The caller supplies ids and
//! timestamps, applies events in arrival order, and persists whatever
//! [`Applied`] reports as changed.
//!
//! ```text
//!                 start                  stop
//! NoActiveSession ─────▶ Active ─────────────▶ Ended
//!                          ▲                     │
//!                          └──────── start ──────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::types::{CardCount, LogEvent, Session, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "session", rename_all = "snake_case")]
pub enum SessionState {
    NoActiveSession,
    Active(Session),
    /// Keeps the most recently stopped session for inspection.
    Ended(Session),
}

/// What applying one event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// No session state changed.
    Ignored,
    CardCounted { card_name: String, card: CardCount },
    DeckOpened { decks_opened: u64 },
    ZoneRecorded { zone_name: String },
    /// The league the game reports; new sessions start there.
    LeagueSelected { name: String },
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    selected_league: Option<String>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::NoActiveSession,
            selected_league: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn active(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Active(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    pub fn selected_league(&self) -> Option<&str> {
        self.selected_league.as_deref()
    }

    pub fn select_league(&mut self, name: impl Into<String>) {
        self.selected_league = Some(name.into());
    }

    /// Begin tracking `session`. Starting from `Ended` is the same as
    /// starting fresh.
    pub fn start(&mut self, session: Session) -> Result<(), TrackerError> {
        if let SessionState::Active(current) = &self.state {
            return Err(TrackerError::Conflict(format!(
                "session {} is already active",
                current.id
            )));
        }
        info!(session = %session.id, league_id = session.league_id, "Session started");
        self.state = SessionState::Active(session);
        Ok(())
    }

    /// Resume a session persisted as open by an earlier run. Sessions that
    /// already have an end time are not resumed.
    pub fn restore(&mut self, session: Session) -> Result<(), TrackerError> {
        if !session.is_active() {
            return Err(TrackerError::InvalidInput(format!(
                "session {} has already ended",
                session.id
            )));
        }
        if self.is_active() {
            return Err(TrackerError::Conflict("a session is already active".into()));
        }
        info!(
            session = %session.id,
            cards = session.total_cards(),
            decks = session.decks_opened,
            "Session restored"
        );
        self.state = SessionState::Active(session);
        Ok(())
    }

    /// Apply one parsed event. Events outside an active session only
    /// affect the selected league.
    pub fn apply(&mut self, event: &LogEvent) -> Applied {
        if let LogEvent::LeagueDetected { name } = event {
            if self.selected_league.as_deref() == Some(name.as_str()) {
                return Applied::Ignored;
            }
            if let Some(s) = self.active() {
                debug!(session = %s.id, league = %name, "League changed mid-session; session keeps its league");
            }
            self.selected_league = Some(name.clone());
            return Applied::LeagueSelected { name: name.clone() };
        }

        let SessionState::Active(session) = &mut self.state else {
            return Applied::Ignored;
        };

        match event {
            LogEvent::ItemDropped { card_name, .. } => {
                let ordinal = session.total_cards();
                let card = session
                    .cards
                    .entry(card_name.clone())
                    .or_insert(CardCount {
                        count: 0,
                        first_seen: ordinal,
                    });
                card.count += 1;
                Applied::CardCounted {
                    card_name: card_name.clone(),
                    card: *card,
                }
            }
            LogEvent::StackedDeckOpened => {
                session.decks_opened += 1;
                Applied::DeckOpened {
                    decks_opened: session.decks_opened,
                }
            }
            LogEvent::ZoneChanged { zone_name } => {
                if session.last_zone.as_deref() == Some(zone_name.as_str()) {
                    return Applied::Ignored;
                }
                session.last_zone = Some(zone_name.clone());
                Applied::ZoneRecorded {
                    zone_name: zone_name.clone(),
                }
            }
            LogEvent::LeagueDetected { .. } => Applied::Ignored,
        }
    }

    /// What the session would look like if stopped at `ended_at`, without
    /// changing state. Lets the caller persist before committing.
    pub fn preview_stop(&self, ended_at: DateTime<Utc>) -> Result<Session, TrackerError> {
        let mut session = self
            .active()
            .cloned()
            .ok_or_else(|| TrackerError::Conflict("no active session".into()))?;
        session.ended_at = Some(ended_at);
        Ok(session)
    }

    /// End the active session and return it as stopped.
    pub fn stop(&mut self, ended_at: DateTime<Utc>) -> Result<Session, TrackerError> {
        let session = self.preview_stop(ended_at)?;
        info!(
            session = %session.id,
            cards = session.total_cards(),
            unique = session.unique_cards(),
            decks = session.decks_opened,
            "Session stopped"
        );
        self.state = SessionState::Ended(session.clone());
        Ok(session)
    }
}
