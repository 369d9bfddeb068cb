//! Session tracker: the single writer of session state.
//!
//! Wraps the [`SessionMachine`] in a mutex together with the store, so that
//! event application, start, stop and delete are serialized. Every change
//! is persisted before the call returns.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::session::{Applied, SessionMachine, SessionState};
use crate::logs;
use crate::storage::Store;
use crate::types::{Game, League, LeagueInfo, LogEvent, Session, TrackerError};

pub struct SessionTracker {
    store: Store,
    game: Game,
    machine: Mutex<SessionMachine>,
}

impl SessionTracker {
    /// Build a tracker and resume any session the store still holds open.
    pub async fn new(store: Store, game: Game, default_league: &str) -> Result<Self, TrackerError> {
        let mut machine = SessionMachine::new();
        machine.select_league(default_league);

        if let Some(open) = store.load_active_session().await? {
            machine.restore(open)?;
        }

        Ok(Self {
            store,
            game,
            machine: Mutex::new(machine),
        })
    }

    pub fn game(&self) -> Game {
        self.game
    }

    /// The league a new session for `league_id` should use: the league
    /// itself while it runs, the game's Standard league once it has ended.
    pub async fn resolve_league_for_new_session(&self, league_id: i64) -> Result<League, TrackerError> {
        let league = self.store.require_league(league_id).await?;
        if !league.has_ended(Utc::now()) {
            return Ok(league);
        }
        let standard = self.store.standard_league(league.game).await?;
        warn!(
            league = %league.name,
            fallback = %standard.name,
            "League has ended, starting session in the permanent league"
        );
        Ok(standard)
    }

    /// Start a session in `league_id` (or its fallback).
    pub async fn start_session(&self, league_id: i64) -> Result<Session, TrackerError> {
        let mut machine = self.machine.lock().await;
        if let Some(active) = machine.active() {
            return Err(TrackerError::Conflict(format!(
                "session {} is already active",
                active.id
            )));
        }

        let league = self.resolve_league_for_new_session(league_id).await?;
        let session = Session::new(uuid::Uuid::new_v4().to_string(), league.id, Utc::now());
        self.store.insert_session(&session).await?;
        machine.start(session.clone())?;
        Ok(session)
    }

    /// Start a session in the league the game last reported, registering
    /// that league if it has never been synced.
    pub async fn start_session_in_selected_league(&self) -> Result<Session, TrackerError> {
        let name = {
            let machine = self.machine.lock().await;
            machine
                .selected_league()
                .map(str::to_string)
                .ok_or_else(|| TrackerError::InvalidInput("no league selected".into()))?
        };

        let league = match self.store.find_league(self.game, &name).await? {
            Some(l) => l,
            None => {
                info!(league = %name, game = %self.game, "Registering league seen in client log");
                self.store
                    .upsert_league(
                        self.game,
                        &LeagueInfo {
                            name,
                            start_date: None,
                            end_date: None,
                        },
                    )
                    .await?
            }
        };
        self.start_session(league.id).await
    }

    /// Apply one event and persist what it changed. The event is applied
    /// to a copy of the machine first; the copy replaces the live state
    /// only once the store has accepted the write.
    pub async fn apply_event(&self, event: &LogEvent) -> Result<Applied, TrackerError> {
        let mut machine = self.machine.lock().await;
        let mut next = machine.clone();
        let applied = next.apply(event);
        let now = Utc::now();

        match &applied {
            Applied::Ignored => return Ok(applied),
            Applied::CardCounted { card_name, card } => {
                if let Some(session) = next.active() {
                    debug!(session = %session.id, card = %card_name, count = card.count, "Card counted");
                    self.store
                        .save_card_count(&session.id, card_name, card, now)
                        .await?;
                }
            }
            Applied::DeckOpened { .. } | Applied::ZoneRecorded { .. } => {
                if let Some(session) = next.active() {
                    self.store.save_counters(session, now).await?;
                }
            }
            Applied::LeagueSelected { name } => {
                info!(league = %name, "League selected from client log");
            }
        }

        *machine = next;
        Ok(applied)
    }

    /// Stop the active session. The store is updated first; on failure the
    /// session stays active.
    pub async fn stop_session(&self) -> Result<Session, TrackerError> {
        let mut machine = self.machine.lock().await;
        let ended_at = Utc::now();
        let ended = machine.preview_stop(ended_at)?;
        self.store.finish_session(&ended).await?;
        machine.stop(ended_at)
    }

    /// Copy of the active session, if any.
    pub async fn active_session(&self) -> Option<Session> {
        self.machine.lock().await.active().cloned()
    }

    pub async fn state(&self) -> SessionState {
        self.machine.lock().await.state().clone()
    }

    pub async fn selected_league(&self) -> Option<String> {
        self.machine.lock().await.selected_league().map(str::to_string)
    }

    /// Permanently remove a stored session. The active session cannot be
    /// deleted.
    pub async fn delete_session(&self, id: &str) -> Result<(), TrackerError> {
        let machine = self.machine.lock().await;
        if machine.active().is_some_and(|s| s.id == id) {
            return Err(TrackerError::Conflict(format!("session {id} is active")));
        }
        if !self.store.delete_session(id).await? {
            return Err(TrackerError::NotFound(format!("session {id}")));
        }
        info!(session = %id, "Session deleted");
        Ok(())
    }
}

/// Parse and apply lines from `rx` in arrival order until the sender side
/// closes.
pub fn spawn_event_pump(
    mut rx: mpsc::UnboundedReceiver<String>,
    tracker: Arc<SessionTracker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let Some(event) = logs::parse(&line) else {
                trace!(line = %line, "Unrecognized log line");
                continue;
            };
            if let Err(e) = tracker.apply_event(&event).await {
                warn!(error = %e, event = ?event, "Failed to persist log event");
            }
        }
        debug!("Log line channel closed, event pump stopping");
    })
}
