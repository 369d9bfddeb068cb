//! Client log ingestion: tailing the file and classifying its lines.

pub mod parser;
pub mod tail;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub use parser::parse;
pub use tail::{LogTail, NewLines};

/// Poll `tail` every `every` and push each new line into `tx`.
///
/// The channel is unbounded so a busy consumer makes lines queue up rather
/// than get lost. The task ends when the receiver is dropped.
pub fn spawn_tail(
    mut tail: LogTail,
    every: Duration,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match tail.poll_new_lines() {
                Ok(lines) => {
                    for line in lines {
                        if tx.send(line).is_err() {
                            debug!("Line receiver dropped, stopping log tail");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, path = %tail.path().display(), "Failed to read client log");
                }
            }
        }
    })
}
