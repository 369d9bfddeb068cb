//! Core engine: session tracking, price snapshots and valuation.
//!
//! Log lines flow tail → parser → [`tracker::SessionTracker`]; prices flow
//! feeds → [`snapshots::PriceSnapshotManager`]; [`stats::summarize`] joins
//! the two on demand.

pub mod session;
pub mod snapshots;
pub mod stats;
pub mod tracker;
