//! End-to-end tests: a real client log file on disk, a real SQLite file,
//! and in-memory feeds standing in for the network.

mod harness;
mod mock_feeds;
mod prices;
mod session_flow;
