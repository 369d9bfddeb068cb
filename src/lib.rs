//! divtrack: divination card drop tracker
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod logs;
pub mod service;
pub mod storage;
pub mod types;
