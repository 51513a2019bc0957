//! Feed synchronization engine.
//!
//! Periodically fetches RSS 0.9x, RSS 2.0, ATOM and RDF feeds, reconciles
//! their items into a SQLite message store without ever touching user
//! flags, and serializes all work through one engine-wide lock.
//!
//! - [`config`] - `config.toml` loading
//! - [`feed`] - fetching and parsing
//! - [`storage`] - the message store
//! - [`sync`] - scheduler, reconciler and update jobs
//! - [`util`] - URL and text helpers

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
