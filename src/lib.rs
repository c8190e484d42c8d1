//! # msg-archiver
//!
//! A local-first archive for chat messages.
//!
//! Messages from any platform are normalized into [`models::MessageRecord`]s,
//! tagged by a configurable rule table, deduplicated by a content fingerprint
//! and appended to one newline-delimited JSON file per day. A digest pass
//! summarizes a day into Markdown; a retention pass moves old days to cold
//! storage.
//!
//! ## Architecture
//!
//! ```text
//!   raw JSON ──▶ ┌──────────┐   claim   ┌──────────────┐
//!                │  ingest  │──────────▶│ fingerprints │ (SQLite)
//!                └────┬─────┘           └──────────────┘
//!                     │ append
//!                     ▼
//!            hot/YYYY-MM-DD.jsonl ──▶ digest ──▶ digest/YYYY-MM-DD.md
//!                     │
//!                     │ archive (older than hot_days)
//!                     ▼
//!            cold/YYYY-MM/YYYY-MM-DD.jsonl
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`identity`] | Message ids and content fingerprints |
//! | [`tags`] | Rule-based tag extraction |
//! | [`store`] | Partition storage and fingerprint index traits + backends |
//! | [`ingest`] | Normalize, dedup and append messages |
//! | [`digest`] | Daily digest aggregation and rendering |
//! | [`archive`] | Hot-to-cold retention |
//! | [`stats`] | Storage overview |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Index schema |

pub mod archive;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod stats;
pub mod store;
pub mod tags;
