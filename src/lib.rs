//! feedkeep: feed ingestion and article persistence.
//!
//! - [`feed`] - relay-backed retrieval, normalization, refresh and OPML
//! - [`content`] - ad stripping, direction hints, reader-mode extraction
//! - [`storage`] - crash-safe key-value persistence and the article Store
//! - [`backup`] - whole-collection backup to an external target
//! - [`config`] - TOML configuration and component wiring

pub mod backup;
pub mod config;
pub mod content;
pub mod feed;
pub mod storage;
pub mod util;
