//! # Mantis Search
//!
//! Ranked full-text search over a MantisBT PostgreSQL database.
//!
//! The query engine and its storage traits live in `mantis-search-core`;
//! this crate supplies the PostgreSQL backend, the attachment extraction
//! pipeline, the `msearch` CLI, and the HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  init   ┌──────────────────────┐
//! │ Mantis tables│────────▶│ fragment view (MV)   │──┐
//! └──────┬───────┘         └──────────────────────┘  │  search
//!        │ attachments     ┌──────────────────────┐  ├────────▶ CLI / HTTP
//!        └────────────────▶│ attachment text table│──┘
//!           (Tika/local)   └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Connection pool |
//! | [`pg_store`] | PostgreSQL index backend |
//! | [`index_cmd`] | Index build / refresh |
//! | [`search`] | CLI search and result formatting |
//! | [`extract`] | Local attachment text extraction |
//! | [`tika`] | Apache Tika extraction |
//! | [`attachments`] | Attachment indexing pipeline |
//! | [`server`] | HTTP search API |

pub mod attachments;
pub mod config;
pub mod db;
pub mod extract;
pub mod index_cmd;
pub mod pg_store;
pub mod search;
pub mod server;
pub mod tika;
