//! # Mantis Search Core
//!
//! Shared, runtime-free logic for Mantis Search: the fragment data model,
//! storage traits, lexical analysis, and the ranked query engine.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage backends live behind the traits in
//! [`store`]; [`store::memory::InMemoryIndex`] is a complete in-process
//! backend used by tests and embedded callers.

pub mod chunk;
pub mod error;
pub mod headline;
pub mod lexer;
pub mod models;
pub mod query;
pub mod rank;
pub mod search;
pub mod store;
