//! Error taxonomy shared by every backend.
//!
//! "No matches" is never an error: a search that ran and found nothing
//! returns `Ok(vec![])`. The types here cover the cases where the work
//! could not be done at all.

use thiserror::Error;

/// Boxed backend error carried as a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A search could not be executed.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The index has never been built, so there is nothing to query.
    #[error("search index has not been built; run the index build first")]
    IndexNotBuilt,

    /// The lexical analyzer rejected the query text.
    #[error("query rejected: {0}")]
    InvalidQuery(String),

    /// The storage backend failed while matching, ranking, or highlighting.
    #[error("search storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl SearchError {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SearchError::Storage(Box::new(err))
    }
}

/// A statement in the index build batch failed; the rest of the batch
/// was not executed.
#[derive(Debug, Error)]
#[error("index build failed at `{statement}`: {message}")]
pub struct BuildError {
    pub statement: String,
    pub message: String,
}

impl BuildError {
    pub fn new(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

/// Failure writing to or reading from the attachment-text table.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The content itself was refused (e.g. an invalid byte sequence);
    /// retrying with the same text will not help.
    #[error("content rejected by storage: {0}")]
    Rejected(String),

    #[error("attachment storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl StoreError {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Storage(Box::new(err))
    }
}
