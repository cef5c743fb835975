//! Storage abstraction for Mantis Search.
//!
//! The search engine never talks to a database directly. Backends
//! implement the traits below and are injected into
//! [`SearchEngine`](crate::search::SearchEngine) at construction:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`FragmentIndex`] | Parse queries, match and rank one source, build headlines |
//! | [`IndexBuilder`] | Create or refresh the unified index (administrative) |
//! | [`AttachmentStore`] | Pending attachments and the attachment-text table |
//!
//! Implementations must be `Send + Sync`; searches run concurrently
//! against a shared backend and must not mutate it.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{BuildError, SearchError, StoreError};
use crate::models::{Candidate, SourceType};

/// Read side of the index: everything a search needs.
#[async_trait]
pub trait FragmentIndex: Send + Sync {
    /// Backend-specific parsed query. Opaque to the engine.
    type Query: Send + Sync;

    /// Parse free text into a query expression. The text is passed
    /// through unmodified; the backend's lexical analyzer decides what
    /// it means.
    fn parse_query(&self, text: &str) -> Result<Self::Query, SearchError>;

    /// Fragments of one source that match `query`, ranked, best first,
    /// at most `limit` of them. Ties are ordered by fragment id.
    async fn match_source(
        &self,
        query: &Self::Query,
        source: SourceType,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError>;

    /// Highlighted excerpt of `document` for `query`.
    async fn headline(&self, query: &Self::Query, document: &str) -> Result<String, SearchError>;
}

/// Write side of the unified index.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Create the unified index if absent, otherwise refresh it from the
    /// current table contents, then grant read access. Idempotent.
    /// Concurrent calls are serialized.
    async fn build_or_refresh(&self) -> Result<BuildSummary, BuildError>;
}

/// What a build did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    /// `true` if the index already existed and was refreshed.
    pub refreshed: bool,
    /// Statements executed, in order.
    pub statements: usize,
}

/// An attachment that has no extracted text yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_id: i64,
    pub issue_id: i64,
    pub folder: String,
    pub diskfile: String,
    pub file_type: String,
}

/// Whether files of this content type are worth sending to extraction.
/// Images, video and executables carry no searchable text.
pub fn is_indexable_content_type(file_type: &str) -> bool {
    let t = file_type.trim().to_ascii_lowercase();
    !(t.starts_with("image/")
        || t.starts_with("video/")
        || t.starts_with("application/x-executable")
        || t == "application/x-java-archive")
}

/// The attachment-text table, written by the extraction pipeline.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Attachments with no stored text, ordered by file id.
    async fn pending_attachments(&self) -> Result<Vec<PendingAttachment>, StoreError>;

    /// Store the extracted text of one file as sequenced chunks, all or
    /// nothing.
    async fn store_attachment_text(
        &self,
        file_id: i64,
        chunks: &[&str],
        meta: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexable_content_types() {
        assert!(is_indexable_content_type("application/pdf"));
        assert!(is_indexable_content_type("text/plain"));
        assert!(!is_indexable_content_type("image/png"));
        assert!(!is_indexable_content_type("Video/MP4"));
        assert!(!is_indexable_content_type("application/x-executable; arch=x86"));
        assert!(!is_indexable_content_type("application/x-java-archive"));
        assert!(is_indexable_content_type("application/x-java-archive-diff"));
    }
}
