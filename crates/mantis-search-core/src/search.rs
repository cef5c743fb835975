//! Ranked query engine.
//!
//! The engine operates entirely through the [`FragmentIndex`] trait, with
//! no database or configuration dependencies. The calling application
//! constructs the backend and hands the engine a shared handle to it.
//!
//! # Algorithm
//!
//! 1. Return no results for an empty query, without touching storage.
//! 2. Coerce the limit ([`effective_limit`]).
//! 3. Parse the query once through the backend.
//! 4. Match and rank each of the six sources concurrently, each capped
//!    at `limit` (a superset of the global top `limit`).
//! 5. Merge and sort by rank (desc), source type (asc), fragment id (asc).
//! 6. Truncate to `limit`.
//! 7. Highlight only the survivors, concurrently, preserving order.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::error::SearchError;
use crate::models::{effective_limit, Candidate, SearchResult, SourceType};
use crate::store::FragmentIndex;

/// Query engine bound to one storage backend.
///
/// Holds no mutable state; clones share the backend and any number of
/// searches may run at once.
pub struct SearchEngine<I> {
    index: Arc<I>,
}

impl<I> Clone for SearchEngine<I> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
        }
    }
}

impl<I: FragmentIndex> SearchEngine<I> {
    pub fn new(index: Arc<I>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    /// Run a ranked search.
    ///
    /// `limit` values that are absent, zero or negative fall back to the
    /// default of 10; anything else is used as given. "No matches" is
    /// `Ok(vec![])`; an `Err` means the search could not be executed.
    pub async fn search(
        &self,
        query_text: &str,
        limit: Option<i64>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let limit = effective_limit(limit);
        let query = self.index.parse_query(query_text)?;

        let per_source = try_join_all(
            SourceType::ALL
                .into_iter()
                .map(|source| self.index.match_source(&query, source, limit)),
        )
        .await?;

        for (source, hits) in SourceType::ALL.iter().zip(per_source.iter()) {
            debug!(source = %source, candidates = hits.len(), "source matched");
        }

        let mut candidates: Vec<Candidate> = per_source.into_iter().flatten().collect();
        let total = candidates.len();
        merge_order(&mut candidates);
        candidates.truncate(limit);

        let snippets = try_join_all(
            candidates
                .iter()
                .map(|c| self.index.headline(&query, &c.document)),
        )
        .await?;

        debug!(candidates = total, returned = candidates.len(), "search complete");

        Ok(candidates
            .into_iter()
            .zip(snippets)
            .map(|(c, snippet)| SearchResult {
                issue_id: c.issue_id,
                source_type: c.source_type,
                fragment_id: c.fragment_id,
                rank: c.rank,
                snippet,
            })
            .collect())
    }
}

/// Sort candidates into result order: rank (desc), source type (asc),
/// fragment id (asc).
pub fn merge_order(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.rank
            .total_cmp(&a.rank)
            .then_with(|| a.source_type.cmp(&b.source_type))
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });
}
