//! `msearch search`: ranked search from the command line.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use mantis_search_core::models::SearchResult;
use mantis_search_core::search::SearchEngine;

use crate::config::{Config, MantisConfig};
use crate::db;
use crate::pg_store::PgIndex;

/// A search result with its Mantis link, as printed and served.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    #[serde(flatten)]
    pub result: SearchResult,
    /// Source type code (`Bs`, `Td`, `Ta`, `Ts`, `N`, `F`).
    pub typ: &'static str,
    pub url: String,
}

impl SearchHit {
    pub fn new(result: SearchResult, mantis: &MantisConfig) -> Self {
        let url = mantis.link(&result.view_path());
        Self {
            typ: result.source_type.code(),
            url,
            result,
        }
    }
}

/// JSON envelope shared by `--json` output and `POST /search`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn new(results: Vec<SearchResult>, mantis: &MantisConfig) -> Self {
        Self {
            results: results
                .into_iter()
                .map(|r| SearchHit::new(r, mantis))
                .collect(),
        }
    }
}

pub async fn run_search(config: &Config, query: &str, limit: Option<i64>, json: bool) -> Result<()> {
    let results = if query.trim().is_empty() {
        Vec::new()
    } else {
        let pool = db::connect(config).await?;
        let engine = SearchEngine::new(Arc::new(PgIndex::new(pool.clone(), config)));
        let results = engine
            .search(query, limit)
            .await
            .with_context(|| format!("Search for {:?} failed", query))?;
        pool.close().await;
        results
    };

    let response = SearchResponse::new(results, &config.mantis);

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{} {}",
            i + 1,
            hit.result.rank,
            hit.typ,
            hit.result.issue_id,
            hit.url
        );
        println!(
            "    excerpt: \"{}\"",
            hit.result.snippet.replace('\n', " ").trim()
        );
        println!();
    }

    Ok(())
}
