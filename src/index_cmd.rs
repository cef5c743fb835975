//! `msearch init`: create or refresh the search index.

use anyhow::{Context, Result};

use mantis_search_core::store::IndexBuilder;

use crate::config::Config;
use crate::db;
use crate::pg_store::PgIndex;

pub async fn run_build(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = PgIndex::new(pool.clone(), config);

    let summary = index
        .build_or_refresh()
        .await
        .context("Search index build failed")?;

    if summary.refreshed {
        println!("Search index refreshed ({} statements).", summary.statements);
    } else {
        println!("Search index created ({} statements).", summary.statements);
    }

    pool.close().await;
    Ok(())
}
