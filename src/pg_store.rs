//! PostgreSQL backend.
//!
//! Implements the core storage traits on top of the Mantis schema. Text
//! search is delegated to PostgreSQL: `to_tsvector` builds the lexical
//! vectors, `websearch_to_tsquery` parses queries, `ts_rank_cd` ranks and
//! `ts_headline` highlights.
//!
//! # Persisted layout
//!
//! | Relation | Contents |
//! |----------|----------|
//! | `mantis_search_fragment_mv` | materialized union of the five issue and note sources |
//! | `mantis_plugin_attachment_search_table` | extracted attachment text, one row per chunk |
//!
//! The text-search configuration and read role are validated identifiers
//! (see [`crate::config::is_identifier`]). They are interpolated into DDL,
//! where parameters are not allowed. Every query binds its values.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info};

use mantis_search_core::error::{BuildError, SearchError, StoreError};
use mantis_search_core::models::{Candidate, SourceType};
use mantis_search_core::rank::Normalization;
use mantis_search_core::store::{
    AttachmentStore, BuildSummary, FragmentIndex, IndexBuilder, PendingAttachment,
};

use crate::config::Config;

/// Materialized view holding the five unified sources.
pub const FRAGMENT_VIEW: &str = "mantis_search_fragment_mv";
/// Attachment text table, populated by the extraction pipeline.
pub const ATTACHMENT_TABLE: &str = "mantis_plugin_attachment_search_table";

const UNDEFINED_TABLE: &str = "42P01";
const CHARACTER_NOT_IN_REPERTOIRE: &str = "22021";
const UNTRANSLATABLE_CHARACTER: &str = "22P05";

/// A query as PostgreSQL will see it: the raw text, parsed server-side.
#[derive(Debug, Clone)]
pub struct PgQuery {
    text: String,
}

/// PostgreSQL implementation of every storage trait.
pub struct PgIndex {
    pool: PgPool,
    ts_config: String,
    read_role: String,
    normalization: Normalization,
    headline_options: String,
    build_lock: Mutex<()>,
}

impl PgIndex {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            ts_config: config.retrieval.text_search_config.clone(),
            read_role: config.db.read_role.clone(),
            normalization: config.retrieval.normalization(),
            headline_options: config.retrieval.headline.to_option_string(),
            build_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn view_exists(&self) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(FRAGMENT_VIEW)
            .fetch_one(&self.pool)
            .await
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.into_owned())
}

fn search_error(err: sqlx::Error) -> SearchError {
    match sqlstate(&err).as_deref() {
        Some(UNDEFINED_TABLE) => SearchError::IndexNotBuilt,
        _ => SearchError::storage(err),
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    match sqlstate(&err).as_deref() {
        Some(CHARACTER_NOT_IN_REPERTOIRE) | Some(UNTRANSLATABLE_CHARACTER) => {
            StoreError::Rejected(err.to_string())
        }
        _ => StoreError::storage(err),
    }
}

/// `CREATE MATERIALIZED VIEW` statement for the unified index.
pub fn create_view_sql(ts_config: &str) -> String {
    format!(
        r#"CREATE MATERIALIZED VIEW IF NOT EXISTS {view} AS
  SELECT id AS bug_id, 'Bs' AS typ, id, to_tsvector('{cfg}', summary) AS tsvec
    FROM mantis_bug_table
  UNION ALL
  SELECT B.id AS bug_id, 'Td' AS typ, A.id, to_tsvector('{cfg}', A.description) AS tsvec
    FROM mantis_bug_text_table A
         INNER JOIN mantis_bug_table B ON B.bug_text_id = A.id
  UNION ALL
  SELECT B.id AS bug_id, 'Ta' AS typ, A.id, to_tsvector('{cfg}', A.additional_information) AS tsvec
    FROM mantis_bug_text_table A
         INNER JOIN mantis_bug_table B ON B.bug_text_id = A.id
  UNION ALL
  SELECT B.id AS bug_id, 'Ts' AS typ, A.id, to_tsvector('{cfg}', A.steps_to_reproduce) AS tsvec
    FROM mantis_bug_text_table A
         INNER JOIN mantis_bug_table B ON B.bug_text_id = A.id
  UNION ALL
  SELECT B.bug_id, 'N' AS typ, B.id, to_tsvector('{cfg}', A.note) AS tsvec
    FROM mantis_bugnote_text_table A
         INNER JOIN mantis_bugnote_table B ON B.bugnote_text_id = A.id"#,
        view = FRAGMENT_VIEW,
        cfg = ts_config,
    )
}

/// The build batch, in execution order. `view_exists` switches the view
/// step from creation to refresh.
pub fn build_statements(ts_config: &str, read_role: &str, view_exists: bool) -> Vec<String> {
    let view_step = if view_exists {
        format!("REFRESH MATERIALIZED VIEW {}", FRAGMENT_VIEW)
    } else {
        create_view_sql(ts_config)
    };
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (file_id INTEGER, seq SMALLINT, meta JSONB, content TEXT, tsvec TSVECTOR)",
            t = ATTACHMENT_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {t}_idx_file_id ON {t} (file_id)",
            t = ATTACHMENT_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {t}_idx_tsvec ON {t} USING GIN (tsvec)",
            t = ATTACHMENT_TABLE
        ),
        view_step,
        format!(
            "CREATE INDEX IF NOT EXISTS {v}_idx_typ_id ON {v} (typ, id)",
            v = FRAGMENT_VIEW
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {v}_idx_tsvec ON {v} USING GIN (tsvec)",
            v = FRAGMENT_VIEW
        ),
        format!("GRANT SELECT ON {} TO {}", FRAGMENT_VIEW, read_role),
        format!("GRANT SELECT ON {} TO {}", ATTACHMENT_TABLE, read_role),
    ]
}

/// Per-source match statement. Binds: `$1` text-search config, `$2`
/// query text, `$3` normalization, `$4` limit.
pub fn match_sql(source: SourceType) -> String {
    const QUERY_CTE: &str =
        "WITH q AS (SELECT websearch_to_tsquery($1::regconfig, $2) AS query)";

    if source.is_attachment() {
        return format!(
            r#"{cte}
SELECT issue_id, fragment_id, rank, document FROM (
  SELECT DISTINCT ON (A.file_id)
         F.bug_id::bigint AS issue_id, A.file_id::bigint AS fragment_id,
         ts_rank_cd(A.tsvec, q.query, $3) AS rank, COALESCE(A.content, '') AS document
    FROM {table} A
         INNER JOIN mantis_bug_file_table F ON F.id = A.file_id, q
   WHERE A.tsvec @@ q.query
   ORDER BY A.file_id, rank DESC, A.seq ASC
) best
ORDER BY rank DESC, fragment_id ASC
LIMIT $4"#,
            cte = QUERY_CTE,
            table = ATTACHMENT_TABLE,
        );
    }

    let (join, column) = match source {
        SourceType::IssueSummary => ("INNER JOIN mantis_bug_table B ON B.id = A.id", "B.summary"),
        SourceType::IssueDescription => (
            "INNER JOIN mantis_bug_text_table B ON B.id = A.id",
            "B.description",
        ),
        SourceType::IssueAdditionalInfo => (
            "INNER JOIN mantis_bug_text_table B ON B.id = A.id",
            "B.additional_information",
        ),
        SourceType::IssueReproSteps => (
            "INNER JOIN mantis_bug_text_table B ON B.id = A.id",
            "B.steps_to_reproduce",
        ),
        _ => (
            "INNER JOIN mantis_bugnote_table N ON N.id = A.id \
             INNER JOIN mantis_bugnote_text_table B ON B.id = N.bugnote_text_id",
            "B.note",
        ),
    };

    format!(
        r#"{cte}
SELECT A.bug_id::bigint AS issue_id, A.id::bigint AS fragment_id,
       ts_rank_cd(A.tsvec, q.query, $3) AS rank, COALESCE({column}, '') AS document
  FROM {view} A
       {join}, q
 WHERE A.typ = '{code}' AND A.tsvec @@ q.query
 ORDER BY rank DESC, A.id ASC
 LIMIT $4"#,
        cte = QUERY_CTE,
        column = column,
        view = FRAGMENT_VIEW,
        join = join,
        code = source.code(),
    )
}

/// Attachments with no stored text. The content-type filter is
/// case-insensitive, matching
/// [`mantis_search_core::store::is_indexable_content_type`].
pub fn pending_sql() -> String {
    format!(
        r#"SELECT A.id::bigint AS file_id, A.bug_id::bigint AS issue_id,
       COALESCE(A.folder, '') AS folder, COALESCE(A.diskfile, '') AS diskfile,
       COALESCE(A.file_type, '') AS file_type
  FROM mantis_bug_file_table A
 WHERE NOT EXISTS (SELECT 1 FROM {table} X WHERE X.file_id = A.id)
   AND NOT (lower(btrim(COALESCE(A.file_type, ''))) LIKE ANY (ARRAY[
         'image/%', 'video/%', 'application/x-executable%', 'application/x-java-archive']))
 ORDER BY A.id"#,
        table = ATTACHMENT_TABLE
    )
}

#[async_trait]
impl FragmentIndex for PgIndex {
    type Query = PgQuery;

    fn parse_query(&self, text: &str) -> Result<PgQuery, SearchError> {
        Ok(PgQuery {
            text: text.to_string(),
        })
    }

    async fn match_source(
        &self,
        query: &PgQuery,
        source: SourceType,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&match_sql(source))
            .bind(&self.ts_config)
            .bind(&query.text)
            .bind(self.normalization.bits() as i32)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(search_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(Candidate {
                    issue_id: row.try_get("issue_id")?,
                    source_type: source,
                    fragment_id: row.try_get("fragment_id")?,
                    rank: row.try_get("rank")?,
                    document: row.try_get("document")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(SearchError::storage)
    }

    async fn headline(&self, query: &PgQuery, document: &str) -> Result<String, SearchError> {
        sqlx::query_scalar::<_, String>(
            "SELECT ts_headline($1::regconfig, $2, websearch_to_tsquery($1::regconfig, $3), $4)",
        )
        .bind(&self.ts_config)
        .bind(document)
        .bind(&query.text)
        .bind(&self.headline_options)
        .fetch_one(&self.pool)
        .await
        .map_err(search_error)
    }
}

#[async_trait]
impl IndexBuilder for PgIndex {
    async fn build_or_refresh(&self) -> Result<BuildSummary, BuildError> {
        let _guard = self.build_lock.lock().await;

        let refreshed = self
            .view_exists()
            .await
            .map_err(|e| BuildError::new("SELECT to_regclass($1) IS NOT NULL", e.to_string()))?;

        let statements = build_statements(&self.ts_config, &self.read_role, refreshed);
        for stmt in &statements {
            debug!(statement = %stmt, "executing build statement");
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| BuildError::new(stmt.clone(), e.to_string()))?;
        }

        info!(refreshed, statements = statements.len(), "search index ready");
        Ok(BuildSummary {
            refreshed,
            statements: statements.len(),
        })
    }
}

#[async_trait]
impl AttachmentStore for PgIndex {
    async fn pending_attachments(&self) -> Result<Vec<PendingAttachment>, StoreError> {
        let sql = pending_sql();

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingAttachment {
                    file_id: row.try_get("file_id")?,
                    issue_id: row.try_get("issue_id")?,
                    folder: row.try_get("folder")?,
                    diskfile: row.try_get("diskfile")?,
                    file_type: row.try_get("file_type")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::storage)
    }

    async fn store_attachment_text(
        &self,
        file_id: i64,
        chunks: &[&str],
        meta: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let insert = format!(
            "INSERT INTO {} (file_id, seq, meta, content, tsvec) \
             VALUES ($1, $2, $3, $4, to_tsvector($5::regconfig, $4))",
            ATTACHMENT_TABLE
        );

        let mut tx = self.pool.begin().await.map_err(StoreError::storage)?;

        sqlx::query(&format!("DELETE FROM {} WHERE file_id = $1", ATTACHMENT_TABLE))
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        for (seq, chunk) in chunks.iter().enumerate() {
            let seq = i16::try_from(seq)
                .map_err(|_| StoreError::Rejected(format!("too many chunks ({})", chunks.len())))?;
            sqlx::query(&insert)
                .bind(file_id)
                .bind(seq)
                .bind(Json(meta))
                .bind(*chunk)
                .bind(&self.ts_config)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        tx.commit().await.map_err(StoreError::storage)?;
        debug!(file_id, chunks = chunks.len(), "stored attachment text");
        Ok(())
    }
}
