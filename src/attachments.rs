//! Attachment text indexing pipeline.
//!
//! Fills the attachment-text table that the search engine reads as its
//! sixth source. For every attachment without stored text:
//!
//! 1. Resolve the file path and repair the recorded content type.
//! 2. Extract text with the configured [`AttachmentTextExtractor`].
//! 3. Drop NUL characters and cap the text at `max_content_bytes`.
//! 4. Split into whitespace-bounded chunks and store them in one
//!    transaction. When storage fails the chunk size is halved and the
//!    whole file retried, down to `min_chunk_bytes`.
//!
//! Extraction failures are logged and counted; one bad file never stops
//! the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use mantis_search_core::chunk::{split_at_whitespace, truncate_at_char_boundary};
use mantis_search_core::error::StoreError;
use mantis_search_core::store::AttachmentStore;

use crate::config::{AttachmentsConfig, Config};
use crate::db;
use crate::extract::{AttachmentTextExtractor, LocalExtractor};
use crate::pg_store::PgIndex;
use crate::tika::TikaExtractor;

/// Size limits for stored attachment text.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPolicy {
    pub max_content_bytes: usize,
    pub initial_chunk_bytes: usize,
    pub min_chunk_bytes: usize,
    pub max_chunks: usize,
}

impl From<&AttachmentsConfig> for ChunkPolicy {
    fn from(cfg: &AttachmentsConfig) -> Self {
        Self {
            max_content_bytes: cfg.max_content_bytes,
            initial_chunk_bytes: cfg.initial_chunk_bytes,
            min_chunk_bytes: cfg.min_chunk_bytes,
            max_chunks: cfg.max_chunks,
        }
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        ChunkPolicy::from(&AttachmentsConfig::default())
    }
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub files_root: Option<PathBuf>,
    pub policy: ChunkPolicy,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

/// Counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentReport {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of storing one file's text.
#[derive(Debug, PartialEq)]
pub enum StoreOutcome {
    Stored { chunks: usize, chunk_bytes: usize },
    TooManyChunks { chunks: usize },
    Rejected(String),
    Failed(String),
}

/// On-disk location of an attachment. A bare `diskfile` lives inside
/// `folder`; relative results are resolved against `root`.
pub fn resolve_path(root: Option<&Path>, folder: &str, diskfile: &str) -> PathBuf {
    let path = if !folder.is_empty() && !diskfile.contains('/') {
        Path::new(folder).join(diskfile)
    } else {
        PathBuf::from(diskfile)
    };
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}

/// Drop MIME parameters and repair `x/application/y` to `x/y`.
pub fn normalize_content_type(raw: &str) -> String {
    let base = raw.split(';').next().unwrap_or_default().trim();
    match base.split_once("/application/") {
        Some((pre, post)) => format!("{}/{}", pre, post),
        None => base.to_string(),
    }
}

/// Remove NUL characters and cap the text length on a char boundary.
pub fn prepare_content(content: &str, max_bytes: usize) -> String {
    let cleaned: String = content.chars().filter(|&c| c != '\0').collect();
    truncate_at_char_boundary(&cleaned, max_bytes).to_string()
}

/// Strip NUL characters from every string in a metadata value.
fn scrub_meta(value: &mut Value) {
    match value {
        Value::String(s) if s.contains('\0') => s.retain(|c| c != '\0'),
        Value::Array(items) => items.iter_mut().for_each(scrub_meta),
        Value::Object(map) => map.values_mut().for_each(scrub_meta),
        _ => {}
    }
}

/// Store `content` for one file, halving the chunk size after each
/// storage failure.
pub async fn store_with_shrinking_chunks<S>(
    store: &S,
    file_id: i64,
    content: &str,
    meta: &Value,
    policy: &ChunkPolicy,
) -> StoreOutcome
where
    S: AttachmentStore + ?Sized,
{
    let mut length = policy.initial_chunk_bytes;
    let mut last_err = String::from("no chunk size attempted");

    while length > policy.min_chunk_bytes {
        let chunks = split_at_whitespace(content, length);
        if chunks.len() > policy.max_chunks {
            return StoreOutcome::TooManyChunks {
                chunks: chunks.len(),
            };
        }

        match store.store_attachment_text(file_id, &chunks, meta).await {
            Ok(()) => {
                return StoreOutcome::Stored {
                    chunks: chunks.len(),
                    chunk_bytes: length,
                }
            }
            Err(StoreError::Rejected(msg)) => return StoreOutcome::Rejected(msg),
            Err(e) => {
                warn!(file_id, chunk_bytes = length, error = %e, "storing attachment text failed");
                last_err = e.to_string();
                length /= 2;
            }
        }
    }

    StoreOutcome::Failed(last_err)
}

/// Extract and store text for every pending attachment.
pub async fn index_pending<S, E>(
    store: &S,
    extractor: &E,
    opts: &PipelineOptions,
) -> Result<AttachmentReport, StoreError>
where
    S: AttachmentStore + ?Sized,
    E: AttachmentTextExtractor + ?Sized,
{
    let mut pending = store.pending_attachments().await?;
    if let Some(limit) = opts.limit {
        pending.truncate(limit);
    }
    info!(pending = pending.len(), "attachments awaiting extraction");

    let mut report = AttachmentReport::default();

    for file in pending {
        report.scanned += 1;
        let path = resolve_path(opts.files_root.as_deref(), &file.folder, &file.diskfile);
        let content_type = normalize_content_type(&file.file_type);

        if opts.dry_run {
            info!(file_id = file.file_id, path = %path.display(), content_type = %content_type, "would extract");
            continue;
        }

        let extracted = match extractor.extract(&path, &content_type).await {
            Ok(x) => x,
            Err(e) => {
                warn!(file_id = file.file_id, path = %path.display(), error = %e, "extraction failed");
                report.failed += 1;
                continue;
            }
        };

        let content = prepare_content(&extracted.content, opts.policy.max_content_bytes);
        let mut meta = extracted.meta;
        scrub_meta(&mut meta);

        match store_with_shrinking_chunks(store, file.file_id, &content, &meta, &opts.policy).await
        {
            StoreOutcome::Stored {
                chunks,
                chunk_bytes,
            } => {
                debug!(file_id = file.file_id, chunks, chunk_bytes, "attachment indexed");
                report.indexed += 1;
            }
            StoreOutcome::TooManyChunks { chunks } => {
                warn!(file_id = file.file_id, chunks, "attachment text too long, skipped");
                report.skipped += 1;
            }
            StoreOutcome::Rejected(msg) => {
                warn!(file_id = file.file_id, reason = %msg, "attachment text rejected, skipped");
                report.skipped += 1;
            }
            StoreOutcome::Failed(msg) => {
                warn!(file_id = file.file_id, error = %msg, "attachment could not be stored");
                report.failed += 1;
            }
        }
    }

    info!(
        scanned = report.scanned,
        indexed = report.indexed,
        skipped = report.skipped,
        failed = report.failed,
        "attachment indexing finished"
    );
    Ok(report)
}

/// CLI entry point for `msearch attachments`.
pub async fn run_index_attachments(
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
    tika_url: Option<&str>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = PgIndex::new(pool, config);
    let att = &config.attachments;

    let tika_url = match tika_url {
        Some(url) => Some(url),
        None if att.extractor == "tika" => Some(att.tika_url.as_str()),
        None => None,
    };
    let extractor: Box<dyn AttachmentTextExtractor> = match tika_url {
        Some(url) => {
            info!(tika = url, "extracting attachments with Tika");
            Box::new(TikaExtractor::new(
                url,
                Duration::from_secs(att.timeout_secs),
                att.max_retries,
            )?)
        }
        None => Box::new(LocalExtractor),
    };

    let opts = PipelineOptions {
        files_root: att.files_root.clone(),
        policy: ChunkPolicy::from(att),
        limit,
        dry_run,
    };

    let report = index_pending(&index, extractor.as_ref(), &opts).await?;

    if dry_run {
        println!("Dry run: {} attachment(s) would be extracted.", report.scanned);
    } else {
        println!(
            "Attachments: {} scanned, {} indexed, {} skipped, {} failed.",
            report.scanned, report.indexed, report.skipped, report.failed
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mantis_search_core::store::memory::{AttachmentRecord, InMemoryIndex};
    use serde_json::json;
    use std::collections::HashMap;

    use crate::extract::{ExtractError, Extracted};

    /// Serves canned text keyed by file name.
    struct CannedExtractor {
        texts: HashMap<String, String>,
    }

    #[async_trait]
    impl AttachmentTextExtractor for CannedExtractor {
        async fn extract(&self, path: &Path, content_type: &str) -> Result<Extracted, ExtractError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match self.texts.get(name) {
                Some(text) => Ok(Extracted {
                    content: text.clone(),
                    meta: json!({ "Content-Type": content_type, "title": "a\u{0}b" }),
                }),
                None => Err(ExtractError::Tika(format!("500: no such file {}", name))),
            }
        }
    }

    fn attachment(file_id: i64, diskfile: &str, file_type: &str) -> AttachmentRecord {
        AttachmentRecord {
            file_id,
            issue_id: 1,
            folder: "/srv/mantis/files".to_string(),
            diskfile: diskfile.to_string(),
            file_type: file_type.to_string(),
        }
    }

    fn extractor(entries: &[(&str, &str)]) -> CannedExtractor {
        CannedExtractor {
            texts: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path(None, "/srv/files", "abc123"),
            PathBuf::from("/srv/files/abc123")
        );
        assert_eq!(
            resolve_path(None, "/srv/files", "/elsewhere/abc"),
            PathBuf::from("/elsewhere/abc")
        );
        assert_eq!(
            resolve_path(Some(Path::new("/mnt")), "files", "abc"),
            PathBuf::from("/mnt/files/abc")
        );
        assert_eq!(resolve_path(Some(Path::new("/mnt")), "", "abc"), PathBuf::from("/mnt/abc"));
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("text/plain; charset=utf-8"), "text/plain");
        assert_eq!(
            normalize_content_type("application/application/pdf"),
            "application/pdf"
        );
        assert_eq!(normalize_content_type("application/pdf"), "application/pdf");
        assert_eq!(normalize_content_type(""), "");
    }

    #[test]
    fn test_prepare_content() {
        assert_eq!(prepare_content("a\0b\0c", 100), "abc");
        assert_eq!(prepare_content("héllo", 2), "h");
    }

    #[test]
    fn test_scrub_meta() {
        let mut meta = json!({ "a": "x\u{0}y", "b": ["\u{0}"], "c": { "d": 1 } });
        scrub_meta(&mut meta);
        assert_eq!(meta, json!({ "a": "xy", "b": [""], "c": { "d": 1 } }));
    }

    #[tokio::test]
    async fn test_pipeline_indexes_and_counts() {
        let index = InMemoryIndex::new();
        index.insert_attachment(attachment(1, "one", "text/plain; charset=utf-8"));
        index.insert_attachment(attachment(2, "two", "application/pdf"));
        index.insert_attachment(attachment(3, "three", "image/png"));
        let extractor = extractor(&[("one", "disk full\0 again")]);

        let report = index_pending(&index, &extractor, &PipelineOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report,
            AttachmentReport {
                scanned: 2,
                indexed: 1,
                skipped: 0,
                failed: 1
            }
        );
        assert_eq!(index.attachment_chunks(1), vec!["disk full again"]);
        let meta = index.attachment_meta(1).unwrap();
        assert_eq!(meta["Content-Type"], "text/plain");
        assert_eq!(meta["title"], "ab");
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let index = InMemoryIndex::new();
        index.insert_attachment(attachment(1, "one", "text/plain"));
        let extractor = extractor(&[("one", "text")]);
        let opts = PipelineOptions {
            dry_run: true,
            ..PipelineOptions::default()
        };

        let report = index_pending(&index, &extractor, &opts).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.indexed, 0);
        assert!(index.attachment_chunks(1).is_empty());
    }

    #[tokio::test]
    async fn test_limit_applies() {
        let index = InMemoryIndex::new();
        for id in 1..=5 {
            index.insert_attachment(attachment(id, &format!("f{}", id), "text/plain"));
        }
        let extractor = extractor(&[("f1", "a"), ("f2", "b"), ("f3", "c")]);
        let opts = PipelineOptions {
            limit: Some(2),
            ..PipelineOptions::default()
        };
        let report = index_pending(&index, &extractor, &opts).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.indexed, 2);
    }

    #[tokio::test]
    async fn test_chunk_size_halves_until_storable() {
        let index = InMemoryIndex::new().with_max_vector_bytes(30);
        let policy = ChunkPolicy {
            max_content_bytes: 1000,
            initial_chunk_bytes: 100,
            min_chunk_bytes: 10,
            max_chunks: 100,
        };
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";

        let outcome = store_with_shrinking_chunks(&index, 7, text, &json!({}), &policy).await;

        assert_eq!(
            outcome,
            StoreOutcome::Stored {
                chunks: index.attachment_chunks(7).len(),
                chunk_bytes: 25
            }
        );
        assert_eq!(index.attachment_chunks(7).concat(), text);
    }

    #[tokio::test]
    async fn test_too_many_chunks_skips() {
        let index = InMemoryIndex::new();
        let policy = ChunkPolicy {
            max_content_bytes: 1000,
            initial_chunk_bytes: 20,
            min_chunk_bytes: 4,
            max_chunks: 2,
        };
        let text = "one two three four five six seven eight nine ten";
        let outcome = store_with_shrinking_chunks(&index, 1, text, &json!({}), &policy).await;
        assert!(matches!(outcome, StoreOutcome::TooManyChunks { .. }));
        assert!(index.attachment_chunks(1).is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_at_min_chunk_size() {
        let index = InMemoryIndex::new().with_max_vector_bytes(4);
        let policy = ChunkPolicy {
            max_content_bytes: 1000,
            initial_chunk_bytes: 40,
            min_chunk_bytes: 10,
            max_chunks: 100,
        };
        let outcome =
            store_with_shrinking_chunks(&index, 1, "abcdefghijklmnop", &json!({}), &policy).await;
        assert!(matches!(outcome, StoreOutcome::Failed(_)));
    }
}
