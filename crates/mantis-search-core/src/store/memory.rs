//! In-memory backend for tests and embedded callers.
//!
//! Mirrors the PostgreSQL layout: live host tables (issues with their
//! text block, notes, attachment files), a refreshable snapshot of the
//! five unified sources, and a separate attachment-text table. Lexical
//! analysis, ranking and headlines come from [`crate::lexer`],
//! [`crate::rank`] and [`crate::headline`].
//!
//! Everything sits behind `std::sync::RwLock`. A build holds the snapshot
//! write lock for its whole duration, so searches wait for it and
//! overlapping builds run one after the other.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{BuildError, SearchError, StoreError};
use crate::headline::{headline, HeadlineOptions};
use crate::lexer::LexicalVector;
use crate::models::{Candidate, SourceType};
use crate::query::TextQuery;
use crate::rank::{cover_density, Normalization};

use super::{
    is_indexable_content_type, AttachmentStore, BuildSummary, FragmentIndex, IndexBuilder,
    PendingAttachment,
};

/// Largest text accepted for one lexical vector, matching the
/// PostgreSQL `tsvector` limit.
pub const DEFAULT_MAX_VECTOR_BYTES: usize = 1_048_575;

/// An issue row joined with its text block.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    pub id: i64,
    /// Id of the text block holding description, additional information
    /// and steps to reproduce.
    pub text_id: i64,
    pub summary: String,
    pub description: String,
    pub additional_information: String,
    pub steps_to_reproduce: String,
}

impl IssueRecord {
    /// An issue whose text block id equals its own id and whose long
    /// fields are empty.
    pub fn new(id: i64, summary: impl Into<String>) -> Self {
        Self {
            id,
            text_id: id,
            summary: summary.into(),
            description: String::new(),
            additional_information: String::new(),
            steps_to_reproduce: String::new(),
        }
    }

    pub fn with_text_id(mut self, text_id: i64) -> Self {
        self.text_id = text_id;
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn with_additional_information(mut self, text: impl Into<String>) -> Self {
        self.additional_information = text.into();
        self
    }

    pub fn with_steps_to_reproduce(mut self, text: impl Into<String>) -> Self {
        self.steps_to_reproduce = text.into();
        self
    }
}

/// A note on an issue.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    pub id: i64,
    pub issue_id: i64,
    pub text: String,
}

impl NoteRecord {
    pub fn new(id: i64, issue_id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            issue_id,
            text: text.into(),
        }
    }
}

/// An attachment file record.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRecord {
    pub file_id: i64,
    pub issue_id: i64,
    pub folder: String,
    pub diskfile: String,
    pub file_type: String,
}

impl AttachmentRecord {
    pub fn new(file_id: i64, issue_id: i64, file_type: impl Into<String>) -> Self {
        Self {
            file_id,
            issue_id,
            folder: String::new(),
            diskfile: format!("file-{}", file_id),
            file_type: file_type.into(),
        }
    }
}

struct IndexedFragment {
    issue_id: i64,
    source_type: SourceType,
    fragment_id: i64,
    vector: LexicalVector,
}

struct AttachmentTextRow {
    file_id: i64,
    seq: usize,
    meta: serde_json::Value,
    content: String,
    vector: LexicalVector,
}

#[derive(Debug, Error)]
#[error("text is too long for a lexical vector ({len} bytes, max {max} bytes)")]
struct VectorTooLong {
    len: usize,
    max: usize,
}

/// Complete in-process backend implementing every storage trait.
pub struct InMemoryIndex {
    issues: RwLock<BTreeMap<i64, IssueRecord>>,
    notes: RwLock<BTreeMap<i64, NoteRecord>>,
    files: RwLock<BTreeMap<i64, AttachmentRecord>>,
    snapshot: RwLock<Option<Vec<IndexedFragment>>>,
    attachment_text: RwLock<Vec<AttachmentTextRow>>,
    normalization: Normalization,
    headline_options: HeadlineOptions,
    max_vector_bytes: usize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            issues: RwLock::new(BTreeMap::new()),
            notes: RwLock::new(BTreeMap::new()),
            files: RwLock::new(BTreeMap::new()),
            snapshot: RwLock::new(None),
            attachment_text: RwLock::new(Vec::new()),
            normalization: Normalization::default(),
            headline_options: HeadlineOptions::default(),
            max_vector_bytes: DEFAULT_MAX_VECTOR_BYTES,
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_headline_options(mut self, options: HeadlineOptions) -> Self {
        self.headline_options = options;
        self
    }

    pub fn with_max_vector_bytes(mut self, max: usize) -> Self {
        self.max_vector_bytes = max;
        self
    }

    /// Insert or replace an issue. Not visible to searches until the next build.
    pub fn insert_issue(&self, issue: IssueRecord) {
        write(&self.issues).insert(issue.id, issue);
    }

    pub fn remove_issue(&self, id: i64) -> Option<IssueRecord> {
        write(&self.issues).remove(&id)
    }

    /// Insert or replace a note. Not visible to searches until the next build.
    pub fn insert_note(&self, note: NoteRecord) {
        write(&self.notes).insert(note.id, note);
    }

    pub fn remove_note(&self, id: i64) -> Option<NoteRecord> {
        write(&self.notes).remove(&id)
    }

    pub fn insert_attachment(&self, file: AttachmentRecord) {
        write(&self.files).insert(file.file_id, file);
    }

    /// Number of fragments in the current snapshot, `None` before the first build.
    pub fn fragment_count(&self) -> Option<usize> {
        read(&self.snapshot).as_ref().map(Vec::len)
    }

    /// Stored chunks of one attachment, in sequence order.
    pub fn attachment_chunks(&self, file_id: i64) -> Vec<String> {
        let rows = read(&self.attachment_text);
        let mut chunks: Vec<(usize, String)> = rows
            .iter()
            .filter(|r| r.file_id == file_id)
            .map(|r| (r.seq, r.content.clone()))
            .collect();
        chunks.sort_by_key(|(seq, _)| *seq);
        chunks.into_iter().map(|(_, c)| c).collect()
    }

    /// Metadata stored with an attachment's first chunk.
    pub fn attachment_meta(&self, file_id: i64) -> Option<serde_json::Value> {
        read(&self.attachment_text)
            .iter()
            .filter(|r| r.file_id == file_id)
            .min_by_key(|r| r.seq)
            .map(|r| r.meta.clone())
    }

    fn unified_candidates(
        &self,
        query: &TextQuery,
        source: SourceType,
    ) -> Result<Vec<Candidate>, SearchError> {
        let snapshot = read(&self.snapshot);
        let fragments = snapshot.as_ref().ok_or(SearchError::IndexNotBuilt)?;
        let issues = read(&self.issues);
        let notes = read(&self.notes);

        let candidates = fragments
            .iter()
            .filter(|f| f.source_type == source && query.matches(&f.vector))
            .filter_map(|f| {
                let document = live_text(&issues, &notes, f)?;
                Some(Candidate {
                    issue_id: f.issue_id,
                    source_type: f.source_type,
                    fragment_id: f.fragment_id,
                    rank: cover_density(&f.vector, query, self.normalization),
                    document,
                })
            })
            .collect();
        Ok(candidates)
    }

    /// Best-ranked chunk per file, joined to the file table for the issue.
    fn attachment_candidates(&self, query: &TextQuery) -> Result<Vec<Candidate>, SearchError> {
        if read(&self.snapshot).is_none() {
            return Err(SearchError::IndexNotBuilt);
        }
        let rows = read(&self.attachment_text);
        let files = read(&self.files);

        let mut best: BTreeMap<i64, (f32, usize, &AttachmentTextRow)> = BTreeMap::new();
        for row in rows.iter().filter(|r| query.matches(&r.vector)) {
            let rank = cover_density(&row.vector, query, self.normalization);
            let better = match best.get(&row.file_id) {
                Some((r, seq, _)) => rank > *r || (rank == *r && row.seq < *seq),
                None => true,
            };
            if better {
                best.insert(row.file_id, (rank, row.seq, row));
            }
        }

        let candidates = best
            .into_iter()
            .filter_map(|(file_id, (rank, _, row))| {
                let file = files.get(&file_id)?;
                Some(Candidate {
                    issue_id: file.issue_id,
                    source_type: SourceType::AttachmentText,
                    fragment_id: file_id,
                    rank,
                    document: row.content.clone(),
                })
            })
            .collect();
        Ok(candidates)
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Current text of the field a snapshot row was built from, or `None`
/// if the row has since disappeared.
fn live_text(
    issues: &BTreeMap<i64, IssueRecord>,
    notes: &BTreeMap<i64, NoteRecord>,
    fragment: &IndexedFragment,
) -> Option<String> {
    let text_block = || {
        issues
            .get(&fragment.issue_id)
            .filter(|i| i.text_id == fragment.fragment_id)
    };
    match fragment.source_type {
        SourceType::IssueSummary => issues.get(&fragment.fragment_id).map(|i| i.summary.clone()),
        SourceType::IssueDescription => text_block().map(|i| i.description.clone()),
        SourceType::IssueAdditionalInfo => text_block().map(|i| i.additional_information.clone()),
        SourceType::IssueReproSteps => text_block().map(|i| i.steps_to_reproduce.clone()),
        SourceType::NoteText => notes.get(&fragment.fragment_id).map(|n| n.text.clone()),
        SourceType::AttachmentText => None,
    }
}

fn collect_fragments(
    issues: &BTreeMap<i64, IssueRecord>,
    notes: &BTreeMap<i64, NoteRecord>,
) -> Vec<IndexedFragment> {
    let mut out = Vec::with_capacity(issues.len() * 4 + notes.len());
    for issue in issues.values() {
        let fields = [
            (SourceType::IssueSummary, issue.id, &issue.summary),
            (SourceType::IssueDescription, issue.text_id, &issue.description),
            (SourceType::IssueAdditionalInfo, issue.text_id, &issue.additional_information),
            (SourceType::IssueReproSteps, issue.text_id, &issue.steps_to_reproduce),
        ];
        for (source_type, fragment_id, text) in fields {
            out.push(IndexedFragment {
                issue_id: issue.id,
                source_type,
                fragment_id,
                vector: LexicalVector::from_text(text),
            });
        }
    }
    for note in notes.values() {
        out.push(IndexedFragment {
            issue_id: note.issue_id,
            source_type: SourceType::NoteText,
            fragment_id: note.id,
            vector: LexicalVector::from_text(&note.text),
        });
    }
    out
}

/// Rank descending, then fragment id ascending.
fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.rank
            .total_cmp(&a.rank)
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });
}

#[async_trait]
impl FragmentIndex for InMemoryIndex {
    type Query = TextQuery;

    fn parse_query(&self, text: &str) -> Result<TextQuery, SearchError> {
        Ok(TextQuery::parse(text))
    }

    async fn match_source(
        &self,
        query: &TextQuery,
        source: SourceType,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let mut candidates = if source.is_attachment() {
            self.attachment_candidates(query)?
        } else {
            self.unified_candidates(query, source)?
        };
        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn headline(&self, query: &TextQuery, document: &str) -> Result<String, SearchError> {
        Ok(headline(document, query, &self.headline_options))
    }
}

#[async_trait]
impl IndexBuilder for InMemoryIndex {
    async fn build_or_refresh(&self) -> Result<BuildSummary, BuildError> {
        let mut snapshot = write(&self.snapshot);
        let refreshed = snapshot.is_some();
        let fragments = {
            let issues = read(&self.issues);
            let notes = read(&self.notes);
            collect_fragments(&issues, &notes)
        };
        info!(
            fragments = fragments.len(),
            refreshed, "in-memory index snapshot rebuilt"
        );
        *snapshot = Some(fragments);
        Ok(BuildSummary {
            refreshed,
            statements: 1,
        })
    }
}

#[async_trait]
impl AttachmentStore for InMemoryIndex {
    async fn pending_attachments(&self) -> Result<Vec<PendingAttachment>, StoreError> {
        let rows = read(&self.attachment_text);
        let files = read(&self.files);
        let pending = files
            .values()
            .filter(|f| is_indexable_content_type(&f.file_type))
            .filter(|f| !rows.iter().any(|r| r.file_id == f.file_id))
            .map(|f| PendingAttachment {
                file_id: f.file_id,
                issue_id: f.issue_id,
                folder: f.folder.clone(),
                diskfile: f.diskfile.clone(),
                file_type: f.file_type.clone(),
            })
            .collect();
        Ok(pending)
    }

    async fn store_attachment_text(
        &self,
        file_id: i64,
        chunks: &[&str],
        meta: &serde_json::Value,
    ) -> Result<(), StoreError> {
        for chunk in chunks {
            if chunk.contains('\0') {
                return Err(StoreError::Rejected(
                    "invalid byte sequence: 0x00".to_string(),
                ));
            }
            if chunk.len() > self.max_vector_bytes {
                return Err(StoreError::storage(VectorTooLong {
                    len: chunk.len(),
                    max: self.max_vector_bytes,
                }));
            }
        }

        let mut rows = write(&self.attachment_text);
        rows.retain(|r| r.file_id != file_id);
        for (seq, chunk) in chunks.iter().enumerate() {
            rows.push(AttachmentTextRow {
                file_id,
                seq,
                meta: meta.clone(),
                content: chunk.to_string(),
                vector: LexicalVector::from_text(chunk),
            });
        }
        debug!(file_id, chunks = chunks.len(), "stored attachment text");
        Ok(())
    }
}
