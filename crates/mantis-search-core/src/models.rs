//! Core data models used throughout Mantis Search.
//!
//! These types represent the indexed fragments, ranked candidates, and
//! search results that flow through the query engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result cap used when the caller supplies no usable limit.
pub const DEFAULT_LIMIT: usize = 10;

/// The text source a fragment was indexed from.
///
/// The first five variants make up the unified index; attachment text
/// lives in its own table because it is populated by a separate
/// extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    IssueSummary,
    IssueDescription,
    IssueAdditionalInfo,
    IssueReproSteps,
    NoteText,
    AttachmentText,
}

impl SourceType {
    /// Every source, in tie-break order.
    pub const ALL: [SourceType; 6] = [
        SourceType::IssueSummary,
        SourceType::IssueDescription,
        SourceType::IssueAdditionalInfo,
        SourceType::IssueReproSteps,
        SourceType::NoteText,
        SourceType::AttachmentText,
    ];

    /// The sources materialized into the unified index.
    pub const UNIFIED: [SourceType; 5] = [
        SourceType::IssueSummary,
        SourceType::IssueDescription,
        SourceType::IssueAdditionalInfo,
        SourceType::IssueReproSteps,
        SourceType::NoteText,
    ];

    /// Short type tag stored in the unified index.
    pub fn code(self) -> &'static str {
        match self {
            SourceType::IssueSummary => "Bs",
            SourceType::IssueDescription => "Td",
            SourceType::IssueAdditionalInfo => "Ta",
            SourceType::IssueReproSteps => "Ts",
            SourceType::NoteText => "N",
            SourceType::AttachmentText => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        SourceType::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_attachment(self) -> bool {
        self == SourceType::AttachmentText
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::from_code(s).ok_or_else(|| format!("unknown source type code: '{}'", s))
    }
}

/// One tokenizable unit of text, as read from the host tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFragment {
    /// Parent issue.
    pub issue_id: i64,
    pub source_type: SourceType,
    /// Issue id, text-block id, note id, or file id depending on `source_type`.
    pub fragment_id: i64,
    pub raw_text: String,
}

/// A matched fragment before truncation and highlighting.
///
/// Carries the whole field text so the engine can highlight the
/// survivors without another lookup.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub issue_id: i64,
    pub source_type: SourceType,
    pub fragment_id: i64,
    /// Cover-density rank; non-negative, higher is better, unbounded.
    pub rank: f32,
    pub document: String,
}

/// One ranked hit returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub issue_id: i64,
    pub source_type: SourceType,
    pub fragment_id: i64,
    pub rank: f32,
    /// Query-highlighted excerpt of the matched field.
    pub snippet: String,
}

impl SearchResult {
    /// Relative Mantis link to the hit: the issue page, anchored on the
    /// note (`#c`) or attachment (`#f`) when the hit came from one.
    pub fn view_path(&self) -> String {
        match self.source_type {
            SourceType::NoteText => format!("view.php?id={}#c{}", self.issue_id, self.fragment_id),
            SourceType::AttachmentText => {
                format!("view.php?id={}#f{}", self.issue_id, self.fragment_id)
            }
            _ => format!("view.php?id={}", self.issue_id),
        }
    }
}

/// Coerce a caller-supplied limit: absent, zero, or negative values fall
/// back to [`DEFAULT_LIMIT`]; anything else is used verbatim.
pub fn effective_limit(limit: Option<i64>) -> usize {
    match limit {
        Some(n) if n >= 1 => usize::try_from(n).unwrap_or(usize::MAX),
        _ => DEFAULT_LIMIT,
    }
}
