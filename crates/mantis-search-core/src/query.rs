//! Web-search style query parsing and matching.
//!
//! Follows `websearch_to_tsquery` rules:
//!
//! | Input | Meaning |
//! |-------|---------|
//! | `disk full` | both words (AND) |
//! | `"disk full"` | phrase: consecutive positions |
//! | `-timeout` / `-"read error"` | exclusion |
//! | `crash or hang` | disjunction; AND binds tighter than OR |
//! | `read-only` | one word that tokenizes into a phrase |
//!
//! Parsing never fails. Input without any lexeme produces an empty
//! query, which matches nothing.

use std::collections::BTreeSet;
use std::fmt;

use crate::lexer::{lexemes, LexicalVector};

/// Parsed query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Term(String),
    Phrase(Vec<String>),
    Not(Box<QueryExpr>),
    And(Vec<QueryExpr>),
    Or(Vec<QueryExpr>),
}

/// A parsed free-text query, ready for matching, ranking, and headlines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextQuery {
    root: Option<QueryExpr>,
}

impl TextQuery {
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Vec<QueryExpr>> = vec![Vec::new()];
        let mut rest = text;

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let mut negated = false;
            if let Some(r) = rest.strip_prefix('-') {
                negated = true;
                rest = r;
            }

            let (operand, quoted) = if let Some(r) = rest.strip_prefix('"') {
                match r.find('"') {
                    Some(end) => {
                        rest = &r[end + 1..];
                        (&r[..end], true)
                    }
                    None => {
                        rest = "";
                        (r, true)
                    }
                }
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '"')
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                rest = &rest[end..];
                (word, false)
            };

            if !quoted && !negated && operand.eq_ignore_ascii_case("or") {
                if groups.last().is_some_and(|g| !g.is_empty()) {
                    groups.push(Vec::new());
                }
                continue;
            }

            let Some(expr) = operand_expr(operand) else {
                continue;
            };
            let expr = if negated {
                QueryExpr::Not(Box::new(expr))
            } else {
                expr
            };
            if let Some(group) = groups.last_mut() {
                group.push(expr);
            }
        }

        let mut disjuncts: Vec<QueryExpr> = groups
            .into_iter()
            .filter(|g| !g.is_empty())
            .map(|mut g| {
                if g.len() == 1 {
                    g.remove(0)
                } else {
                    QueryExpr::And(g)
                }
            })
            .collect();

        let root = match disjuncts.len() {
            0 => None,
            1 => Some(disjuncts.remove(0)),
            _ => Some(QueryExpr::Or(disjuncts)),
        };
        Self { root }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&QueryExpr> {
        self.root.as_ref()
    }

    /// Whether the document satisfies the query anywhere.
    pub fn matches(&self, vector: &LexicalVector) -> bool {
        self.root.as_ref().is_some_and(|e| e.matches(vector))
    }

    /// Whether the query is satisfied using only positions in `lo..=hi`.
    ///
    /// Use [`TextQuery::bind`] when testing many windows of one document.
    pub fn satisfied_in(&self, vector: &LexicalVector, lo: u32, hi: u32) -> bool {
        self.bind(vector).is_some_and(|b| b.satisfied_in(lo, hi))
    }

    /// Resolve the query against one document. Phrase start positions
    /// are computed once here, so window checks are logarithmic.
    pub fn bind<'a>(&self, vector: &'a LexicalVector) -> Option<BoundQuery<'a>> {
        self.root.as_ref().map(|e| BoundQuery {
            root: BoundExpr::new(e, vector),
        })
    }

    /// Lexemes that contribute to a match (everything not under a negation).
    pub fn positive_lexemes(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(e) = &self.root {
            e.collect_positive(&mut out);
        }
        out
    }
}

impl fmt::Display for TextQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Some(e) => write!(f, "{}", e),
            None => Ok(()),
        }
    }
}

fn operand_expr(text: &str) -> Option<QueryExpr> {
    let mut words = lexemes(text);
    match words.len() {
        0 => None,
        1 => Some(QueryExpr::Term(words.remove(0))),
        _ => Some(QueryExpr::Phrase(words)),
    }
}

impl QueryExpr {
    fn matches(&self, v: &LexicalVector) -> bool {
        match self {
            QueryExpr::Term(t) => v.contains(t),
            QueryExpr::Phrase(words) => phrase_starts(v, words).next().is_some(),
            QueryExpr::Not(inner) => !inner.matches(v),
            QueryExpr::And(items) => items.iter().all(|e| e.matches(v)),
            QueryExpr::Or(items) => items.iter().any(|e| e.matches(v)),
        }
    }

    fn collect_positive(&self, out: &mut BTreeSet<String>) {
        match self {
            QueryExpr::Term(t) => {
                out.insert(t.clone());
            }
            QueryExpr::Phrase(words) => out.extend(words.iter().cloned()),
            QueryExpr::Not(_) => {}
            QueryExpr::And(items) | QueryExpr::Or(items) => {
                items.iter().for_each(|e| e.collect_positive(out))
            }
        }
    }
}

/// Start positions where every phrase word appears at consecutive offsets.
fn phrase_starts<'a>(v: &'a LexicalVector, words: &'a [String]) -> impl Iterator<Item = u32> + 'a {
    let first = words.first().map(|w| v.positions(w)).unwrap_or(&[]);
    first.iter().copied().filter(move |&p| {
        words
            .iter()
            .enumerate()
            .skip(1)
            .all(|(i, w)| v.positions(w).binary_search(&(p + i as u32)).is_ok())
    })
}

/// A query resolved against one [`LexicalVector`].
#[derive(Debug)]
pub struct BoundQuery<'a> {
    root: BoundExpr<'a>,
}

impl BoundQuery<'_> {
    /// Whether the query is satisfied using only positions in `lo..=hi`.
    pub fn satisfied_in(&self, lo: u32, hi: u32) -> bool {
        self.root.satisfied_in(lo, hi)
    }
}

#[derive(Debug)]
enum BoundExpr<'a> {
    Term(&'a [u32]),
    /// Sorted phrase start positions and the offset of the last word.
    Phrase(Vec<u32>, u32),
    Not(Box<BoundExpr<'a>>),
    And(Vec<BoundExpr<'a>>),
    Or(Vec<BoundExpr<'a>>),
}

impl<'a> BoundExpr<'a> {
    fn new(expr: &QueryExpr, v: &'a LexicalVector) -> Self {
        match expr {
            QueryExpr::Term(t) => BoundExpr::Term(v.positions(t)),
            QueryExpr::Phrase(words) => BoundExpr::Phrase(
                phrase_starts(v, words).collect(),
                words.len().saturating_sub(1) as u32,
            ),
            QueryExpr::Not(inner) => BoundExpr::Not(Box::new(BoundExpr::new(inner, v))),
            QueryExpr::And(items) => {
                BoundExpr::And(items.iter().map(|e| BoundExpr::new(e, v)).collect())
            }
            QueryExpr::Or(items) => {
                BoundExpr::Or(items.iter().map(|e| BoundExpr::new(e, v)).collect())
            }
        }
    }

    fn satisfied_in(&self, lo: u32, hi: u32) -> bool {
        match self {
            BoundExpr::Term(pos) => first_at_or_after(pos, lo).is_some_and(|p| p <= hi),
            BoundExpr::Phrase(starts, span) => {
                first_at_or_after(starts, lo).is_some_and(|p| p + span <= hi)
            }
            BoundExpr::Not(inner) => !inner.satisfied_in(lo, hi),
            BoundExpr::And(items) => items.iter().all(|e| e.satisfied_in(lo, hi)),
            BoundExpr::Or(items) => items.iter().any(|e| e.satisfied_in(lo, hi)),
        }
    }
}

fn first_at_or_after(sorted: &[u32], lo: u32) -> Option<u32> {
    sorted.get(sorted.partition_point(|&p| p < lo)).copied()
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::Term(t) => write!(f, "'{}'", t),
            QueryExpr::Phrase(words) => {
                let quoted: Vec<String> = words.iter().map(|w| format!("'{}'", w)).collect();
                write!(f, "{}", quoted.join(" <-> "))
            }
            QueryExpr::Not(inner) => match inner.as_ref() {
                QueryExpr::Term(_) => write!(f, "!{}", inner),
                _ => write!(f, "!( {} )", inner),
            },
            QueryExpr::And(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|e| match e {
                        QueryExpr::Or(_) => format!("( {} )", e),
                        _ => e.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(" & "))
            }
            QueryExpr::Or(items) => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}
