//! Snippet generation with query-term highlighting.
//!
//! Picks the window of at most `max_words` tokens that holds the most
//! query hits, pads it with surrounding context up to `min_words`, and
//! copies the original text of that window with every hit wrapped in
//! `start_sel` / `stop_sel`. Text between tokens (punctuation, line
//! breaks) is kept as written.

use serde::Deserialize;

use crate::lexer::tokenize;
use crate::query::TextQuery;

/// Headline options, named after their `ts_headline` counterparts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeadlineOptions {
    #[serde(default = "default_start_sel")]
    pub start_sel: String,
    #[serde(default = "default_stop_sel")]
    pub stop_sel: String,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

fn default_start_sel() -> String {
    "<b>".to_string()
}
fn default_stop_sel() -> String {
    "</b>".to_string()
}
fn default_max_words() -> usize {
    35
}
fn default_min_words() -> usize {
    15
}

impl Default for HeadlineOptions {
    fn default() -> Self {
        Self {
            start_sel: default_start_sel(),
            stop_sel: default_stop_sel(),
            max_words: default_max_words(),
            min_words: default_min_words(),
        }
    }
}

impl HeadlineOptions {
    /// Render as a `ts_headline` options string.
    pub fn to_option_string(&self) -> String {
        format!(
            "StartSel=\"{}\", StopSel=\"{}\", MaxWords={}, MinWords={}",
            self.start_sel.replace('"', ""),
            self.stop_sel.replace('"', ""),
            self.max_words,
            self.min_words
        )
    }
}

/// Build a highlighted excerpt of `document` for `query`.
pub fn headline(document: &str, query: &TextQuery, opts: &HeadlineOptions) -> String {
    let tokens = tokenize(document);
    if tokens.is_empty() {
        return document.trim().to_string();
    }

    let terms = query.positive_lexemes();
    let hits: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| terms.contains(&t.lexeme))
        .map(|(i, _)| i)
        .collect();

    let max_words = opts.max_words.max(1);
    let min_words = opts.min_words.clamp(1, max_words);

    let (start, end) = match best_hit_span(&hits, max_words) {
        Some((first, last)) => {
            let span = last - first + 1;
            let target = span.max(min_words);
            let before = (target - span) / 2;
            let start = first.saturating_sub(before);
            let end = (start + target).min(tokens.len());
            (end.saturating_sub(target), end)
        }
        None => (0, min_words.min(tokens.len())),
    };

    let mut out = String::new();
    let mut cursor = tokens[start].start;
    for (i, token) in tokens.iter().enumerate().take(end).skip(start) {
        out.push_str(&document[cursor..token.start]);
        let word = &document[token.start..token.end];
        if hits.binary_search(&i).is_ok() {
            out.push_str(&opts.start_sel);
            out.push_str(word);
            out.push_str(&opts.stop_sel);
        } else {
            out.push_str(word);
        }
        cursor = token.end;
    }
    out
}

/// The first and last hit of the densest run of hits fitting in
/// `max_words` tokens; earliest run wins ties.
fn best_hit_span(hits: &[usize], max_words: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None;
    for (i, &first) in hits.iter().enumerate() {
        let limit = first + max_words;
        let run = hits[i..].iter().take_while(|&&h| h < limit).count();
        let last = hits[i + run - 1];
        if best.map_or(true, |(count, _, _)| run > count) {
            best = Some((run, first, last));
        }
    }
    best.map(|(_, first, last)| (first, last))
}
