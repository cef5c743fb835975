//! Tokenizer and lexical vectors for the in-memory backend.
//!
//! A token is a maximal run of alphanumeric characters; everything else
//! separates tokens. The lexeme is the lowercased token. There is no
//! stemming and no stop-word list, which makes this equivalent to the
//! PostgreSQL `simple` text-search configuration.

use std::collections::BTreeMap;

/// A token located in its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub lexeme: String,
    /// Zero-based word position.
    pub position: u32,
    /// Byte range of the token in the source text.
    pub start: usize,
    pub end: usize,
}

/// Split `text` into tokens with positions and byte offsets.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            push_token(&mut tokens, text, s, i);
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, text, s, text.len());
    }

    tokens
}

fn push_token(tokens: &mut Vec<Token>, text: &str, start: usize, end: usize) {
    let position = tokens.len() as u32;
    tokens.push(Token {
        lexeme: text[start..end].to_lowercase(),
        position,
        start,
        end,
    });
}

/// Lexemes of `text` in order, without offsets.
pub fn lexemes(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|t| t.lexeme).collect()
}

/// Positional lexeme index of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LexicalVector {
    positions: BTreeMap<String, Vec<u32>>,
    length: u32,
}

impl LexicalVector {
    pub fn from_text(text: &str) -> Self {
        let mut positions: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut length = 0;
        for token in tokenize(text) {
            positions.entry(token.lexeme).or_default().push(token.position);
            length += 1;
        }
        Self { positions, length }
    }

    /// Sorted positions of `lexeme`, empty if absent.
    pub fn positions(&self, lexeme: &str) -> &[u32] {
        self.positions.get(lexeme).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, lexeme: &str) -> bool {
        self.positions.contains_key(lexeme)
    }

    /// Total number of tokens.
    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of distinct lexemes.
    pub fn unique(&self) -> usize {
        self.positions.len()
    }
}
