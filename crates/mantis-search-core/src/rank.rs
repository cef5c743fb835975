//! Cover-density ranking.
//!
//! An extent (cover) is a minimal window of positions that satisfies the
//! whole query. Every extent contributes `0.1 / (1 + noise)`, where noise
//! counts the non-query words inside it, so terms found close together
//! score higher than the same terms spread across a field. All lexemes
//! carry the default weight of 0.1, as unweighted `to_tsvector` output
//! does in PostgreSQL.
//!
//! The raw score is then divided according to a [`Normalization`]
//! bitmask with the same flag values as `ts_rank_cd`.

use crate::lexer::LexicalVector;
use crate::query::{BoundQuery, TextQuery};

/// Weight of an unlabelled lexeme.
const DEFAULT_WEIGHT: f64 = 0.1;

/// Rank normalization flags, combinable with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalization(u32);

impl Normalization {
    pub const NONE: Normalization = Normalization(0);
    /// Divide by 1 + ln(document length).
    pub const LOG_LENGTH: Normalization = Normalization(1);
    /// Divide by document length.
    pub const LENGTH: Normalization = Normalization(2);
    /// Divide by the mean harmonic distance between extents.
    pub const EXTENT_DISTANCE: Normalization = Normalization(4);
    /// Divide by the number of unique words.
    pub const UNIQUE: Normalization = Normalization(8);
    /// Divide by log2(unique words + 1).
    pub const LOG_UNIQUE: Normalization = Normalization(16);
    /// rank / (rank + 1).
    pub const SELF_PLUS_ONE: Normalization = Normalization(32);

    const ALL_BITS: u32 = 63;

    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !Self::ALL_BITS == 0).then_some(Normalization(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: Normalization) -> bool {
        self.0 & flag.0 == flag.0 && flag.0 != 0
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::LOG_UNIQUE
    }
}

impl std::ops::BitOr for Normalization {
    type Output = Normalization;

    fn bitor(self, rhs: Self) -> Self {
        Normalization(self.0 | rhs.0)
    }
}

/// Score `vector` against `query`. Returns 0.0 when no extent exists.
pub fn cover_density(vector: &LexicalVector, query: &TextQuery, norm: Normalization) -> f32 {
    let Some(bound) = query.bind(vector) else {
        return 0.0;
    };
    let mut entries: Vec<u32> = query
        .positive_lexemes()
        .iter()
        .flat_map(|lex| vector.positions(lex).iter().copied())
        .collect();
    entries.sort_unstable();
    entries.dedup();

    let mut score = 0.0f64;
    let mut extents = 0u32;
    let mut sum_dist = 0.0f64;
    let mut prev_center = 0.0f64;
    let mut from = 0usize;

    while let Some((p, q)) = next_cover(&bound, &entries, from) {
        let items = (q - p + 1) as f64;
        // Harmonic mean of the item weights; 0.1 while weights are uniform.
        let cpos = items / (items / DEFAULT_WEIGHT);
        let span = (entries[q] - entries[p]) as i64;
        let mut noise = span - (q - p) as i64;
        if noise < 0 {
            noise = (q - p) as i64 / 2;
        }
        score += cpos / (1 + noise) as f64;

        let center = (entries[p] + entries[q]) as f64 / 2.0;
        if extents > 0 && center > prev_center {
            sum_dist += 1.0 / (center - prev_center);
        }
        prev_center = center;
        extents += 1;
        from = p + 1;
    }

    let length = vector.len() as f64;
    let unique = vector.unique() as f64;

    if norm.contains(Normalization::LOG_LENGTH) && length > 0.0 {
        score /= (length + 1.0).ln();
    }
    if norm.contains(Normalization::LENGTH) && length > 0.0 {
        score /= length;
    }
    if norm.contains(Normalization::EXTENT_DISTANCE) && extents > 0 && sum_dist > 0.0 {
        score /= extents as f64 / sum_dist;
    }
    if norm.contains(Normalization::UNIQUE) && unique > 0.0 {
        score /= unique;
    }
    if norm.contains(Normalization::LOG_UNIQUE) && unique > 0.0 {
        score /= (unique + 1.0).log2();
    }
    if norm.contains(Normalization::SELF_PLUS_ONE) {
        score /= score + 1.0;
    }

    score as f32
}

/// Find the next extent starting at or after `entries[from]`: the first
/// end index whose window satisfies the query, then the latest start
/// index that still does. Returns indices into `entries`.
fn next_cover(query: &BoundQuery<'_>, entries: &[u32], from: usize) -> Option<(usize, usize)> {
    if from >= entries.len() {
        return None;
    }
    let lo = entries[from];
    let q = (from..entries.len()).find(|&e| query.satisfied_in(lo, entries[e]))?;
    let hi = entries[q];
    let p = (from..=q)
        .rev()
        .find(|&s| query.satisfied_in(entries[s], hi))?;
    Some((p, q))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(text: &str, q: &str, norm: Normalization) -> f32 {
        cover_density(&LexicalVector::from_text(text), &TextQuery::parse(q), norm)
    }

    #[test]
    fn test_single_occurrence() {
        let r = rank("database connection timeout", "timeout", Normalization::NONE);
        assert!((r - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_occurrences_accumulate() {
        let r = rank("timeout then timeout", "timeout", Normalization::NONE);
        assert!((r - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_proximity_rewarded() {
        let near = rank("disk full error", "disk full", Normalization::NONE);
        let far = rank("disk is nearly full", "disk full", Normalization::NONE);
        assert!(near > far);
        assert!((near - 0.1).abs() < 1e-6);
        // two noise words between the terms
        assert!((far - 0.1 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_overlapping_extents() {
        // extents [a x b] (one noise word) and [b a]
        let r = rank("a x b a", "a b", Normalization::NONE);
        assert!((r - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_log_unique_normalization() {
        let r = rank("database connection timeout", "timeout", Normalization::LOG_UNIQUE);
        assert!((r - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_length_normalizations() {
        let text = "one two three timeout";
        let raw = rank(text, "timeout", Normalization::NONE);
        let by_len = rank(text, "timeout", Normalization::LENGTH);
        assert!((by_len - raw / 4.0).abs() < 1e-6);
        let by_log = rank(text, "timeout", Normalization::LOG_LENGTH);
        assert!((by_log as f64 - raw as f64 / 5f64.ln()).abs() < 1e-6);
        let bounded = rank(text, "timeout", Normalization::SELF_PLUS_ONE);
        assert!(bounded < 1.0 && bounded > 0.0);
    }

    #[test]
    fn test_no_cover_scores_zero() {
        assert_eq!(rank("unrelated words", "timeout", Normalization::default()), 0.0);
        assert_eq!(rank("retry logic", "-timeout", Normalization::default()), 0.0);
    }

    #[test]
    fn test_phrase_cover() {
        let exact = rank("read error on sector", "\"read error\"", Normalization::NONE);
        assert!((exact - 0.1).abs() < 1e-6);
        assert_eq!(rank("error read", "\"read error\"", Normalization::NONE), 0.0);
    }

    #[test]
    fn test_long_phrase_document_ranks_every_extent() {
        let text = "read error ".repeat(20_000);
        let r = rank(&text, "\"read error\"", Normalization::NONE);
        assert!((r - 2000.0).abs() < 0.5, "rank {}", r);
    }

    #[test]
    fn test_from_bits() {
        assert_eq!(Normalization::from_bits(16), Some(Normalization::LOG_UNIQUE));
        assert_eq!(
            Normalization::from_bits(18),
            Some(Normalization::LENGTH | Normalization::LOG_UNIQUE)
        );
        assert!(Normalization::from_bits(64).is_none());
        assert!(!Normalization::NONE.contains(Normalization::NONE));
    }
}
