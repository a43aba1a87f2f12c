use std::cmp::Ordering;

use rapidfuzz::distance::levenshtein;
use serde::{Deserialize, Serialize};

use crate::terms::Term;

/// Which fields a query is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    /// Case-sensitive substring match on the term word, exactly as typed.
    #[default]
    Word,
    /// Case-insensitive substring match on the word or the definition.
    WordOrDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub mode: SearchMode,
    /// Minimum normalized similarity (0.0..=1.0) for a "did you mean" suggestion.
    pub suggestion_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Word,
            suggestion_threshold: 0.6,
        }
    }
}

impl SearchConfig {
    pub fn word_or_definition() -> Self {
        Self {
            mode: SearchMode::WordOrDefinition,
            ..Self::default()
        }
    }
}

pub(crate) fn filter_terms<'a>(terms: &'a [Term], query: &str, mode: SearchMode) -> Vec<&'a Term> {
    match mode {
        SearchMode::Word => {
            if query.is_empty() {
                return terms.iter().collect();
            }
            terms
                .iter()
                .filter(|term| term.word().contains(query))
                .collect()
        }
        SearchMode::WordOrDefinition => {
            if query.trim().is_empty() {
                return terms.iter().collect();
            }
            let needle = query.to_lowercase();
            terms
                .iter()
                .filter(|term| {
                    term.word().to_lowercase().contains(&needle)
                        || term.definition().to_lowercase().contains(&needle)
                })
                .collect()
        }
    }
}

/// Ranks terms by normalized Levenshtein similarity of their lowercased words.
/// Ties keep index order.
pub(crate) fn rank_suggestions<'a>(
    terms: &'a [Term],
    query: &str,
    threshold: f64,
    limit: usize,
) -> Vec<&'a Term> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f64, usize)> = terms
        .iter()
        .enumerate()
        .filter_map(|(position, term)| {
            let candidate = term.word().to_lowercase();
            let score = levenshtein::normalized_similarity(needle.chars(), candidate.chars());
            (score >= threshold).then_some((score, position))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(_, position)| &terms[position])
        .collect()
}
