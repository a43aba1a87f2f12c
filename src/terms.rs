use std::collections::{HashMap, HashSet};
use std::fmt;

use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, Streamer};
use once_cell::unsync::OnceCell;
use serde::Serialize;

use crate::error::{GlossError, Result};
use crate::search::{self, SearchConfig};
use crate::source::TermSource;

/// A word, its definition, and the other known words its definition mentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    word: String,
    definition: String,
    found_words: Vec<String>,
    is_custom: bool,
}

impl Term {
    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Cross-referenced words in first-occurrence order, without duplicates or self-references.
    pub fn found_words(&self) -> &[String] {
        &self.found_words
    }

    pub fn is_custom(&self) -> bool {
        self.is_custom
    }
}

/// Searchable collection of terms with resolved cross-references.
///
/// Iteration order is the insertion order of the source; custom terms are appended.
pub struct TermIndex {
    terms: Vec<Term>,
    positions: HashMap<String, usize>,
    folded: HashMap<String, usize>,
    prefix_map: OnceCell<Map<Vec<u8>>>,
}

impl Default for TermIndex {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            positions: HashMap::new(),
            folded: HashMap::new(),
            prefix_map: OnceCell::new(),
        }
    }
}

impl Clone for TermIndex {
    fn clone(&self) -> Self {
        Self {
            terms: self.terms.clone(),
            positions: self.positions.clone(),
            folded: self.folded.clone(),
            prefix_map: OnceCell::new(),
        }
    }
}

impl fmt::Debug for TermIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermIndex")
            .field("terms", &self.terms.len())
            .field("prefix_map_built", &self.prefix_map.get().is_some())
            .finish()
    }
}

impl TermIndex {
    /// Builds the index and resolves every definition's cross-references against
    /// the words of the same source.
    pub fn build(source: &TermSource) -> Self {
        let mut index = Self::default();
        for (word, definition) in source.iter() {
            index.push_term(word, definition, false);
        }
        for position in 0..index.terms.len() {
            index.refresh_found_words(position);
        }
        index
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        TermSource::from_json_str(raw).map(|source| Self::build(&source))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Term> + '_ {
        self.terms.iter()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> + '_ {
        self.terms.iter().map(Term::word)
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, word: &str) -> Option<&Term> {
        self.positions.get(word).map(|&position| &self.terms[position])
    }

    pub fn contains(&self, word: &str) -> bool {
        self.positions.contains_key(word)
    }

    pub fn find_ignore_case(&self, word: &str) -> Option<&Term> {
        self.folded
            .get(&word.to_lowercase())
            .map(|&position| &self.terms[position])
    }

    /// Returns the definition for `word`, or an empty string when the word is unknown.
    pub fn definition(&self, word: &str) -> &str {
        self.get(word).map(Term::definition).unwrap_or("")
    }

    /// Substring search; results keep index order.
    pub fn search(&self, query: &str, config: &SearchConfig) -> Vec<&Term> {
        search::filter_terms(&self.terms, query, config.mode)
    }

    /// "Did you mean" candidates for a query, best match first.
    pub fn suggest(&self, query: &str, config: &SearchConfig, limit: usize) -> Vec<&Term> {
        search::rank_suggestions(&self.terms, query, config.suggestion_threshold, limit)
    }

    /// Returns up to `limit` terms whose word starts with `prefix`, in byte order.
    pub fn prefix(&self, prefix: &str, limit: usize) -> Vec<&Term> {
        if limit == 0 {
            return Vec::new();
        }
        let map = self.prefix_map.get_or_init(|| build_prefix_map(&self.terms));
        let automaton = Str::new(prefix).starts_with();
        let mut stream = map.search(automaton).into_stream();
        let mut results = Vec::new();
        while let Some((_, position)) = stream.next() {
            results.push(&self.terms[position as usize]);
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    /// Creates a new custom term, failing if the word already exists in any casing.
    pub fn create_custom_term(&mut self, word: &str, definition: &str) -> Result<&Term> {
        validate_word(word)?;
        if self.folded.contains_key(&word.to_lowercase()) {
            return Err(GlossError::DuplicateTerm(word.to_string()));
        }
        self.add_or_update_custom_term(word, definition)
    }

    /// Upserts a term. An existing word (matched exactly, else case-insensitively) keeps its
    /// spelling and custom flag and only receives the new definition; a new word is appended
    /// as custom.
    pub fn add_or_update_custom_term(&mut self, word: &str, definition: &str) -> Result<&Term> {
        validate_word(word)?;
        let existing = self
            .positions
            .get(word)
            .or_else(|| self.folded.get(&word.to_lowercase()))
            .copied();
        if let Some(position) = existing {
            self.terms[position].definition = definition.to_string();
            self.refresh_found_words(position);
            return Ok(&self.terms[position]);
        }

        let position = self.push_term(word, definition, true);
        self.refresh_found_words(position);
        self.refresh_referrers(word, position);
        self.prefix_map = OnceCell::new();
        Ok(&self.terms[position])
    }

    /// Deletes a custom term and drops it from every other term's cross-references.
    pub fn remove_custom_term(&mut self, word: &str) -> Result<Term> {
        let position = self
            .positions
            .get(word)
            .or_else(|| self.folded.get(&word.to_lowercase()))
            .copied()
            .ok_or_else(|| GlossError::UnknownTerm(word.to_string()))?;
        if !self.terms[position].is_custom {
            return Err(GlossError::ReadOnlyTerm(self.terms[position].word.clone()));
        }

        let removed = self.terms.remove(position);
        for term in &mut self.terms {
            term.found_words.retain(|found| found != &removed.word);
        }
        self.reindex();
        self.prefix_map = OnceCell::new();
        Ok(removed)
    }

    fn push_term(&mut self, word: &str, definition: &str, is_custom: bool) -> usize {
        let position = self.terms.len();
        self.terms.push(Term {
            word: word.to_string(),
            definition: definition.to_string(),
            found_words: Vec::new(),
            is_custom,
        });
        self.positions.insert(word.to_string(), position);
        self.folded.entry(word.to_lowercase()).or_insert(position);
        position
    }

    fn refresh_found_words(&mut self, position: usize) {
        let term = &self.terms[position];
        let found = cross_references(&term.word, &term.definition, &self.positions);
        self.terms[position].found_words = found;
    }

    fn refresh_referrers(&mut self, word: &str, skip: usize) {
        for position in 0..self.terms.len() {
            if position != skip && self.terms[position].definition.split(' ').any(|t| t == word) {
                self.refresh_found_words(position);
            }
        }
    }

    fn reindex(&mut self) {
        self.positions.clear();
        self.folded.clear();
        for (position, term) in self.terms.iter().enumerate() {
            self.positions.insert(term.word.clone(), position);
            self.folded.entry(term.word.to_lowercase()).or_insert(position);
        }
    }
}

impl<'a> IntoIterator for &'a TermIndex {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.iter()
    }
}

fn validate_word(word: &str) -> Result<()> {
    if word.trim().is_empty() {
        return Err(GlossError::InvalidTermData {
            word: word.to_string(),
            reason: "term words must not be empty".to_string(),
        });
    }
    Ok(())
}

// Tokens are split on the ASCII space only, so "b," or "b\n" never match "b".
fn cross_references(
    word: &str,
    definition: &str,
    positions: &HashMap<String, usize>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    definition
        .split(' ')
        .filter(|token| *token != word && positions.contains_key(*token))
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}

fn build_prefix_map(terms: &[Term]) -> Map<Vec<u8>> {
    let mut keys: Vec<(&[u8], u64)> = terms
        .iter()
        .enumerate()
        .map(|(position, term)| (term.word.as_bytes(), position as u64))
        .collect();
    keys.sort_unstable_by(|a, b| a.0.cmp(b.0));
    Map::from_iter(keys).expect("term words are unique and sorted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchMode;

    fn sample() -> TermIndex {
        let source =
            TermSource::from_pairs([("a", "see b and c"), ("b", "the letter b"), ("c", "see a")])
                .unwrap();
        TermIndex::build(&source)
    }

    fn found(index: &TermIndex, word: &str) -> Vec<String> {
        index.get(word).expect("term present").found_words().to_vec()
    }

    #[test]
    fn resolves_cross_references() {
        let index = sample();
        assert_eq!(found(&index, "a"), ["b", "c"]);
        assert!(found(&index, "b").is_empty(), "self references are dropped");
        assert_eq!(found(&index, "c"), ["a"]);
    }

    #[test]
    fn empty_source_builds_empty_index() {
        let index = TermIndex::build(&TermSource::new());
        assert!(index.is_empty());
        assert!(index.search("", &SearchConfig::default()).is_empty());
    }

    #[test]
    fn found_words_are_deduplicated_in_first_occurrence_order() {
        let source = TermSource::from_pairs([
            ("x", "z then y then z again y"),
            ("y", ""),
            ("z", ""),
        ])
        .unwrap();
        let index = TermIndex::build(&source);
        assert_eq!(found(&index, "x"), ["z", "y"]);
    }

    #[test]
    fn tokens_split_on_single_spaces_only() {
        let source =
            TermSource::from_pairs([("cat", "a\tcat, dog"), ("dog", "not a  cat"), ("a", "")])
                .unwrap();
        let index = TermIndex::build(&source);
        assert_eq!(found(&index, "cat"), ["dog"]);
        assert_eq!(found(&index, "dog"), ["a", "cat"]);
    }

    #[test]
    fn build_covers_every_source_word() {
        let source = TermSource::from_json_str(
            r#"{"entity": "every entity is abstract", "abstract": "not concrete", "concrete": ""}"#,
        )
        .unwrap();
        let index = TermIndex::build(&source);
        assert_eq!(index.len(), source.len());
        for term in &index {
            assert!(source.contains(term.word()));
            assert!(!term.found_words().iter().any(|w| w == term.word()));
            for word in term.found_words() {
                assert!(source.contains(word));
            }
        }
    }

    #[test]
    fn build_is_idempotent() {
        let source = TermSource::from_pairs([("a", "see b and c"), ("b", "a b"), ("c", "")]).unwrap();
        let first: Vec<Term> = TermIndex::build(&source).iter().cloned().collect();
        let second: Vec<Term> = TermIndex::build(&source).iter().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn word_search_is_case_sensitive_substring() {
        let source = TermSource::from_pairs([
            ("Ontology", "being"),
            ("deontology", "duty"),
            ("epistemology", "knowing"),
        ])
        .unwrap();
        let index = TermIndex::build(&source);
        let config = SearchConfig::default();
        let words: Vec<_> = index.search("ontology", &config).iter().map(|t| t.word()).collect();
        assert_eq!(words, ["deontology"]);
        let all: Vec<_> = index.search("", &config).iter().map(|t| t.word()).collect();
        assert_eq!(all, ["Ontology", "deontology", "epistemology"]);
    }

    #[test]
    fn scenario_search_matches_word_only() {
        let index = sample();
        let hits: Vec<_> = index
            .search("a", &SearchConfig::default())
            .iter()
            .map(|t| t.word())
            .collect();
        assert_eq!(hits, ["a"]);
    }

    #[test]
    fn definition_mode_ignores_case_and_reads_definitions() {
        let index = sample();
        let config = SearchConfig {
            mode: SearchMode::WordOrDefinition,
            ..SearchConfig::default()
        };
        let hits: Vec<_> = index.search("LETTER", &config).iter().map(|t| t.word()).collect();
        assert_eq!(hits, ["b"]);
        assert_eq!(index.search("   ", &config).len(), 3);
    }

    #[test]
    fn definition_lookup_returns_empty_for_unknown() {
        let index = sample();
        assert_eq!(index.definition("b"), "the letter b");
        assert_eq!(index.definition("nope"), "");
    }

    #[test]
    fn adding_a_term_updates_referrers() {
        let mut index = sample();
        let term = index.create_custom_term("d", "after c").unwrap();
        assert!(term.is_custom());
        assert_eq!(term.found_words(), ["c"]);
        assert_eq!(found(&index, "a"), ["b", "c"]);

        index.add_or_update_custom_term("b", "the letter b next to d").unwrap();
        assert_eq!(found(&index, "b"), ["d"]);
        assert!(!index.get("b").unwrap().is_custom(), "built-ins stay built-in");
    }

    #[test]
    fn new_word_is_picked_up_by_existing_definitions() {
        let source = TermSource::from_pairs([("dualism", "mind and matter"), ("mind", "")]).unwrap();
        let mut index = TermIndex::build(&source);
        assert_eq!(found(&index, "dualism"), ["mind"]);
        index.create_custom_term("matter", "stuff").unwrap();
        assert_eq!(found(&index, "dualism"), ["mind", "matter"]);
    }

    #[test]
    fn creating_an_existing_word_in_other_case_fails() {
        let mut index = sample();
        let err = index.create_custom_term("A", "again").unwrap_err();
        assert_eq!(err, GlossError::DuplicateTerm("A".to_string()));
        assert_eq!(index.definition("a"), "see b and c");
    }

    #[test]
    fn upsert_matches_case_insensitively() {
        let mut index = sample();
        index.add_or_update_custom_term("C", "see b").unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.definition("c"), "see b");
        assert_eq!(found(&index, "c"), ["b"]);
    }

    #[test]
    fn upsert_prefers_the_exact_spelling() {
        let source = TermSource::from_pairs([("Mind", "capital"), ("mind", "lower")]).unwrap();
        let mut index = TermIndex::build(&source);
        index.add_or_update_custom_term("mind", "edited").unwrap();
        assert_eq!(index.definition("mind"), "edited");
        assert_eq!(index.definition("Mind"), "capital");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn empty_word_is_rejected() {
        let mut index = sample();
        assert!(matches!(
            index.create_custom_term("  ", "blank"),
            Err(GlossError::InvalidTermData { .. })
        ));
    }

    #[test]
    fn removing_a_custom_term_drops_references() {
        let mut index = sample();
        index.create_custom_term("d", "see a").unwrap();
        index.add_or_update_custom_term("c", "see a and d").unwrap();
        assert_eq!(found(&index, "c"), ["a", "d"]);

        let removed = index.remove_custom_term("D").unwrap();
        assert_eq!(removed.word(), "d");
        assert_eq!(found(&index, "c"), ["a"]);
        assert!(!index.contains("d"));
        assert_eq!(index.get("c").unwrap().word(), "c");
    }

    #[test]
    fn built_in_terms_cannot_be_removed() {
        let mut index = sample();
        assert_eq!(
            index.remove_custom_term("a").unwrap_err(),
            GlossError::ReadOnlyTerm("a".to_string())
        );
        assert_eq!(
            index.remove_custom_term("zzz").unwrap_err(),
            GlossError::UnknownTerm("zzz".to_string())
        );
    }

    #[test]
    fn prefix_lookup_follows_mutations() {
        let source = TermSource::from_pairs([
            ("panentheism", ""),
            ("pantheism", ""),
            ("deism", ""),
        ])
        .unwrap();
        let mut index = TermIndex::build(&source);
        let words: Vec<_> = index.prefix("pan", 10).iter().map(|t| t.word()).collect();
        assert_eq!(words, ["panentheism", "pantheism"]);

        index.create_custom_term("panpsychism", "mind everywhere").unwrap();
        let words: Vec<_> = index.prefix("pan", 2).iter().map(|t| t.word()).collect();
        assert_eq!(words, ["panentheism", "panpsychism"]);
        assert!(index.prefix("pan", 0).is_empty());
    }

    #[test]
    fn suggestions_rank_close_spellings_first() {
        let source = TermSource::from_pairs([
            ("ontology", ""),
            ("teleology", ""),
            ("omniscient", ""),
        ])
        .unwrap();
        let index = TermIndex::build(&source);
        let hits = index.suggest("Ontolgy", &SearchConfig::default(), 2);
        assert_eq!(hits.first().map(|t| t.word()), Some("ontology"));
        assert!(index.suggest("", &SearchConfig::default(), 5).is_empty());
    }
}
