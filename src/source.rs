use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{GlossError, Result};

/// An ordered `word -> definition` mapping, as loaded from a dictionary file.
///
/// Words are exact, case-sensitive keys. Inserting an existing word replaces its
/// definition but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermSource {
    entries: Vec<(String, String)>,
    positions: HashMap<String, usize>,
}

impl TermSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a source from `(word, definition)` pairs, rejecting empty words.
    pub fn from_pairs<I, W, D>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (W, D)>,
        W: Into<String>,
        D: Into<String>,
    {
        let mut source = Self::new();
        for (word, definition) in pairs {
            source.insert(word, definition)?;
        }
        Ok(source)
    }

    /// Parses a JSON document whose top level is an object of string values.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| GlossError::InvalidTermSource(format!("not valid JSON: {err}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(GlossError::InvalidTermSource(format!(
                "expected an object mapping words to definitions, found {}",
                json_kind(value)
            )));
        };
        let mut source = Self::new();
        for (word, definition) in map {
            let Value::String(definition) = definition else {
                return Err(GlossError::InvalidTermData {
                    word: word.clone(),
                    reason: format!("definition must be a string, found {}", json_kind(definition)),
                });
            };
            source.insert(word.as_str(), definition.as_str())?;
        }
        Ok(source)
    }

    pub fn insert(&mut self, word: impl Into<String>, definition: impl Into<String>) -> Result<()> {
        let word = word.into();
        if word.trim().is_empty() {
            return Err(GlossError::InvalidTermData {
                word,
                reason: "term words must not be empty".to_string(),
            });
        }
        let definition = definition.into();
        match self.positions.get(&word) {
            Some(&position) => self.entries[position].1 = definition,
            None => {
                self.positions.insert(word.clone(), self.entries.len());
                self.entries.push((word, definition));
            }
        }
        Ok(())
    }

    pub fn get(&self, word: &str) -> Option<&str> {
        self.positions
            .get(word)
            .map(|&position| self.entries[position].1.as_str())
    }

    pub fn contains(&self, word: &str) -> bool {
        self.positions.contains_key(word)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(word, definition)| (word.as_str(), definition.as_str()))
    }

    pub fn words(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(word, _)| word.as_str())
    }

    /// Serializes back to a JSON object, keeping insertion order.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(word, definition)| (word.clone(), Value::String(definition.clone())))
            .collect();
        Value::Object(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
