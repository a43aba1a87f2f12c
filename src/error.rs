use thiserror::Error;

/// Failures surfaced to callers of the term index and the custom-source registry.
///
/// Storage problems never show up here; the store recovers from those locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GlossError {
    #[error("invalid term source: {0}")]
    InvalidTermSource(String),
    #[error("invalid term data for {word:?}: {reason}")]
    InvalidTermData { word: String, reason: String },
    #[error("term {0:?} already exists")]
    DuplicateTerm(String),
    #[error("no term named {0:?}")]
    UnknownTerm(String),
    #[error("term {0:?} is built-in and cannot be changed")]
    ReadOnlyTerm(String),
    #[error("a term source named {0:?} already exists")]
    DuplicateSource(String),
    #[error("no term source named {0:?}")]
    UnknownSource(String),
    #[error("term source names must not be empty")]
    InvalidSourceId,
}

pub type Result<T, E = GlossError> = std::result::Result<T, E>;
