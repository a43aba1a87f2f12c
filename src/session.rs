use tracing::warn;

use crate::BuiltinTerms;
use crate::error::{GlossError, Result};
use crate::settings::{DEFAULT_TERMS_FILE, Settings};
use crate::source::TermSource;
use crate::store::CacheSettingsStore;
use crate::terms::TermIndex;

/// Looks `name` up among the built-ins, then the uploaded sources.
pub fn load_source(name: &str, store: &CacheSettingsStore) -> Result<TermSource> {
    if let Some(source) = BuiltinTerms::source(name) {
        return Ok(source);
    }
    store
        .load_custom_source(name)
        .ok_or_else(|| GlossError::UnknownSource(name.to_string()))
}

/// Resolves `settings.selected_terms_file`; a selection that no longer exists falls back
/// to [`DEFAULT_TERMS_FILE`].
pub fn load_active_source(settings: &Settings, store: &CacheSettingsStore) -> Result<TermSource> {
    let name = settings.selected_terms_file.as_str();
    match load_source(name, store) {
        Err(GlossError::UnknownSource(_)) if name != DEFAULT_TERMS_FILE => {
            warn!(source = name, fallback = DEFAULT_TERMS_FILE, "selected term source is missing");
            load_source(DEFAULT_TERMS_FILE, store)
        }
        result => result,
    }
}

pub fn load_active_index(settings: &Settings, store: &CacheSettingsStore) -> Result<TermIndex> {
    load_active_source(settings, store).map(|source| TermIndex::build(&source))
}

/// Built-in source names followed by the uploaded ones listed in `settings`.
pub fn available_sources(settings: &Settings) -> Vec<String> {
    let mut names: Vec<String> = BuiltinTerms::names()
        .into_iter()
        .map(str::to_string)
        .collect();
    for name in &settings.custom_terms_files {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

/// The search field contents after one backspace.
pub fn after_backspace(settings: &Settings, query: &str) -> String {
    if settings.quick_erase {
        return String::new();
    }
    let mut remaining = query.to_string();
    remaining.pop();
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_load_the_philosophy_terms() {
        let store = CacheSettingsStore::in_memory();
        let index = load_active_index(&Settings::default(), &store).unwrap();
        assert!(!index.is_empty());
        assert!(index.contains("omnipresent"));
    }

    #[test]
    fn uploaded_sources_resolve_through_the_store() {
        let store = CacheSettingsStore::in_memory();
        let source = TermSource::from_pairs([("qualia", "felt quality of experience")]).unwrap();
        store.save_custom_source("mind.json", &source).unwrap();

        let settings = Settings {
            selected_terms_file: "mind.json".to_string(),
            custom_terms_files: vec!["mind.json".to_string()],
            ..Settings::default()
        };
        assert_eq!(load_active_source(&settings, &store).unwrap(), source);
        let names = available_sources(&settings);
        assert_eq!(names.last().map(String::as_str), Some("mind.json"));
        assert!(names.iter().any(|name| name == "science"));
    }

    #[test]
    fn unknown_source_is_reported() {
        let store = CacheSettingsStore::in_memory();
        assert_eq!(
            load_source("nowhere", &store).unwrap_err(),
            GlossError::UnknownSource("nowhere".to_string())
        );
    }

    #[test]
    fn vanished_selection_falls_back_to_the_default() {
        let store = CacheSettingsStore::in_memory();
        let source = TermSource::from_pairs([("qualia", "felt quality of experience")]).unwrap();
        store.save_custom_source("mind.json", &source).unwrap();
        store.remove_custom_source("mind.json");

        let settings = Settings {
            selected_terms_file: "mind.json".to_string(),
            ..Settings::default()
        };
        let active = load_active_source(&settings, &store).unwrap();
        assert_eq!(Some(active), BuiltinTerms::source(DEFAULT_TERMS_FILE));
    }

    #[test]
    fn backspace_respects_quick_erase() {
        let mut settings = Settings::default();
        assert_eq!(after_backspace(&settings, "ontolé"), "ontol");
        settings.quick_erase = true;
        assert_eq!(after_backspace(&settings, "ontology"), "");
    }
}
