use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{CacheEntry, CacheSettingsStore};

/// Raised by an integration whose lookup could not complete at all (network down,
/// malformed response). Lookups that complete with "not found" return a failed
/// [`CacheEntry`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An external enrichment source such as a dictionary or encyclopedia API.
pub trait Integration: Send + Sync {
    /// Stable identifier used in settings and cache keys.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn enabled_by_default(&self) -> bool {
        true
    }

    fn fetch(&self, word: &str) -> Result<CacheEntry, FetchError>;
}

/// Closure-backed [`Integration`].
pub struct FnIntegration<F> {
    id: String,
    name: String,
    description: String,
    enabled_by_default: bool,
    fetch: F,
}

impl<F> FnIntegration<F>
where
    F: Fn(&str) -> Result<CacheEntry, FetchError> + Send + Sync,
{
    pub fn new(id: impl Into<String>, name: impl Into<String>, fetch: F) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled_by_default: true,
            fetch,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }
}

impl<F> Integration for FnIntegration<F>
where
    F: Fn(&str) -> Result<CacheEntry, FetchError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    fn fetch(&self, word: &str) -> Result<CacheEntry, FetchError> {
        (self.fetch)(word)
    }
}

struct Registered {
    integration: Box<dyn Integration>,
    enabled: bool,
}

/// Registered integrations in registration order, each with an enabled flag.
#[derive(Default)]
pub struct IntegrationRegistry {
    entries: Vec<Registered>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an integration, replacing any previous one with the same id.
    pub fn register<I: Integration + 'static>(&mut self, integration: I) {
        let enabled = integration.enabled_by_default();
        let registered = Registered {
            integration: Box::new(integration),
            enabled,
        };
        match self.position(registered.integration.id()) {
            Some(position) => self.entries[position] = registered,
            None => self.entries.push(registered),
        }
    }

    pub fn unregister(&mut self, integration_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.integration.id() != integration_id);
        self.entries.len() != before
    }

    pub fn get(&self, integration_id: &str) -> Option<&dyn Integration> {
        self.position(integration_id)
            .map(|position| self.entries[position].integration.as_ref())
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn Integration> + '_ {
        self.entries.iter().map(|entry| entry.integration.as_ref())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &dyn Integration> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.integration.as_ref())
    }

    pub fn is_enabled(&self, integration_id: &str) -> bool {
        self.position(integration_id)
            .is_some_and(|position| self.entries[position].enabled)
    }

    /// Unknown ids are ignored.
    pub fn toggle(&mut self, integration_id: &str, enabled: bool) {
        if let Some(position) = self.position(integration_id) {
            self.entries[position].enabled = enabled;
        }
    }

    pub fn apply_settings(&mut self, integrations: &BTreeMap<String, bool>) {
        for (id, &enabled) in integrations {
            self.toggle(id, enabled);
        }
    }

    /// Current enabled state of every integration, suitable as settings defaults.
    pub fn settings(&self) -> BTreeMap<String, bool> {
        self.entries
            .iter()
            .map(|entry| (entry.integration.id().to_string(), entry.enabled))
            .collect()
    }

    /// Cache-first lookup. Completed lookups are cached whether or not they succeeded;
    /// unknown, disabled, and erroring integrations produce an uncached failure.
    pub fn fetch(&self, store: &CacheSettingsStore, integration_id: &str, word: &str) -> CacheEntry {
        if let Some(cached) = store.get_cached(integration_id, word) {
            return cached;
        }

        let Some(position) = self.position(integration_id) else {
            return CacheEntry::failure(
                "Integration not found",
                format!("Integration \"{integration_id}\" is not available."),
            );
        };
        let entry = &self.entries[position];
        let name = entry.integration.name();
        if !entry.enabled {
            return CacheEntry::failure(
                "Integration disabled",
                format!("Integration \"{name}\" is currently disabled."),
            );
        }

        debug!(integration = integration_id, word, "fetching fresh data");
        match entry.integration.fetch(word) {
            Ok(result) => {
                store.set_cached(integration_id, word, &result);
                result
            }
            Err(err) => {
                warn!(integration = integration_id, error = %err, "integration lookup failed");
                CacheEntry::failure(
                    err.to_string(),
                    format!("Failed to fetch data from {name}. Please try again later."),
                )
            }
        }
    }

    fn position(&self, integration_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.integration.id() == integration_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(id: &str, calls: Arc<AtomicUsize>) -> impl Integration + 'static {
        FnIntegration::new(id.to_string(), id.to_uppercase(), move |word: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            if word == "missing" {
                Ok(CacheEntry::failure("Word not found", "No entry."))
            } else if word == "boom" {
                Err(FetchError::new("status 500"))
            } else {
                Ok(CacheEntry::success(json!({ "word": word })))
            }
        })
    }

    #[test]
    fn second_fetch_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = IntegrationRegistry::new();
        registry.register(counting("dictionary", Arc::clone(&calls)));
        let store = CacheSettingsStore::in_memory();

        let first = registry.fetch(&store, "dictionary", "Cause");
        let second = registry.fetch(&store, "dictionary", "cause");
        assert!(first.success);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completed_failures_are_cached_but_errors_are_not() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = IntegrationRegistry::new();
        registry.register(counting("dictionary", Arc::clone(&calls)));
        let store = CacheSettingsStore::in_memory();

        registry.fetch(&store, "dictionary", "missing");
        assert!(store.get_cached("dictionary", "missing").is_some());

        let failed = registry.fetch(&store, "dictionary", "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("status 500"));
        assert_eq!(
            failed.fallback_message.as_deref(),
            Some("Failed to fetch data from DICTIONARY. Please try again later.")
        );
        assert!(store.get_cached("dictionary", "boom").is_none());
    }

    #[test]
    fn unknown_and_disabled_integrations_fail_softly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = IntegrationRegistry::new();
        registry.register(counting("wikipedia", Arc::clone(&calls)));
        registry.toggle("wikipedia", false);
        let store = CacheSettingsStore::in_memory();

        let missing = registry.fetch(&store, "nope", "x");
        assert_eq!(missing.error.as_deref(), Some("Integration not found"));
        let disabled = registry.fetch(&store, "wikipedia", "x");
        assert_eq!(disabled.error.as_deref(), Some("Integration disabled"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn settings_round_trip_through_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = IntegrationRegistry::new();
        registry.register(counting("dictionary", Arc::clone(&calls)));
        registry.register(
            FnIntegration::new("wordsapi", "WordsAPI", |_: &str| {
                Ok(CacheEntry::success(json!(null)))
            })
            .with_description("Definitions from Wordnik")
            .disabled_by_default(),
        );

        let mut settings = Settings::with_integrations(registry.settings());
        assert!(settings.integration_enabled("dictionary"));
        assert!(!settings.integration_enabled("wordsapi"));
        assert_eq!(registry.enabled().count(), 1);

        settings.integrations.insert("wordsapi".to_string(), true);
        settings.integrations.insert("dictionary".to_string(), false);
        registry.apply_settings(&settings.integrations);
        let enabled: Vec<_> = registry.enabled().map(|i| i.id().to_string()).collect();
        assert_eq!(enabled, ["wordsapi"]);
        assert_eq!(
            registry.get("wordsapi").map(|i| i.description()),
            Some("Definitions from Wordnik")
        );
    }

    #[test]
    fn re_registering_replaces_and_unregister_removes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = IntegrationRegistry::new();
        registry.register(counting("dictionary", Arc::clone(&calls)));
        registry.register(counting("dictionary", Arc::clone(&calls)));
        assert_eq!(registry.all().count(), 1);
        assert!(registry.unregister("dictionary"));
        assert!(!registry.unregister("dictionary"));
        assert!(registry.get("dictionary").is_none());
    }
}
