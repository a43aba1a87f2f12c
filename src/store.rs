//! Settings persistence and the enrichment result cache.
//!
//! [`CacheSettingsStore`] sits on two [`KeyValueStorage`] scopes: a durable one for
//! settings and uploaded term sources, and a session one for cached lookups. Storage
//! failures are logged and swallowed; callers only ever see "absent" or a dropped write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{GlossError, Result};
use crate::settings::{PersistedSettings, Settings, merge_settings};
use crate::source::TermSource;
use crate::storage::{KeyValueStorage, MemoryStorage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Durable key holding the serialized [`Settings`].
    pub settings_key: String,
    /// Durable key holding the "customize enabled" flag.
    pub persistence_key: String,
    /// Prefix of every cache entry in the session scope.
    pub cache_prefix: String,
    /// Prefix of every uploaded term source in the durable scope.
    pub source_prefix: String,
    /// Entries dropped when a cache write fails.
    pub eviction_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            settings_key: "philosobabel-settings".to_string(),
            persistence_key: "philosobabel-customize".to_string(),
            cache_prefix: "philosobabel-integration-".to_string(),
            source_prefix: "philosobabel-terms-".to_string(),
            eviction_batch: 10,
        }
    }
}

/// Result of an enrichment lookup. `data` is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

impl CacheEntry {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            fallback_message: None,
        }
    }

    pub fn failure(error: impl Into<String>, fallback_message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            fallback_message: Some(fallback_message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Every key in the session scope, including other consumers'.
    pub total_items: usize,
    /// Keys under the cache prefix.
    pub integration_items: usize,
    /// Key plus value length in characters across the whole scope.
    pub storage_used_bytes: usize,
}

impl CacheStats {
    /// Rounded human-readable size, e.g. `"3 KB"`.
    pub fn storage_used(&self) -> String {
        format!("{} KB", (self.storage_used_bytes as f64 / 1024.0).round() as u64)
    }
}

// Cached values carry their own key parts so per-word clears stay exact when
// integration ids or words contain hyphens.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CachedRecordRef<'a> {
    integration: &'a str,
    word: &'a str,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedRecord {
    integration: String,
    word: String,
    entry: CacheEntry,
}

pub struct CacheSettingsStore {
    config: StoreConfig,
    durable: Option<Box<dyn KeyValueStorage>>,
    session: Option<Box<dyn KeyValueStorage>>,
}

impl CacheSettingsStore {
    pub fn new<D, S>(durable: D, session: S) -> Self
    where
        D: KeyValueStorage + 'static,
        S: KeyValueStorage + 'static,
    {
        Self::with_config(StoreConfig::default(), durable, session)
    }

    /// Probes both backends once; a backend that cannot be written is detached and
    /// every operation on its scope becomes a no-op.
    pub fn with_config<D, S>(config: StoreConfig, durable: D, session: S) -> Self
    where
        D: KeyValueStorage + 'static,
        S: KeyValueStorage + 'static,
    {
        Self {
            config,
            durable: attach("settings", Box::new(durable)),
            session: attach("session", Box::new(session)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new(), MemoryStorage::new())
    }

    /// A store for hosts without any storage.
    pub fn unavailable(config: StoreConfig) -> Self {
        warn!("no storage available; settings and cache will not be kept");
        Self {
            config,
            durable: None,
            session: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn durable_available(&self) -> bool {
        self.durable.is_some()
    }

    pub fn session_available(&self) -> bool {
        self.session.is_some()
    }

    // ---- settings ----

    /// Loads settings merged over `defaults`. Missing, corrupt, or disabled
    /// persistence all yield `defaults` unchanged.
    pub fn load_settings(&self, defaults: &Settings) -> Settings {
        let Some(storage) = self.durable.as_deref() else {
            return defaults.clone();
        };
        if !self.persistence_enabled() {
            return defaults.clone();
        }
        let Some(raw) = read_item(storage, &self.config.settings_key) else {
            return defaults.clone();
        };
        match serde_json::from_str::<PersistedSettings>(&raw) {
            Ok(persisted) => merge_settings(defaults, persisted),
            Err(err) => {
                warn!(error = %err, key = %self.config.settings_key, "ignoring unreadable settings");
                defaults.clone()
            }
        }
    }

    /// Writes the whole record when `persist` is set, otherwise forgets any saved settings.
    pub fn save_settings(&self, settings: &Settings, persist: bool) {
        let Some(storage) = self.durable.as_deref() else {
            return;
        };
        write_item(storage, &self.config.persistence_key, bool_flag(persist));
        if !persist {
            remove_item(storage, &self.config.settings_key);
            return;
        }
        match serde_json::to_string(settings) {
            Ok(raw) => {
                write_item(storage, &self.config.settings_key, &raw);
            }
            Err(err) => warn!(error = %err, "failed to serialize settings"),
        }
    }

    /// Saves `settings` only while persistence is enabled, leaving the flag as it is.
    pub fn save_settings_if_enabled(&self, settings: &Settings) {
        if self.persistence_enabled() {
            self.save_settings(settings, true);
        }
    }

    pub fn clear_settings(&self) {
        if let Some(storage) = self.durable.as_deref() {
            remove_item(storage, &self.config.settings_key);
            remove_item(storage, &self.config.persistence_key);
        }
    }

    /// Whether settings are loaded and saved at all. Defaults to on.
    pub fn persistence_enabled(&self) -> bool {
        self.durable
            .as_deref()
            .and_then(|storage| read_item(storage, &self.config.persistence_key))
            .map(|raw| raw.trim() != "false")
            .unwrap_or(true)
    }

    pub fn set_persistence_enabled(&self, enabled: bool) {
        let Some(storage) = self.durable.as_deref() else {
            return;
        };
        write_item(storage, &self.config.persistence_key, bool_flag(enabled));
        if !enabled {
            remove_item(storage, &self.config.settings_key);
        }
    }

    // ---- custom term sources ----

    /// Stores an uploaded term source under `id`. Returns whether the write landed.
    pub fn save_custom_source(&self, id: &str, source: &TermSource) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(GlossError::InvalidSourceId);
        }
        let Some(storage) = self.durable.as_deref() else {
            return Ok(false);
        };
        let key = self.source_key(id);
        if read_item(storage, &key).is_some() {
            return Err(GlossError::DuplicateSource(id.to_string()));
        }
        Ok(write_item(storage, &key, &source.to_json().to_string()))
    }

    pub fn load_custom_source(&self, id: &str) -> Option<TermSource> {
        let storage = self.durable.as_deref()?;
        let raw = read_item(storage, &self.source_key(id))?;
        match TermSource::from_json_str(&raw) {
            Ok(source) => Some(source),
            Err(err) => {
                warn!(error = %err, source = id, "ignoring unreadable term source");
                None
            }
        }
    }

    pub fn remove_custom_source(&self, id: &str) -> bool {
        let Some(storage) = self.durable.as_deref() else {
            return false;
        };
        let key = self.source_key(id);
        if read_item(storage, &key).is_none() {
            return false;
        }
        remove_item(storage, &key)
    }

    pub fn custom_source_ids(&self) -> Vec<String> {
        let Some(storage) = self.durable.as_deref() else {
            return Vec::new();
        };
        list_keys(storage)
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(self.config.source_prefix.as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    fn source_key(&self, id: &str) -> String {
        format!("{}{}", self.config.source_prefix, id)
    }

    // ---- enrichment cache ----

    /// `<prefix><integration_id>-<lowercased word>`.
    pub fn cache_key(&self, integration_id: &str, word: &str) -> String {
        format!(
            "{}{}-{}",
            self.config.cache_prefix,
            integration_id,
            word.to_lowercase()
        )
    }

    pub fn get_cached(&self, integration_id: &str, word: &str) -> Option<CacheEntry> {
        let storage = self.session.as_deref()?;
        let key = self.cache_key(integration_id, word);
        let raw = read_item(storage, &key)?;
        match serde_json::from_str::<CachedRecord>(&raw) {
            Ok(record) if record.integration == integration_id => {
                debug!(integration = integration_id, word, "cache hit");
                Some(record.entry)
            }
            Ok(_) => {
                debug!(key = %key, "cache record belongs to another integration");
                None
            }
            Err(err) => {
                debug!(error = %err, key = %key, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Fire-and-forget write. A write refused for lack of space evicts a batch of cache
    /// entries; no failed write is retried.
    pub fn set_cached(&self, integration_id: &str, word: &str, entry: &CacheEntry) {
        let Some(storage) = self.session.as_deref() else {
            return;
        };
        let key = self.cache_key(integration_id, word);
        let folded = word.to_lowercase();
        let record = CachedRecordRef {
            integration: integration_id,
            word: &folded,
            entry,
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, key = %key, "failed to serialize cache entry");
                return;
            }
        };
        match storage.set_item(&key, &raw) {
            Ok(()) => debug!(integration = integration_id, word, "cached lookup result"),
            Err(err @ StorageError::QuotaExceeded { .. }) => {
                warn!(error = %err, key = %key, "cache full; evicting entries");
                self.evict_batch(storage);
            }
            Err(err) => warn!(error = %err, key = %key, "cache write failed"),
        }
    }

    fn evict_batch(&self, storage: &dyn KeyValueStorage) {
        let victims: Vec<String> = list_keys(storage)
            .into_iter()
            .filter(|key| key.starts_with(&self.config.cache_prefix))
            .take(self.config.eviction_batch)
            .collect();
        let evicted = victims
            .iter()
            .filter(|key| remove_item(storage, key))
            .count();
        info!(evicted, "evicted cache entries");
    }

    /// Removes every cache entry; other keys in the session scope are left alone.
    pub fn clear_all(&self) -> usize {
        let Some(storage) = self.session.as_deref() else {
            return 0;
        };
        let removed = list_keys(storage)
            .into_iter()
            .filter(|key| key.starts_with(&self.config.cache_prefix))
            .filter(|key| remove_item(storage, key))
            .count();
        info!(removed, "cache cleared");
        removed
    }

    /// Removes the entries for `word` under every integration.
    pub fn clear_for_word(&self, word: &str) -> usize {
        let Some(storage) = self.session.as_deref() else {
            return 0;
        };
        let folded = word.to_lowercase();
        let suffix = format!("-{folded}");
        let removed = list_keys(storage)
            .into_iter()
            .filter(|key| key.starts_with(&self.config.cache_prefix))
            .filter(|key| {
                match read_item(storage, key)
                    .and_then(|raw| serde_json::from_str::<CachedRecord>(&raw).ok())
                {
                    Some(record) => record.word == folded,
                    None => key.ends_with(&suffix),
                }
            })
            .filter(|key| remove_item(storage, key))
            .count();
        info!(word, removed, "cache cleared for word");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let Some(storage) = self.session.as_deref() else {
            return CacheStats {
                total_items: 0,
                integration_items: 0,
                storage_used_bytes: 0,
            };
        };
        let keys = list_keys(storage);
        let mut integration_items = 0;
        let mut storage_used_bytes = 0;
        for key in &keys {
            if let Some(value) = read_item(storage, key) {
                storage_used_bytes += key.chars().count() + value.chars().count();
                if key.starts_with(&self.config.cache_prefix) {
                    integration_items += 1;
                }
            }
        }
        CacheStats {
            total_items: keys.len(),
            integration_items,
            storage_used_bytes,
        }
    }
}

fn attach(scope: &'static str, storage: Box<dyn KeyValueStorage>) -> Option<Box<dyn KeyValueStorage>> {
    match storage.probe() {
        Ok(()) => Some(storage),
        Err(err) => {
            warn!(scope, error = %err, "storage unavailable; operations on this scope are skipped");
            None
        }
    }
}

fn bool_flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn read_item(storage: &dyn KeyValueStorage, key: &str) -> Option<String> {
    match storage.get_item(key) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, key = %key, "storage read failed");
            None
        }
    }
}

fn write_item(storage: &dyn KeyValueStorage, key: &str, value: &str) -> bool {
    match storage.set_item(key, value) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, key = %key, "storage write failed");
            false
        }
    }
}

fn remove_item(storage: &dyn KeyValueStorage, key: &str) -> bool {
    match storage.remove_item(key) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, key = %key, "storage remove failed");
            false
        }
    }
}

fn list_keys(storage: &dyn KeyValueStorage) -> Vec<String> {
    match storage.keys() {
        Ok(keys) => keys,
        Err(err) => {
            warn!(error = %err, "storage enumeration failed");
            Vec::new()
        }
    }
}
