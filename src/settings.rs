use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Built-in source selected on first run.
pub const DEFAULT_TERMS_FILE: &str = "philosophy";

/// User preferences persisted in the settings scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// A single backspace clears the whole search field.
    pub quick_erase: bool,
    /// Name of the term source the index is built from.
    pub selected_terms_file: String,
    /// Select the definition text when it is clicked.
    pub select_on_click: bool,
    /// Enabled state per integration id.
    pub integrations: BTreeMap<String, bool>,
    /// Uploaded term sources available next to the built-ins.
    #[serde(default)]
    pub custom_terms_files: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quick_erase: false,
            selected_terms_file: DEFAULT_TERMS_FILE.to_string(),
            select_on_click: true,
            integrations: BTreeMap::new(),
            custom_terms_files: Vec::new(),
        }
    }
}

impl Settings {
    /// Defaults with the given integration states, usually `IntegrationRegistry::settings()`.
    pub fn with_integrations(integrations: BTreeMap<String, bool>) -> Self {
        Self {
            integrations,
            ..Self::default()
        }
    }

    pub fn integration_enabled(&self, integration_id: &str) -> bool {
        self.integrations
            .get(integration_id)
            .copied()
            .unwrap_or(false)
    }
}

/// Settings as read back from storage; every field may be missing from older records.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PersistedSettings {
    quick_erase: Option<bool>,
    selected_terms_file: Option<String>,
    select_on_click: Option<bool>,
    integrations: Option<BTreeMap<String, bool>>,
    custom_terms_files: Option<Vec<String>>,
}

/// Field-by-field merge of a persisted record over a copy of `defaults`.
///
/// Integration ids only present in the record are dropped; ids only present in
/// `defaults` keep their default state.
pub(crate) fn merge_settings(defaults: &Settings, persisted: PersistedSettings) -> Settings {
    let mut merged = defaults.clone();
    if let Some(quick_erase) = persisted.quick_erase {
        merged.quick_erase = quick_erase;
    }
    if let Some(file) = persisted.selected_terms_file.filter(|file| !file.is_empty()) {
        merged.selected_terms_file = file;
    }
    if let Some(select_on_click) = persisted.select_on_click {
        merged.select_on_click = select_on_click;
    }
    if let Some(saved) = persisted.integrations {
        for (id, enabled) in merged.integrations.iter_mut() {
            if let Some(&saved_state) = saved.get(id) {
                *enabled = saved_state;
            }
        }
    }
    if let Some(files) = persisted.custom_terms_files {
        merged.custom_terms_files = files;
    }
    merged
}
