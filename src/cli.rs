use std::cmp;
use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use philosobabel_rs::{
    BuiltinTerms, CacheEntry, CacheSettingsStore, DirStorage, FetchError, FnIntegration,
    IntegrationRegistry, SearchConfig, Settings, Term, TermIndex, TermSource, available_sources,
    load_active_index, load_source,
};
use serde_json::json;

const HOME_ENV: &str = "PHILOSOBABEL_HOME";
const GLOSSARY_INTEGRATION: &str = "glossary";

#[derive(Parser, Debug)]
#[command(
    name = "philosobabel-rs",
    about = "Browse glossary terms and their cross-references",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Directory for saved settings and imported term sources.
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Directory for cached lookups.
    #[arg(long, global = true, value_name = "DIR")]
    session_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in and imported term sources.
    Sources,
    /// Search the active term source.
    Search {
        /// Substring to look for in term words.
        query: String,
        /// Also match definitions, ignoring case.
        #[arg(long)]
        definitions: bool,
        /// Maximum number of matches to return.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Search this source instead of the selected one.
        #[arg(long)]
        source: Option<String>,
    },
    /// Show a term with its definition and related terms.
    Show {
        word: String,
        #[arg(long)]
        source: Option<String>,
    },
    /// List terms that start with the provided prefix.
    Prefix {
        prefix: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        source: Option<String>,
    },
    /// Look a word up through an integration, using the lookup cache.
    Lookup {
        word: String,
        #[arg(long, default_value = GLOSSARY_INTEGRATION)]
        integration: String,
    },
    /// Import a JSON object of `word: definition` pairs as a term source.
    Import {
        file: PathBuf,
        /// Source name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        /// Make the imported source the active one.
        #[arg(long)]
        select: bool,
    },
    /// Remove an imported term source.
    RemoveSource { name: String },
    /// Inspect or change saved settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Inspect or clear the lookup cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print the effective settings.
    Show,
    /// Change one setting and save it, turning saving back on.
    Set {
        /// One of quick-erase, select-on-click, terms-file, or integration.<id>.
        field: String,
        value: String,
    },
    /// Drop saved settings and return to the defaults.
    Reset,
    /// Stop saving settings until the next `settings set`. Imports and removals
    /// still take effect but are not remembered in the saved settings.
    Forget,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Show cache usage.
    Stats,
    /// Clear cached lookups, optionally only for one word.
    Clear {
        #[arg(long)]
        word: Option<String>,
    },
}

struct Session {
    store: CacheSettingsStore,
    registry: IntegrationRegistry,
    defaults: Settings,
    settings: Settings,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, Box<dyn Error>> {
        let state_dir = match &cli.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        let session_dir = cli
            .session_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("philosobabel-session"));
        let store = CacheSettingsStore::new(DirStorage::new(state_dir), DirStorage::new(session_dir));
        let registry = default_registry();
        let defaults = Settings::with_integrations(registry.settings());
        let settings = store.load_settings(&defaults);
        let mut session = Self {
            store,
            registry,
            defaults,
            settings,
        };
        session.registry.apply_settings(&session.settings.integrations);
        Ok(session)
    }

    fn index(&self, source: Option<&str>) -> Result<TermIndex, Box<dyn Error>> {
        match source {
            Some(name) => Ok(TermIndex::build(&load_source(name, &self.store)?)),
            None => Ok(load_active_index(&self.settings, &self.store)?),
        }
    }

    /// Keeps the saved record in step without re-enabling a forgotten one.
    fn save(&self) {
        self.store.save_settings_if_enabled(&self.settings);
    }
}

fn default_state_dir() -> Result<PathBuf, Box<dyn Error>> {
    if let Some(home) = env::var_os(HOME_ENV).filter(|home| !home.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::data_dir()
        .map(|dir| dir.join("philosobabel"))
        .ok_or_else(|| format!("No data directory found; pass --state-dir or set {HOME_ENV}").into())
}

fn default_registry() -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new();
    registry.register(
        FnIntegration::new(GLOSSARY_INTEGRATION, "Built-in glossary", glossary_lookup)
            .with_description("Definitions from every built-in term source"),
    );
    registry
}

fn glossary_lookup(word: &str) -> Result<CacheEntry, FetchError> {
    let mut matches = Vec::new();
    for name in BuiltinTerms::names() {
        let index = BuiltinTerms::index(name)
            .ok_or_else(|| FetchError::new(format!("built-in source {name:?} is missing")))?;
        if let Some(term) = index.find_ignore_case(word) {
            matches.push(json!({
                "source": name,
                "word": term.word(),
                "definition": term.definition(),
                "foundWords": term.found_words(),
            }));
        }
    }
    if matches.is_empty() {
        return Ok(CacheEntry::failure(
            "Word not found",
            format!("No built-in glossary defines \"{word}\"."),
        ));
    }
    Ok(CacheEntry::success(json!(matches)))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();
    let mut session = Session::open(&cli)?;
    let as_json = cli.json;
    match cli.command {
        Command::Sources => handle_sources(&session, as_json),
        Command::Search {
            query,
            definitions,
            limit,
            source,
        } => handle_search(&session, query, definitions, limit, source, as_json),
        Command::Show { word, source } => handle_show(&session, word, source, as_json),
        Command::Prefix {
            prefix,
            limit,
            source,
        } => handle_prefix(&session, prefix, limit, source, as_json),
        Command::Lookup { word, integration } => {
            handle_lookup(&session, word, integration, as_json)
        }
        Command::Import { file, name, select } => {
            handle_import(&mut session, file, name, select, as_json)
        }
        Command::RemoveSource { name } => handle_remove_source(&mut session, name, as_json),
        Command::Settings(SettingsCommand::Show) => print_settings(&session, as_json),
        Command::Settings(SettingsCommand::Set { field, value }) => {
            handle_settings_set(&mut session, &field, &value)?;
            print_settings(&session, as_json)
        }
        Command::Settings(SettingsCommand::Reset) => {
            session.store.clear_settings();
            session.settings = session.defaults.clone();
            print_settings(&session, as_json)
        }
        Command::Settings(SettingsCommand::Forget) => {
            session.store.set_persistence_enabled(false);
            print_settings(&session, as_json)
        }
        Command::Cache(CacheCommand::Stats) => handle_cache_stats(&session, as_json),
        Command::Cache(CacheCommand::Clear { word }) => handle_cache_clear(&session, word, as_json),
    }
}

fn source_names(session: &Session) -> Vec<String> {
    let mut names = available_sources(&session.settings);
    for id in session.store.custom_source_ids() {
        if !names.contains(&id) {
            names.push(id);
        }
    }
    names
}

fn handle_sources(session: &Session, as_json: bool) -> Result<(), Box<dyn Error>> {
    let rows: Vec<(String, &'static str, bool)> = source_names(session)
        .into_iter()
        .map(|name| {
            let kind = if BuiltinTerms::contains(&name) {
                "built-in"
            } else {
                "imported"
            };
            let selected = name == session.settings.selected_terms_file;
            (name, kind, selected)
        })
        .collect();

    if as_json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(name, kind, selected)| json!({ "name": name, "kind": kind, "selected": selected }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let width = rows
        .iter()
        .map(|(name, _, _)| name.len())
        .max()
        .unwrap_or(4)
        .max("NAME".len());
    println!("  {:<width$}  {}", "NAME", "KIND", width = width);
    println!("  {:-<width$}  {}", "", "--------", width = width);
    for (name, kind, selected) in &rows {
        let marker = if *selected { '*' } else { ' ' };
        println!("{marker} {:<width$}  {}", name, kind, width = width);
    }
    Ok(())
}

fn handle_search(
    session: &Session,
    query: String,
    definitions: bool,
    limit: usize,
    source: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let limit = cmp::max(1, limit);
    let index = session.index(source.as_deref())?;
    let config = if definitions {
        SearchConfig::word_or_definition()
    } else {
        SearchConfig::default()
    };
    let all = index.search(&query, &config);
    let total = all.len();
    let matches = &all[..cmp::min(limit, total)];
    let suggestions = if matches.is_empty() {
        index.suggest(&query, &config, 5)
    } else {
        Vec::new()
    };

    if as_json {
        let payload = json!({
            "query": query,
            "mode": config.mode,
            "limit": limit,
            "total": total,
            "results": matches,
            "suggestions": suggestions.iter().map(|term| term.word()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No terms contain \"{query}\".");
        if !suggestions.is_empty() {
            let words: Vec<_> = suggestions.iter().map(|term| term.word()).collect();
            println!("Did you mean: {}?", words.join(", "));
        }
        return Ok(());
    }
    println!("Matches for \"{query}\" ({} of {total}):", matches.len());
    print_term_table(matches);
    Ok(())
}

fn handle_show(
    session: &Session,
    word: String,
    source: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let index = session.index(source.as_deref())?;
    let term = index
        .get(&word)
        .or_else(|| index.find_ignore_case(&word))
        .ok_or_else(|| format!("No term found for word {word:?}"))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(term)?);
        return Ok(());
    }

    println!("{}", term.word());
    println!("{}", "=".repeat(term.word().chars().count()));
    if term.definition().is_empty() {
        println!("(no definition)");
    } else {
        println!("{}", term.definition());
    }
    if !term.found_words().is_empty() {
        println!();
        println!("See also: {}", term.found_words().join(", "));
    }
    Ok(())
}

fn handle_prefix(
    session: &Session,
    prefix: String,
    limit: usize,
    source: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let limit = cmp::max(1, limit);
    let index = session.index(source.as_deref())?;
    let matches = index.prefix(&prefix, limit);

    if as_json {
        let payload = json!({
            "prefix": prefix,
            "limit": limit,
            "results": matches,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No terms matched prefix \"{prefix}\".");
        return Ok(());
    }
    println!("Matches for prefix \"{prefix}\":");
    print_term_table(&matches);
    Ok(())
}

fn handle_lookup(
    session: &Session,
    word: String,
    integration: String,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let entry = session.registry.fetch(&session.store, &integration, &word);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    if !entry.success {
        let message = entry
            .fallback_message
            .as_deref()
            .or(entry.error.as_deref())
            .unwrap_or("Lookup failed.");
        println!("{message}");
        return Ok(());
    }
    match &entry.data {
        Some(data) => println!("{}", serde_json::to_string_pretty(data)?),
        None => println!("No data returned for \"{word}\"."),
    }
    Ok(())
}

fn handle_import(
    session: &mut Session,
    file: PathBuf,
    name: Option<String>,
    select: bool,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| format!("Cannot derive a source name from {}", file.display()))?,
    };
    if BuiltinTerms::contains(&name) {
        return Err(format!("{name:?} is a built-in source name").into());
    }
    let raw = fs::read_to_string(&file)?;
    let source = TermSource::from_json_str(&raw)?;
    if !session.store.save_custom_source(&name, &source)? {
        return Err("Storage is unavailable; the source was not saved".into());
    }

    if !session.settings.custom_terms_files.contains(&name) {
        session.settings.custom_terms_files.push(name.clone());
    }
    if select {
        session.settings.selected_terms_file = name.clone();
    }
    session.save();

    if as_json {
        let payload = json!({ "name": name, "terms": source.len(), "selected": select });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Imported {} terms as \"{name}\".", source.len());
    }
    Ok(())
}

fn handle_remove_source(
    session: &mut Session,
    name: String,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if BuiltinTerms::contains(&name) {
        return Err(format!("{name:?} is built in and cannot be removed").into());
    }
    let removed = session.store.remove_custom_source(&name);
    let listed = session.settings.custom_terms_files.contains(&name);
    if !removed && !listed {
        return Err(format!("No imported source named {name:?}").into());
    }

    session.settings.custom_terms_files.retain(|file| file != &name);
    if session.settings.selected_terms_file == name {
        session.settings.selected_terms_file = session.defaults.selected_terms_file.clone();
    }
    session.save();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "removed": name }))?);
    } else {
        println!("Removed \"{name}\".");
    }
    Ok(())
}

fn handle_settings_set(session: &mut Session, field: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let settings = &mut session.settings;
    match field {
        "quick-erase" | "quickErase" => settings.quick_erase = parse_flag(value)?,
        "select-on-click" | "selectOnClick" => settings.select_on_click = parse_flag(value)?,
        "terms-file" | "selectedTermsFile" => {
            if !source_names(session).iter().any(|name| name == value) {
                return Err(format!("Unknown term source {value:?}").into());
            }
            session.settings.selected_terms_file = value.to_string();
        }
        other => {
            let Some(id) = other.strip_prefix("integration.") else {
                return Err(format!("Unknown setting {other:?}").into());
            };
            let enabled = parse_flag(value)?;
            let Some(state) = settings.integrations.get_mut(id) else {
                return Err(format!("Unknown integration {id:?}").into());
            };
            *state = enabled;
            session.registry.toggle(id, enabled);
        }
    }
    session.store.save_settings(&session.settings, true);
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool, Box<dyn Error>> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(format!("Expected on/off, got {value:?}").into()),
    }
}

fn print_settings(session: &Session, as_json: bool) -> Result<(), Box<dyn Error>> {
    let persisted = session.store.persistence_enabled();
    if as_json {
        let payload = json!({
            "persisted": persisted,
            "settings": session.settings,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let settings = &session.settings;
    let mut rows = vec![
        ("quick-erase".to_string(), settings.quick_erase.to_string()),
        ("select-on-click".to_string(), settings.select_on_click.to_string()),
        ("terms-file".to_string(), settings.selected_terms_file.clone()),
        ("imported".to_string(), settings.custom_terms_files.join(", ")),
    ];
    for (id, enabled) in &settings.integrations {
        rows.push((format!("integration.{id}"), enabled.to_string()));
    }
    rows.push(("persisted".to_string(), persisted.to_string()));

    let width = rows.iter().map(|(field, _)| field.len()).max().unwrap_or(5);
    println!("{:<width$}  {}", "FIELD", "VALUE", width = width);
    println!("{:-<width$}  {}", "", "-----", width = width);
    for (field, value) in &rows {
        println!("{:<width$}  {}", field, value, width = width);
    }
    Ok(())
}

fn handle_cache_stats(session: &Session, as_json: bool) -> Result<(), Box<dyn Error>> {
    let stats = session.store.stats();
    if as_json {
        let payload = json!({
            "totalItems": stats.total_items,
            "integrationItems": stats.integration_items,
            "storageUsed": stats.storage_used(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Total items:       {}", stats.total_items);
        println!("Integration items: {}", stats.integration_items);
        println!("Storage used:      {}", stats.storage_used());
    }
    Ok(())
}

fn handle_cache_clear(
    session: &Session,
    word: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let removed = match &word {
        Some(word) => session.store.clear_for_word(word),
        None => session.store.clear_all(),
    };
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "word": word, "removed": removed }))?
        );
    } else {
        println!("Removed {removed} cached entries.");
    }
    Ok(())
}

fn print_term_table(rows: &[&Term]) {
    let width = rows
        .iter()
        .map(|term| term.word().chars().count())
        .max()
        .unwrap_or(4)
        .max("WORD".len());
    println!("{:<width$}  {}", "WORD", "DEFINITION", width = width);
    println!("{:-<width$}  {}", "", "----------", width = width);
    for term in rows {
        println!("{:<width$}  {}", term.word(), term.definition(), width = width);
    }
}
