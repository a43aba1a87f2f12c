use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use rkyv::{rancor::Error as RkyvError, to_bytes};
use serde_json::Value;
use zstd::bulk::compress as zstd_compress;

#[path = "src/data.rs"]
mod data_model;
use data_model::{BuiltinStore, PackedStrings, Range, SourceRecord, StringId, TermRecord};

// The built-in dictionaries are tiny; favour ratio over build time.
const ARCHIVE_COMPRESSION_LEVEL: i32 = 9;

fn main() -> Result<(), Box<dyn Error>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let terms_dir = manifest_dir.join("data/terms");
    println!("cargo:rerun-if-changed={}", terms_dir.display());
    let sources = load_sources(&terms_dir)?;

    let mut builder = StoreBuilder::default();
    for (name, terms) in sources {
        builder.add_source(name, terms);
    }
    let store = builder.finish();

    let bytes = to_bytes::<RkyvError>(&store)
        .map_err(|err| format!("Failed to serialize built-in terms: {err}"))?
        .into_vec();
    let compressed = zstd_compress(&bytes, ARCHIVE_COMPRESSION_LEVEL)
        .map_err(|err| format!("Failed to compress built-in terms: {err}"))?;

    let data_path = out_dir.join("builtin_terms.rkyv");
    fs::write(&data_path, compressed)?;
    println!("cargo:rustc-env=BUILTIN_TERMS={}", data_path.display());
    Ok(())
}

type RawSource = (String, Vec<(String, String)>);

fn load_sources(terms_dir: &Path) -> Result<Vec<RawSource>, Box<dyn Error>> {
    if !terms_dir.exists() {
        panic!(
            "Missing {}. Built-in dictionaries are JSON objects named data/terms/<source>.json.",
            terms_dir.display()
        );
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(terms_dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        println!("cargo:rerun-if-changed={}", path.display());
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| format!("Non UTF-8 dictionary file name {}", path.display()))?
            .to_owned();
        let raw = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| format!("Failed to parse {}: {err}", path.display()))?;
        let Value::Object(map) = value else {
            return Err(format!("{} must contain a JSON object", path.display()).into());
        };

        let mut terms = Vec::with_capacity(map.len());
        for (word, definition) in map {
            if word.trim().is_empty() {
                return Err(format!("{} contains an empty term", path.display()).into());
            }
            let Value::String(definition) = definition else {
                return Err(format!(
                    "{}: definition for {word:?} is not a string",
                    path.display()
                )
                .into());
            };
            terms.push((word, definition));
        }
        sources.push((name, terms));
    }
    Ok(sources)
}

#[derive(Default)]
struct StoreBuilder {
    strings: StringTable,
    sources: Vec<SourceRecord>,
    terms: Vec<TermRecord>,
}

impl StoreBuilder {
    fn add_source(&mut self, name: String, terms: Vec<(String, String)>) {
        let start = self.terms.len() as u32;
        let name = self.strings.intern_owned(name);
        for (word, definition) in terms {
            let word = self.strings.intern_owned(word);
            let definition = self.strings.intern_owned(definition);
            self.terms.push(TermRecord { word, definition });
        }
        self.sources.push(SourceRecord {
            name,
            terms: Range::new(start, self.terms.len() as u32 - start),
        });
    }

    fn finish(self) -> BuiltinStore {
        BuiltinStore {
            strings: self.strings.into_store(),
            sources: self.sources,
            terms: self.terms,
        }
    }
}

#[derive(Default)]
struct StringTable {
    map: HashMap<Box<str>, StringId>,
    offsets: Vec<u32>,
    lengths: Vec<u32>,
    data: Vec<u8>,
}

impl StringTable {
    fn intern_owned(&mut self, value: String) -> StringId {
        if let Some(&id) = self.map.get(value.as_str()) {
            return id;
        }
        let id = self.offsets.len() as u32;
        self.offsets.push(self.data.len() as u32);
        self.lengths.push(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
        self.map.insert(value.into_boxed_str(), id);
        id
    }

    fn into_store(self) -> PackedStrings {
        PackedStrings {
            offsets: self.offsets,
            lengths: self.lengths,
            data: self.data,
        }
    }
}
