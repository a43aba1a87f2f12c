mod data;
pub mod error;
pub mod integrations;
pub mod search;
pub mod session;
pub mod settings;
pub mod source;
pub mod storage;
pub mod store;
pub mod terms;

use data::{ArchivedBuiltinStore, ArchivedPackedStrings, ArchivedSourceRecord, ArchivedStringId};
use once_cell::sync::Lazy;
use rkyv::access_unchecked;
use rkyv::util::AlignedVec;
use std::io::Cursor;
use std::str;
use zstd::stream::decode_all;

pub use error::{GlossError, Result};
pub use integrations::{FetchError, FnIntegration, Integration, IntegrationRegistry};
pub use search::{SearchConfig, SearchMode};
pub use session::{
    after_backspace, available_sources, load_active_index, load_active_source, load_source,
};
pub use settings::{DEFAULT_TERMS_FILE, Settings};
pub use source::TermSource;
pub use storage::{DirStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{CacheEntry, CacheSettingsStore, CacheStats, StoreConfig};
pub use terms::{Term, TermIndex};

static BUILTIN_BYTES: &[u8] = include_bytes!(env!("BUILTIN_TERMS"));

static BUILTIN_SLICE: Lazy<&'static AlignedVec> = Lazy::new(|| {
    let decompressed =
        decode_all(Cursor::new(BUILTIN_BYTES)).expect("decompress built-in term archive");
    let mut aligned = AlignedVec::with_capacity(decompressed.len());
    aligned.extend_from_slice(&decompressed);
    Box::leak(Box::new(aligned))
});
static BUILTIN_STORE: Lazy<&'static ArchivedBuiltinStore> =
    Lazy::new(|| unsafe { access_unchecked::<ArchivedBuiltinStore>(BUILTIN_SLICE.as_slice()) });

/// Read-only access to the dictionaries compiled into the binary.
pub struct BuiltinTerms;

impl BuiltinTerms {
    /// Names of the built-in sources, in file-name order.
    pub fn names() -> Vec<&'static str> {
        let store = builtin_store();
        store
            .sources
            .iter()
            .map(|record| store.strings.get(record.name))
            .collect()
    }

    pub fn contains(name: &str) -> bool {
        Self::record(name).is_some()
    }

    /// Copies a built-in source out of the archive, preserving its term order.
    pub fn source(name: &str) -> Option<TermSource> {
        let store = builtin_store();
        let record = Self::record(name)?;
        let start = record.terms.start.to_native() as usize;
        let len = record.terms.len.to_native() as usize;
        let mut source = TermSource::new();
        for term in &store.terms.as_slice()[start..start + len] {
            source
                .insert(store.strings.get(term.word), store.strings.get(term.definition))
                .ok()?;
        }
        Some(source)
    }

    pub fn index(name: &str) -> Option<TermIndex> {
        Self::source(name).map(|source| TermIndex::build(&source))
    }

    fn record(name: &str) -> Option<&'static ArchivedSourceRecord> {
        let store = builtin_store();
        store
            .sources
            .iter()
            .find(|record| store.strings.get(record.name) == name)
    }
}

fn builtin_store() -> &'static ArchivedBuiltinStore {
    *BUILTIN_STORE
}

impl ArchivedPackedStrings {
    fn get(&self, id: ArchivedStringId) -> &str {
        let idx = id.to_native() as usize;
        let start = self.offsets.as_slice()[idx].to_native() as usize;
        let len = self.lengths.as_slice()[idx].to_native() as usize;
        let data = self.data.as_slice();
        let bytes = &data[start..start + len];
        str::from_utf8(bytes).expect("stored string data is valid UTF-8")
    }
}
