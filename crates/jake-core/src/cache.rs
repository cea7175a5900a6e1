//! Incremental cache - fingerprint per cache key
//!
//! Entries live in an in-memory map behind one mutex (scheduler workers
//! record concurrently) and are written to `<cache_dir>/cache.json` once, at
//! the end of an invocation. The store is read lazily on the first query. A
//! missing, corrupt or newer-format store means "no cache", never an error.

use crate::hasher::{Fingerprint, Hasher};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "cache.json";

/// What a fingerprint is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Opt-in task caching, keyed by recipe name
    Recipe(String),
    /// File recipe, keyed by output path
    Output(String),
}

impl CacheKey {
    fn as_store_key(&self) -> String {
        match self {
            CacheKey::Recipe(name) => format!("recipe:{}", name),
            CacheKey::Output(path) => format!("file:{}", path),
        }
    }
}

/// Inputs whose fingerprint decides staleness
#[derive(Debug, Clone, Default)]
pub struct CacheInputs {
    pub patterns: Vec<String>,
    /// Included for task caching so editing a recipe invalidates it
    pub command_text: Option<String>,
}

/// Cache entry metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Default)]
struct CacheState {
    loaded: bool,
    dirty: bool,
    entries: HashMap<String, CacheEntry>,
}

/// Per-invocation cache handle
#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
    store: PathBuf,
    hasher: Hasher,
    state: Mutex<CacheState>,
}

impl Cache {
    pub fn new(root: impl AsRef<Path>, cache_dir: impl AsRef<Path>, hasher: Hasher) -> Self {
        let root = root.as_ref().to_path_buf();
        let store = root.join(cache_dir.as_ref()).join(STORE_FILE);
        Self {
            root,
            store,
            hasher,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Is `key` out of date with respect to `inputs`?
    ///
    /// A File recipe is stale when its output is missing or the inputs'
    /// fingerprint moved; with no inputs at all, an existing output is
    /// enough. A task with zero declared inputs is never cacheable and is
    /// always stale.
    pub fn is_stale(&self, key: &CacheKey, inputs: &CacheInputs) -> bool {
        match key {
            CacheKey::Recipe(_) if inputs.patterns.is_empty() => return true,
            CacheKey::Output(output) if !self.root.join(output).exists() => {
                debug!(output, "output missing");
                return true;
            }
            CacheKey::Output(_) if inputs.patterns.is_empty() => return false,
            _ => {}
        }

        let current = self.fingerprint(inputs);
        match self.get(key) {
            Some(entry) => entry.fingerprint != current,
            None => true,
        }
    }

    /// Store the current fingerprint of `inputs` under `key`
    pub fn record(&self, key: &CacheKey, inputs: &CacheInputs) {
        if matches!(key, CacheKey::Recipe(_)) && inputs.patterns.is_empty() {
            return;
        }
        let fingerprint = self.fingerprint(inputs);
        debug!(key = %key.as_store_key(), %fingerprint, "recording cache entry");
        self.put(
            key,
            CacheEntry {
                fingerprint,
                timestamp: now(),
            },
        );
    }

    pub fn fingerprint(&self, inputs: &CacheInputs) -> Fingerprint {
        self.hasher
            .fingerprint(inputs.patterns.as_slice(), inputs.command_text.as_deref())
    }

    /// Get cache entry
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        state.entries.get(&key.as_store_key()).cloned()
    }

    /// Store cache entry (in memory until [`Cache::flush`])
    pub fn put(&self, key: &CacheKey, entry: CacheEntry) {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        state.entries.insert(key.as_store_key(), entry);
        state.dirty = true;
    }

    /// Write pending entries to disk. A no-op when nothing changed.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        if let Some(parent) = self.store.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            version: STORE_VERSION,
            entries: state.entries.clone(),
        };
        let tmp = self.store.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp, &self.store)?;
        state.dirty = false;
        debug!(entries = file.entries.len(), store = %self.store.display(), "cache flushed");
        Ok(())
    }

    /// Clear cache, in memory and on disk
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        state.entries.clear();
        state.loaded = true;
        state.dirty = false;
        if self.store.exists() {
            fs::remove_file(&self.store)?;
        }
        Ok(())
    }

    /// Get cache stats
    pub fn stats(&self) -> CacheStats {
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        CacheStats {
            entries: state.entries.len(),
            store: self.store.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // A worker that panicked mid-insert leaves the map usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_loaded(&self, state: &mut CacheState) {
        if state.loaded {
            return;
        }
        state.loaded = true;
        match load_entries(&self.store) {
            Ok(entries) => {
                debug!(count = entries.len(), "cache store loaded");
                state.entries = entries;
            }
            Err(e) => {
                warn!(store = %self.store.display(), error = %e, "ignoring unreadable cache store");
            }
        }
    }
}

fn load_entries(store: &Path) -> Result<HashMap<String, CacheEntry>> {
    if !store.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read(store)?;
    let value: serde_json::Value = serde_json::from_slice(&content)?;
    let version = value.get("version").and_then(|v| v.as_u64());
    if version != Some(u64::from(STORE_VERSION)) {
        debug!(?version, "unknown cache store version, starting empty");
        return Ok(HashMap::new());
    }
    let file: StoreFile = serde_json::from_value(value)?;
    Ok(file.entries)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug)]
pub struct CacheStats {
    pub entries: usize,
    pub store: PathBuf,
}
