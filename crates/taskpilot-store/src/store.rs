//! Registry of documents, keyed by account id.
//!
//! Documents are created lazily and live for the process lifetime. A
//! fixed set of reserved singleton keys (subsystem state such as the
//! chat bot's or the scheduler's own document) is excluded when
//! enumerating real accounts.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::Document;
use crate::error::Result;

pub struct Store {
    dir: PathBuf,
    singletons: HashSet<String>,
    registry: Mutex<HashMap<String, Arc<Document>>>,
}

impl Store {
    /// Open a store rooted at `dir` (created if missing). `singletons`
    /// names the reserved subsystem keys excluded from [`Store::accounts`].
    pub fn new<S: Into<String>>(
        dir: impl Into<PathBuf>,
        singletons: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            singletons: singletons.into_iter().map(Into::into).collect(),
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Default data directory (~/.taskpilot/accounts).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskpilot")
            .join("accounts")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch or lazily create the document for `key`. The registry lock
    /// covers only the lookup; document locking stays independent per key.
    pub fn get(&self, key: &str) -> Arc<Document> {
        let mut registry = self.registry.lock();
        Arc::clone(registry.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "creating document");
            Arc::new(Document::new(key, &self.dir))
        }))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registry.lock().contains_key(key)
    }

    pub fn is_singleton(&self, key: &str) -> bool {
        self.singletons.contains(key)
    }

    /// Known account keys, excluding singletons. Sorted for deterministic
    /// enumeration (the order carries no semantic weight).
    pub fn accounts(&self) -> Vec<String> {
        let registry = self.registry.lock();
        let mut keys: Vec<String> = registry
            .keys()
            .filter(|k| !self.singletons.contains(*k))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Keys with a persisted `<key>.json` in the data directory, for the
    /// startup load pass. Temp files from interrupted saves are ignored.
    pub fn persisted_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("singletons", &self.singletons)
            .field("documents", &self.registry.lock().len())
            .finish()
    }
}
