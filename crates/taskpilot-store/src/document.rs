//! One persisted document and its transaction protocol.
//!
//! A [`Document`] pairs a tracked root (durable, serialized to
//! `<key>.json`) with an untyped scratch map (process-lifetime only: live
//! API handles, sync stamps, debounce timers). Access goes through a
//! [`Transaction`]:
//!
//! - `begin()` takes the document's re-entrant mutex and marks the root
//!   valid. The same thread may nest transactions freely; another thread
//!   blocks until the outermost one ends.
//! - Dropping the outermost transaction persists the document if anything
//!   changed, marks the root invalid, and releases the lock. Handles that
//!   escaped the scope now fail with `InactiveTransaction`.
//!
//! `save()` writes a temp file and renames it over the target, so a crash
//! mid-write never corrupts the previously persisted version.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};

use crate::error::{Result, StoreError};
use crate::tracked::TrackedMapping;
use crate::value::{self, Plain};

/// Un-persisted per-document state, keyed by string. Holds anything
/// `Send` (remote client handles, timestamps, per-assistant caches).
#[derive(Default)]
pub struct Scratch {
    entries: HashMap<String, Box<dyn Any + Send>>,
}

impl Scratch {
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key)?.downcast_mut()
    }

    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Scratch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// One account's (or singleton subsystem's) persisted state.
pub struct Document {
    key: String,
    path: PathBuf,
    lock: ReentrantMutex<()>,
    /// Nesting depth of the current holder's transactions. Only ever
    /// touched while `lock` is held.
    depth: AtomicUsize,
    root: Mutex<TrackedMapping>,
    scratch: Mutex<Scratch>,
}

impl Document {
    pub(crate) fn new(key: &str, dir: &Path) -> Self {
        Self {
            key: key.to_string(),
            path: dir.join(format!("{key}.json")),
            lock: ReentrantMutex::new(()),
            depth: AtomicUsize::new(0),
            root: Mutex::new(TrackedMapping::new_root()),
            scratch: Mutex::new(Scratch::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the backing file, replacing the current root. All
    /// handles into the previous root become permanently invalid. Errors
    /// surface to the caller; there is no retry.
    pub fn load(&self) -> Result<()> {
        let _guard = self.lock.lock();
        tracing::debug!(key = %self.key, "load document");
        let text = fs::read_to_string(&self.path)?;
        let json: serde_json::Value = serde_json::from_str(&text)?;
        let Plain::Map(entries) = value::from_json(&json)? else {
            return Err(StoreError::Codec("document root must be a JSON object".into()));
        };
        let root = TrackedMapping::root_from_plain(entries);
        // A load inside an open transaction leaves the new root usable.
        root.set_valid(self.depth.load(Ordering::SeqCst) > 0);
        *self.root.lock() = root;
        Ok(())
    }

    /// Serialize the root to `<key>.json` (temp file + rename) and clear
    /// the changed flag.
    pub fn save(&self) -> Result<()> {
        let _guard = self.lock.lock();
        tracing::debug!(key = %self.key, "save document");
        let root = self.root.lock().clone();
        let text = serde_json::to_string_pretty(&value::to_json(&root.snapshot()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        root.clear_changed();
        Ok(())
    }

    /// Open a transaction. Blocks while another thread holds one; nests
    /// without deadlock on the holding thread.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.lock.lock();
        let depth = self.depth.fetch_add(1, Ordering::SeqCst);
        let outermost = depth == 0;
        if outermost {
            tracing::trace!(key = %self.key, "transaction opened");
            self.root.lock().set_valid(true);
        }
        Transaction {
            doc: self,
            outermost,
            finished: false,
            _guard: guard,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Scoped access to a document's root and scratch state.
///
/// Ends on drop: the outermost transaction autosaves a dirty root (save
/// failures are logged; use [`Transaction::end`] to observe them),
/// invalidates outstanding handles, and releases the document lock.
#[must_use = "dropping the transaction immediately would end it"]
pub struct Transaction<'a> {
    doc: &'a Document,
    outermost: bool,
    finished: bool,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl<'a> Transaction<'a> {
    pub fn key(&self) -> &str {
        &self.doc.key
    }

    /// Handle to the tracked root. Valid until the outermost transaction
    /// ends.
    pub fn root(&self) -> TrackedMapping {
        self.doc.root.lock().clone()
    }

    /// Run `f` with exclusive access to the scratch map.
    pub fn with_scratch<R>(&self, f: impl FnOnce(&mut Scratch) -> R) -> R {
        f(&mut self.doc.scratch.lock())
    }

    /// Lock the scratch map directly. Do not hold the guard across calls
    /// that may take it again; the lock is not re-entrant.
    pub fn scratch(&self) -> MutexGuard<'_, Scratch> {
        self.doc.scratch.lock()
    }

    /// End the transaction, surfacing a save failure instead of logging it.
    pub fn end(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.doc.depth.fetch_sub(1, Ordering::SeqCst);
        if !self.outermost {
            return Ok(());
        }
        let root = self.doc.root.lock().clone();
        let result = if root.is_changed() {
            self.doc.save()
        } else {
            Ok(())
        };
        root.set_valid(false);
        tracing::trace!(key = %self.doc.key, "transaction closed");
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(key = %self.doc.key, error = %e, "autosave at transaction end failed");
        }
    }
}
