//! Mutation-tracked document tree.
//!
//! A document's durable state is a tree of [`TrackedMapping`] /
//! [`TrackedSequence`] nodes with [`Plain`] leaves. All nodes of one tree
//! share two flags that live on the root:
//!
//! - `changed` — set whenever a write actually differs from the stored
//!   value (or introduces a new key). The document autosaves at transaction
//!   end exactly when this flag is set.
//! - `valid` — true only while the owning document's transaction is open.
//!   Every accessor checks it first, so a handle kept around after the
//!   transaction ends fails loudly with
//!   [`StoreError::InactiveTransaction`] instead of racing a future
//!   transaction.
//!
//! Handles are cheap clones (`Arc` inside); assigning a plain map or
//! sequence into the tree wraps it recursively so nested mutation through
//! the returned handles is tracked without re-assignment.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::value::Plain;

/// Flags shared by every node of one document tree.
#[derive(Debug, Default)]
struct DocFlags {
    valid: AtomicBool,
    changed: AtomicBool,
}

/// One slot of the tree: a leaf value or a nested container handle.
#[derive(Debug, Clone)]
pub enum TrackedNode {
    Value(Plain),
    Mapping(TrackedMapping),
    Sequence(TrackedSequence),
}

impl TrackedNode {
    pub fn as_value(&self) -> Option<&Plain> {
        match self {
            TrackedNode::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_mapping(self) -> Option<TrackedMapping> {
        match self {
            TrackedNode::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Option<TrackedSequence> {
        match self {
            TrackedNode::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Untracked deep copy. Does not require an active transaction; the
    /// serialization path uses this while the document lock is held.
    pub(crate) fn snapshot(&self) -> Plain {
        match self {
            TrackedNode::Value(v) => v.clone(),
            TrackedNode::Mapping(m) => m.snapshot(),
            TrackedNode::Sequence(s) => s.snapshot(),
        }
    }
}

fn wrap(value: Plain, flags: &Arc<DocFlags>) -> TrackedNode {
    match value {
        Plain::Map(entries) => TrackedNode::Mapping(TrackedMapping::from_entries(entries, flags)),
        Plain::Seq(items) => TrackedNode::Sequence(TrackedSequence::from_items(items, flags)),
        leaf => TrackedNode::Value(leaf),
    }
}

/// Mutation-tracked string-keyed mapping.
#[derive(Debug, Clone)]
pub struct TrackedMapping {
    flags: Arc<DocFlags>,
    entries: Arc<Mutex<BTreeMap<String, TrackedNode>>>,
}

impl TrackedMapping {
    /// Fresh, empty root (flags cleared, transaction inactive).
    pub(crate) fn new_root() -> Self {
        Self {
            flags: Arc::new(DocFlags::default()),
            entries: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Root built from loaded plain entries.
    pub(crate) fn root_from_plain(entries: BTreeMap<String, Plain>) -> Self {
        let flags = Arc::new(DocFlags::default());
        Self::from_entries(entries, &flags)
    }

    fn from_entries(entries: BTreeMap<String, Plain>, flags: &Arc<DocFlags>) -> Self {
        Self {
            flags: Arc::clone(flags),
            entries: Arc::new(Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, wrap(v, flags)))
                    .collect(),
            )),
        }
    }

    fn check(&self) -> Result<()> {
        if self.flags.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::InactiveTransaction)
        }
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.flags.valid.store(valid, Ordering::SeqCst);
    }

    pub(crate) fn is_changed(&self) -> bool {
        self.flags.changed.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_changed(&self) {
        self.flags.changed.store(false, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.entries.lock().contains_key(key))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.entries.lock().keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        self.check()?;
        Ok(self.entries.lock().len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, key: &str) -> Result<Option<TrackedNode>> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    /// Store `value` under `key`, recursively wrapping nested containers.
    /// Marks the tree changed only when the key is new or the value really
    /// differs from the current one.
    pub fn set(&self, key: &str, value: impl Into<Plain>) -> Result<()> {
        self.check()?;
        let value = value.into();
        let mut entries = self.entries.lock();
        let differs = match entries.get(key) {
            Some(existing) => existing.snapshot() != value,
            None => true,
        };
        if differs {
            self.flags.changed.store(true, Ordering::SeqCst);
        }
        entries.insert(key.to_string(), wrap(value, &self.flags));
        Ok(())
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.get(key)? {
            Some(TrackedNode::Value(Plain::Str(s))) => Some(s),
            _ => None,
        })
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(match self.get(key)? {
            Some(TrackedNode::Value(Plain::Int(i))) => Some(i),
            _ => None,
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(match self.get(key)? {
            Some(TrackedNode::Value(Plain::Bool(b))) => Some(b),
            _ => None,
        })
    }

    /// `Null` reads as `None`, so cleared deadline fields behave like
    /// absent ones.
    pub fn get_timestamp(&self, key: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(match self.get(key)? {
            Some(TrackedNode::Value(Plain::Timestamp(t))) => Some(t),
            _ => None,
        })
    }

    pub fn get_mapping(&self, key: &str) -> Result<Option<TrackedMapping>> {
        Ok(self.get(key)?.and_then(TrackedNode::into_mapping))
    }

    pub fn get_sequence(&self, key: &str) -> Result<Option<TrackedSequence>> {
        Ok(self.get(key)?.and_then(TrackedNode::into_sequence))
    }

    /// Untracked deep copy of the mapping. Requires an active transaction.
    pub fn to_plain(&self) -> Result<Plain> {
        self.check()?;
        Ok(self.snapshot())
    }

    pub(crate) fn snapshot(&self) -> Plain {
        Plain::Map(
            self.entries
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.snapshot()))
                .collect(),
        )
    }
}

/// Mutation-tracked sequence.
#[derive(Debug, Clone)]
pub struct TrackedSequence {
    flags: Arc<DocFlags>,
    items: Arc<Mutex<Vec<TrackedNode>>>,
}

impl TrackedSequence {
    fn from_items(items: Vec<Plain>, flags: &Arc<DocFlags>) -> Self {
        Self {
            flags: Arc::clone(flags),
            items: Arc::new(Mutex::new(
                items.into_iter().map(|v| wrap(v, flags)).collect(),
            )),
        }
    }

    fn check(&self) -> Result<()> {
        if self.flags.valid.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::InactiveTransaction)
        }
    }

    pub fn len(&self) -> Result<usize> {
        self.check()?;
        Ok(self.items.lock().len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Option<TrackedNode>> {
        self.check()?;
        Ok(self.items.lock().get(index).cloned())
    }

    /// Replace the item at `index`; marks the tree changed only when the
    /// value really differs.
    pub fn set(&self, index: usize, value: impl Into<Plain>) -> Result<()> {
        self.check()?;
        let value = value.into();
        let mut items = self.items.lock();
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or(StoreError::IndexOutOfBounds { index, len })?;
        if slot.snapshot() != value {
            self.flags.changed.store(true, Ordering::SeqCst);
        }
        *slot = wrap(value, &self.flags);
        Ok(())
    }

    /// Append always marks the tree changed.
    pub fn append(&self, value: impl Into<Plain>) -> Result<()> {
        self.check()?;
        self.flags.changed.store(true, Ordering::SeqCst);
        self.items.lock().push(wrap(value.into(), &self.flags));
        Ok(())
    }

    /// Untracked deep copy of the sequence. Requires an active transaction.
    pub fn to_plain(&self) -> Result<Plain> {
        self.check()?;
        Ok(self.snapshot())
    }

    pub(crate) fn snapshot(&self) -> Plain {
        Plain::Seq(self.items.lock().iter().map(TrackedNode::snapshot).collect())
    }
}
