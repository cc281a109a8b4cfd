//! # taskpilot-store
//!
//! Transactional, mutation-tracked, per-account JSON document store.
//!
//! Many threads (RPC handlers, a chat-bot loop, the scheduler) share the
//! same per-account state. Each account gets one [`Document`]: a tracked
//! JSON-like tree persisted to `<key>.json`, guarded by a re-entrant
//! mutex, plus an un-persisted scratch map for live handles. Mutation
//! happens inside a [`document::Transaction`]; the store notices whether
//! anything actually changed and flushes to disk only then.
//!
//! ## Architecture
//! ```text
//! Store (registry, lazy create, singleton keys excluded from iteration)
//!   └── Document (re-entrant lock, autosave-on-dirty, scratch)
//!         └── TrackedMapping / TrackedSequence (shared changed/valid flags)
//!               └── Plain leaves (scalars + tagged timestamps)
//! ```
//!
//! Handles obtained during a transaction go stale the moment it closes:
//! any later access fails with [`StoreError::InactiveTransaction`].

pub mod document;
pub mod error;
pub mod store;
pub mod tracked;
pub mod value;

pub use document::{Document, Scratch, Transaction};
pub use error::{Result, StoreError};
pub use store::Store;
pub use tracked::{TrackedMapping, TrackedNode, TrackedSequence};
pub use value::{from_json, to_json, Plain, DATETIME_TAG};
