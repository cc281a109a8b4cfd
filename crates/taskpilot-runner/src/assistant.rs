//! The pluggable automation-rule contract and the per-account view the
//! scheduler hands to it.
//!
//! An assistant is one automation rule (move overdue tasks, re-sort by
//! priority, instantiate a template). The scheduler drives every enabled
//! assistant against every account's document; assistants see the account
//! only through [`AccountCtx`], which is bound to the account's active
//! transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskpilot_store::{Plain, StoreError, TrackedMapping, Transaction};

use crate::error::AssistantError;
use crate::event::UpdateEvent;
use crate::remote::RemoteTasks;

/// Scratch-map keys the runner reserves on every account document.
pub mod scratch_keys {
    /// `Arc<dyn RemoteTasks>` — the account's live task-tracker client.
    pub const REMOTE: &str = "remote";
    /// `DateTime<Utc>` — when the remote state was last refreshed.
    pub const LAST_SYNCED: &str = "last_synced";
}

/// Durable per-assistant bookkeeping keys inside an account document.
pub mod cfg_keys {
    pub const ENABLED: &str = "enabled";
    pub const LAST_RUN: &str = "last_run";
    pub const NEXT_RUN: &str = "next_run";
    pub const CONFIG_VERSION: &str = "config_version";
}

/// Coercion hint for an externally settable config key, consumed by the
/// admin boundary when it parses user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    None,
    Int,
    List,
}

/// One externally settable config key of an assistant.
#[derive(Debug, Clone, Copy)]
pub struct SettableKey {
    pub name: &'static str,
    pub coerce: Coercion,
}

impl SettableKey {
    pub const fn plain(name: &'static str) -> Self {
        Self {
            name,
            coerce: Coercion::None,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            coerce: Coercion::Int,
        }
    }

    pub const fn list(name: &'static str) -> Self {
        Self {
            name,
            coerce: Coercion::List,
        }
    }
}

/// A pluggable automation rule.
///
/// All operations receive an [`AccountCtx`] bound to the account's open
/// transaction; handles taken from it must not outlive the call.
pub trait Assistant: Send + Sync {
    /// Stable identifier; doubles as the assistant's config key inside
    /// each account document.
    fn id(&self) -> &'static str;

    /// Current schema version of the assistant's persisted config.
    fn config_version(&self) -> u32 {
        1
    }

    /// Config written when the assistant is first enabled for an account.
    fn init_config(&self) -> Plain {
        Plain::Map(BTreeMap::new())
    }

    /// Keys the admin boundary may set, with coercion hints.
    fn settable_keys(&self) -> &[SettableKey] {
        &[]
    }

    /// Whether the assistant is due for this account. A predicate: may
    /// read freely, should mutate nothing beyond trigger bookkeeping.
    fn should_run(&self, account: &AccountCtx) -> Result<bool, StoreError>;

    /// React to an inbound event. Returns true when the event makes a
    /// near-term run necessary (typically by scheduling a debounce
    /// deadline).
    fn handle_update(&self, account: &AccountCtx, event: &UpdateEvent) -> Result<bool, StoreError>;

    /// Perform the account mutation(s). `send_message` reaches the user's
    /// notification channel; delivery is fire-and-forget.
    fn run(
        &self,
        account: &AccountCtx,
        send_message: &mut dyn FnMut(&str),
    ) -> Result<(), AssistantError>;

    /// Upgrade persisted config from `old_version` to
    /// [`Assistant::config_version`]. Called once per account at load time.
    fn migrate_config(
        &self,
        account: &AccountCtx,
        cfg: &AssistantCfg,
        old_version: u32,
    ) -> Result<(), StoreError> {
        let _ = (account, cfg, old_version);
        Ok(())
    }
}

/// Read/write view of one account, bound to its active transaction.
pub struct AccountCtx<'a> {
    key: &'a str,
    tx: &'a Transaction<'a>,
}

impl<'a> AccountCtx<'a> {
    pub fn new(key: &'a str, tx: &'a Transaction<'a>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> &str {
        self.key
    }

    /// The account's durable root mapping.
    pub fn cfg(&self) -> TrackedMapping {
        self.tx.root()
    }

    /// Whether the account as a whole is enabled.
    pub fn enabled(&self) -> Result<bool, StoreError> {
        Ok(self.cfg().get_bool(cfg_keys::ENABLED)?.unwrap_or(false))
    }

    /// The assistant's config sub-mapping, if present.
    pub fn assistant_cfg(&self, id: &str) -> Result<Option<AssistantCfg>, StoreError> {
        Ok(self.cfg().get_mapping(id)?.map(AssistantCfg::new))
    }

    /// Whether `id` is enabled for this account. Missing config means
    /// disabled.
    pub fn assistant_enabled(&self, id: &str) -> Result<bool, StoreError> {
        match self.assistant_cfg(id)? {
            Some(cfg) => cfg.enabled(),
            None => Ok(false),
        }
    }

    /// Run `f` with the account's scratch map.
    pub fn with_scratch<R>(&self, f: impl FnOnce(&mut taskpilot_store::Scratch) -> R) -> R {
        self.tx.with_scratch(f)
    }

    /// The account's live remote client, if one was connected.
    pub fn remote(&self) -> Option<Arc<dyn RemoteTasks>> {
        self.with_scratch(|s| s.get::<Arc<dyn RemoteTasks>>(scratch_keys::REMOTE).cloned())
    }

    pub fn set_remote(&self, remote: Arc<dyn RemoteTasks>) {
        self.with_scratch(|s| s.set(scratch_keys::REMOTE, remote));
    }

    /// When the remote state was last refreshed, if ever this process.
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.with_scratch(|s| s.get::<DateTime<Utc>>(scratch_keys::LAST_SYNCED).copied())
    }

    pub fn set_last_synced(&self, at: DateTime<Utc>) {
        self.with_scratch(|s| s.set(scratch_keys::LAST_SYNCED, at));
    }
}

/// Typed wrapper over one assistant's config sub-mapping.
#[derive(Debug, Clone)]
pub struct AssistantCfg {
    cfg: TrackedMapping,
}

impl AssistantCfg {
    pub fn new(cfg: TrackedMapping) -> Self {
        Self { cfg }
    }

    pub fn raw(&self) -> &TrackedMapping {
        &self.cfg
    }

    pub fn enabled(&self) -> Result<bool, StoreError> {
        Ok(self.cfg.get_bool(cfg_keys::ENABLED)?.unwrap_or(false))
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.cfg.set(cfg_keys::ENABLED, enabled)
    }

    pub fn last_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.cfg.get_timestamp(cfg_keys::LAST_RUN)
    }

    pub fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.cfg.set(cfg_keys::LAST_RUN, at)
    }

    /// The explicit-override / debounce deadline. One field carries both
    /// semantics; see the trigger policies for precedence.
    pub fn next_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.cfg.get_timestamp(cfg_keys::NEXT_RUN)
    }

    pub fn set_next_run(&self, at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        self.cfg.set(cfg_keys::NEXT_RUN, at)
    }

    /// Persisted schema version. A missing or corrupt value (negative,
    /// oversized) reads as 0, which keeps the config eligible for
    /// migration.
    pub fn version(&self) -> Result<u32, StoreError> {
        Ok(self
            .cfg
            .get_i64(cfg_keys::CONFIG_VERSION)?
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0))
    }

    pub fn set_version(&self, version: u32) -> Result<(), StoreError> {
        self.cfg.set(cfg_keys::CONFIG_VERSION, version)
    }
}

/// Ordered registry of the assistants compiled into this deployment.
#[derive(Default)]
pub struct AssistantSet {
    ordered: Vec<Arc<dyn Assistant>>,
}

impl AssistantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, assistant: Arc<dyn Assistant>) {
        if self.contains(assistant.id()) {
            tracing::warn!(assistant = assistant.id(), "duplicate assistant id registered");
        }
        self.ordered.push(assistant);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Assistant>> {
        self.ordered.iter().find(|a| a.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Assistant>> {
        self.ordered.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ordered.iter().map(|a| a.id())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpilot_store::Store;

    struct Dummy(&'static str);

    impl Assistant for Dummy {
        fn id(&self) -> &'static str {
            self.0
        }

        fn should_run(&self, _account: &AccountCtx) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn handle_update(
            &self,
            _account: &AccountCtx,
            _event: &UpdateEvent,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn run(
            &self,
            _account: &AccountCtx,
            _send_message: &mut dyn FnMut(&str),
        ) -> Result<(), AssistantError> {
            Ok(())
        }
    }

    #[test]
    fn set_keeps_registration_order_and_looks_up_by_id() {
        let mut set = AssistantSet::new();
        set.register(Arc::new(Dummy("sorter")));
        set.register(Arc::new(Dummy("mover")));
        assert_eq!(set.ids().collect::<Vec<_>>(), vec!["sorter", "mover"]);
        assert!(set.contains("mover"));
        assert!(set.get("missing").is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn account_view_reads_enabled_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let doc = store.get("alice");
        let tx = doc.begin();
        let ctx = AccountCtx::new("alice", &tx);

        assert!(!ctx.enabled().unwrap());
        ctx.cfg().set(cfg_keys::ENABLED, true).unwrap();
        assert!(ctx.enabled().unwrap());

        assert!(!ctx.assistant_enabled("sorter").unwrap());
        ctx.cfg().set("sorter", Plain::empty_map()).unwrap();
        assert!(!ctx.assistant_enabled("sorter").unwrap());
        ctx.assistant_cfg("sorter")
            .unwrap()
            .unwrap()
            .set_enabled(true)
            .unwrap();
        assert!(ctx.assistant_enabled("sorter").unwrap());
    }

    #[test]
    fn assistant_cfg_next_run_null_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let doc = store.get("alice");
        let tx = doc.begin();
        let ctx = AccountCtx::new("alice", &tx);
        ctx.cfg().set("mover", Plain::empty_map()).unwrap();
        let cfg = ctx.assistant_cfg("mover").unwrap().unwrap();

        assert_eq!(cfg.next_run().unwrap(), None);
        let t = Utc::now();
        cfg.set_next_run(Some(t)).unwrap();
        assert_eq!(cfg.next_run().unwrap(), Some(t));
        cfg.set_next_run(None).unwrap();
        assert_eq!(cfg.next_run().unwrap(), None);
        assert!(cfg.raw().contains(cfg_keys::NEXT_RUN).unwrap());
    }

    #[test]
    fn corrupt_config_version_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let doc = store.get("alice");
        let tx = doc.begin();
        let ctx = AccountCtx::new("alice", &tx);
        ctx.cfg().set("mover", Plain::empty_map()).unwrap();
        let cfg = ctx.assistant_cfg("mover").unwrap().unwrap();

        assert_eq!(cfg.version().unwrap(), 0);
        cfg.set_version(3).unwrap();
        assert_eq!(cfg.version().unwrap(), 3);

        cfg.raw().set(cfg_keys::CONFIG_VERSION, -5i64).unwrap();
        assert_eq!(cfg.version().unwrap(), 0);
        cfg.raw().set(cfg_keys::CONFIG_VERSION, i64::MAX).unwrap();
        assert_eq!(cfg.version().unwrap(), 0);
    }
}
