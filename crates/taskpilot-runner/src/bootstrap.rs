//! Startup pass: load persisted documents, connect remotes, migrate
//! assistant configs.

use std::sync::Arc;

use chrono::Utc;
use taskpilot_store::{Store, StoreError};

use crate::assistant::{AccountCtx, AssistantSet};
use crate::remote::RemoteTasks;

/// Load every persisted document, connect a remote client for each
/// enabled account, and bring per-assistant configs up to the current
/// schema version. Called once before the scheduler starts.
///
/// `connect` maps an account's API token to a client; `None` means the
/// account stays loaded but offline until the next restart.
pub fn load_accounts(
    store: &Store,
    assistants: &AssistantSet,
    connect: &dyn Fn(&str) -> Option<Arc<dyn RemoteTasks>>,
) -> Result<(), StoreError> {
    for key in store.persisted_keys()? {
        let doc = store.get(&key);
        doc.load()?;
        if store.is_singleton(&key) {
            continue;
        }
        let tx = doc.begin();
        let account = AccountCtx::new(&key, &tx);
        if account.enabled()? {
            match account.cfg().get_str("token")? {
                Some(token) => match connect(&token) {
                    Some(remote) => {
                        // Connecting performs the initial sync, so the
                        // freshness stamp starts now.
                        account.set_remote(remote);
                        account.set_last_synced(Utc::now());
                    }
                    None => tracing::warn!(account = key, "remote connection failed, account stays offline"),
                },
                None => tracing::warn!(account = key, "enabled account has no token"),
            }
        }
        migrate_assistants(assistants, &account)?;
        tx.end()?;
    }
    tracing::info!(accounts = store.accounts().len(), "💾 loaded account documents");
    Ok(())
}

/// Upgrade every enabled assistant config to the assistant's current
/// schema version. Disabled configs are left at their old version and
/// picked up when re-enabled. Runs inside the account's load
/// transaction, so an upgraded config is persisted with the same commit.
pub fn migrate_assistants(
    assistants: &AssistantSet,
    account: &AccountCtx<'_>,
) -> Result<(), StoreError> {
    for assistant in assistants.iter() {
        let Some(cfg) = account.assistant_cfg(assistant.id())? else {
            continue;
        };
        if !cfg.enabled()? {
            continue;
        }
        let have = cfg.version()?;
        let want = assistant.config_version();
        if have < want {
            tracing::info!(
                account = account.key(),
                assistant = assistant.id(),
                from = have,
                to = want,
                "migrating assistant config"
            );
            assistant.migrate_config(account, &cfg, have)?;
            cfg.set_version(want)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{Assistant, AssistantCfg};
    use crate::error::{AssistantError, RemoteSyncError};
    use crate::event::UpdateEvent;
    use parking_lot::Mutex;
    use std::fs;
    use taskpilot_store::Plain;

    struct FakeRemote;

    impl RemoteTasks for FakeRemote {
        fn sync(&self) -> Result<(), RemoteSyncError> {
            Ok(())
        }
    }

    struct Mover;

    impl Assistant for Mover {
        fn id(&self) -> &'static str {
            "mover"
        }

        fn config_version(&self) -> u32 {
            2
        }

        fn should_run(&self, _account: &AccountCtx) -> Result<bool, taskpilot_store::StoreError> {
            Ok(false)
        }

        fn handle_update(
            &self,
            _account: &AccountCtx,
            _event: &UpdateEvent,
        ) -> Result<bool, taskpilot_store::StoreError> {
            Ok(false)
        }

        fn run(
            &self,
            _account: &AccountCtx,
            _send_message: &mut dyn FnMut(&str),
        ) -> Result<(), AssistantError> {
            Ok(())
        }

        fn migrate_config(
            &self,
            _account: &AccountCtx,
            cfg: &AssistantCfg,
            old_version: u32,
        ) -> Result<(), taskpilot_store::StoreError> {
            if old_version < 2 {
                cfg.raw().set("target_section", "Inbox")?;
            }
            Ok(())
        }
    }

    fn mover_set() -> AssistantSet {
        let mut set = AssistantSet::new();
        set.register(Arc::new(Mover));
        set
    }

    #[test]
    fn loads_connects_and_migrates_persisted_accounts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("alice.json"),
            r#"{
                "enabled": true,
                "token": "tok-alice",
                "created": {"__datetime__": true, "value": "2024-05-01T12:00:00.000000Z"},
                "mover": {"enabled": true}
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("scheduler.json"),
            r#"{"last_cycle": null}"#,
        )
        .unwrap();

        let store = Store::new(dir.path(), ["notifier", "scheduler"]).unwrap();
        let seen_tokens = Mutex::new(Vec::new());
        load_accounts(&store, &mover_set(), &|token| {
            seen_tokens.lock().push(token.to_string());
            Some(Arc::new(FakeRemote) as Arc<dyn RemoteTasks>)
        })
        .unwrap();

        assert_eq!(seen_tokens.lock().as_slice(), &["tok-alice".to_string()]);
        assert_eq!(store.accounts(), vec!["alice"]);

        let doc = store.get("alice");
        let tx = doc.begin();
        let account = AccountCtx::new("alice", &tx);
        assert!(account.remote().is_some());
        // The connect closure performed the initial sync; the freshness
        // stamp must reflect that or the first due run syncs again.
        assert!(account.last_synced().is_some());
        assert!(account.cfg().get_timestamp("created").unwrap().is_some());

        let cfg = account.assistant_cfg("mover").unwrap().unwrap();
        assert_eq!(cfg.version().unwrap(), 2);
        assert_eq!(
            cfg.raw().get_str("target_section").unwrap().as_deref(),
            Some("Inbox")
        );
        drop(tx);

        // The migration was committed in the load transaction.
        let raw = fs::read_to_string(dir.path().join("alice.json")).unwrap();
        assert!(raw.contains("config_version"));
        assert!(raw.contains("target_section"));
    }

    #[test]
    fn disabled_accounts_load_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bob.json"),
            r#"{"enabled": false, "token": "tok-bob", "mover": {"enabled": true}}"#,
        )
        .unwrap();

        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        load_accounts(&store, &mover_set(), &|_| {
            panic!("must not connect a disabled account")
        })
        .unwrap();

        let doc = store.get("bob");
        let tx = doc.begin();
        let account = AccountCtx::new("bob", &tx);
        assert!(account.remote().is_none());
        assert!(account.last_synced().is_none());
        // The account is offline but the assistant itself is enabled, so
        // its config still migrates.
        assert_eq!(
            account.assistant_cfg("mover").unwrap().unwrap().version().unwrap(),
            2
        );
    }

    #[test]
    fn disabled_assistant_configs_are_not_migrated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dave.json"),
            r#"{"enabled": true, "token": "tok-dave", "mover": {"enabled": false}}"#,
        )
        .unwrap();

        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        load_accounts(&store, &mover_set(), &|_| None).unwrap();

        let doc = store.get("dave");
        let tx = doc.begin();
        let cfg = AccountCtx::new("dave", &tx)
            .assistant_cfg("mover")
            .unwrap()
            .unwrap();
        assert_eq!(cfg.version().unwrap(), 0);
        assert_eq!(cfg.raw().get_str("target_section").unwrap(), None);
    }

    #[test]
    fn up_to_date_configs_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        {
            let doc = store.get("carol");
            let tx = doc.begin();
            tx.root().set("enabled", false).unwrap();
            tx.root().set("mover", Plain::empty_map()).unwrap();
            let cfg = AccountCtx::new("carol", &tx)
                .assistant_cfg("mover")
                .unwrap()
                .unwrap();
            cfg.set_enabled(true).unwrap();
            cfg.set_version(2).unwrap();
            tx.end().unwrap();
        }

        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        load_accounts(&store, &mover_set(), &|_| None).unwrap();

        let doc = store.get("carol");
        let tx = doc.begin();
        let cfg = AccountCtx::new("carol", &tx)
            .assistant_cfg("mover")
            .unwrap()
            .unwrap();
        assert_eq!(cfg.raw().get_str("target_section").unwrap(), None);
    }

    #[test]
    fn unknown_tagged_payloads_abort_the_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("mallory.json"),
            r#"{"enabled": true, "blob": {"__dataclass__": "State", "value": {}}}"#,
        )
        .unwrap();

        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let result = load_accounts(&store, &mover_set(), &|_| None);
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }
}
