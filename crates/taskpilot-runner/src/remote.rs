//! Remote task-tracker access and the staleness policy around it.
//!
//! The scheduler refreshes an account's remote state at most once per
//! cycle, and only when a run is actually due and the cached state is
//! older than the policy allows. A failed refresh is retried a bounded
//! number of times with a fixed delay; if the cycle's budget is
//! exhausted the account is skipped and picked up again next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::assistant::AccountCtx;
use crate::error::RemoteSyncError;

/// A connected task-tracker client for one account. Implementations own
/// their transport; `sync` refreshes the in-memory view of the remote.
pub trait RemoteTasks: Send + Sync {
    fn sync(&self) -> Result<(), RemoteSyncError>;
}

/// When and how hard to refresh remote state.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    /// Cached remote state older than this is refreshed before a run.
    pub stale_after: chrono::Duration,
    /// Pause between retries of a failed refresh.
    pub retry_delay: Duration,
    /// Refresh attempts per account per scheduler cycle.
    pub max_attempts: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::minutes(10),
            retry_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Refresh `remote`, retrying per `policy`. Returns the last error when
/// every attempt fails.
pub fn sync_with_retry(
    remote: &Arc<dyn RemoteTasks>,
    policy: &SyncPolicy,
) -> Result<(), RemoteSyncError> {
    let mut attempt = 1;
    loop {
        match remote.sync() {
            Ok(()) => return Ok(()),
            Err(err) if attempt < policy.max_attempts => {
                tracing::warn!(attempt, error = %err, "remote sync failed, retrying");
                std::thread::sleep(policy.retry_delay);
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "remote sync failed, giving up this cycle");
                return Err(err);
            }
        }
    }
}

/// Refresh the account's remote state if it is stale. Returns whether a
/// refresh happened. Accounts without a connected remote are left alone.
pub fn sync_if_stale(
    account: &AccountCtx<'_>,
    policy: &SyncPolicy,
    now: DateTime<Utc>,
) -> Result<bool, RemoteSyncError> {
    let Some(remote) = account.remote() else {
        return Ok(false);
    };
    if let Some(last) = account.last_synced() {
        if now - last <= policy.stale_after {
            return Ok(false);
        }
    }
    sync_with_retry(&remote, policy)?;
    account.set_last_synced(now);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskpilot_store::Store;

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl Flaky {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    impl RemoteTasks for Flaky {
        fn sync(&self) -> Result<(), RemoteSyncError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(RemoteSyncError::new("transient"))
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy() -> SyncPolicy {
        SyncPolicy {
            retry_delay: Duration::from_millis(1),
            ..SyncPolicy::default()
        }
    }

    #[test]
    fn retries_until_success_within_budget() {
        let flaky = Arc::new(Flaky::new(2));
        let remote: Arc<dyn RemoteTasks> = flaky.clone();
        sync_with_retry(&remote, &fast_policy()).unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_budget_exhausted() {
        let flaky = Arc::new(Flaky::new(10));
        let remote: Arc<dyn RemoteTasks> = flaky.clone();
        assert!(sync_with_retry(&remote, &fast_policy()).is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stale_check_skips_fresh_state_and_accounts_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let doc = store.get("alice");
        let tx = doc.begin();
        let ctx = AccountCtx::new("alice", &tx);
        let policy = fast_policy();
        let now = Utc::now();

        // No remote connected: nothing to do.
        assert!(!sync_if_stale(&ctx, &policy, now).unwrap());

        let flaky = Arc::new(Flaky::new(0));
        ctx.set_remote(flaky.clone());

        // Never synced: refresh and stamp.
        assert!(sync_if_stale(&ctx, &policy, now).unwrap());
        assert_eq!(ctx.last_synced(), Some(now));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);

        // Fresh: no second refresh.
        let soon = now + chrono::Duration::minutes(5);
        assert!(!sync_if_stale(&ctx, &policy, soon).unwrap());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);

        // Stale again: refresh and restamp.
        let later = now + chrono::Duration::minutes(11);
        assert!(sync_if_stale(&ctx, &policy, later).unwrap());
        assert_eq!(ctx.last_synced(), Some(later));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_refresh_does_not_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), ["scheduler"]).unwrap();
        let doc = store.get("bob");
        let tx = doc.begin();
        let ctx = AccountCtx::new("bob", &tx);
        ctx.set_remote(Arc::new(Flaky::new(10)));

        assert!(sync_if_stale(&ctx, &fast_policy(), Utc::now()).is_err());
        assert_eq!(ctx.last_synced(), None);
    }
}
