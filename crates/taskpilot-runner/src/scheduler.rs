//! The cooperative account scheduler.
//!
//! One worker thread alternates between draining queued update events
//! and polling every account for due assistants. Producers (webhook
//! receivers, chat bots, admin surfaces) hand events to a
//! [`SchedulerHandle`] and wake the worker through its condvar. Every
//! per-account and per-assistant failure is logged and isolated; the
//! loop itself only stops on shutdown.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use taskpilot_store::Store;

use crate::assistant::{AccountCtx, Assistant, AssistantSet};
use crate::event::UpdateEvent;
use crate::notify::Notifier;
use crate::remote::{sync_if_stale, SyncPolicy};

/// Loop timing and the sync policy applied once per account per cycle.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wait after a cycle that saw events or scheduled near-term work.
    pub short_wait: Duration,
    /// Wait after an idle cycle.
    pub long_wait: Duration,
    pub sync: SyncPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            short_wait: Duration::from_secs(3),
            long_wait: Duration::from_secs(60),
            sync: SyncPolicy::default(),
        }
    }
}

struct Shared {
    queue: Mutex<Vec<UpdateEvent>>,
    wake: Condvar,
    shutdown: AtomicBool,
}

/// Cloneable producer-side handle to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Queue an event and wake the worker.
    pub fn submit(&self, event: UpdateEvent) {
        self.shared.queue.lock().push(event);
        self.shared.wake.notify_all();
    }

    /// Ask the worker to finish its current cycle and exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
    }
}

pub struct Scheduler {
    store: Arc<Store>,
    assistants: Arc<AssistantSet>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, assistants: Arc<AssistantSet>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(store, assistants, notifier, SchedulerConfig::default())
    }

    pub fn with_config(
        store: Arc<Store>,
        assistants: Arc<AssistantSet>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            assistants,
            notifier,
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(Vec::new()),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run cycles until [`SchedulerHandle::shutdown`]. Blocks the calling
    /// thread; spawn a dedicated worker for it.
    pub fn run(&self) {
        tracing::info!(assistants = self.assistants.len(), "⏰ scheduler started");
        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let events = mem::take(&mut *self.shared.queue.lock());
            let busy = !events.is_empty();
            let urgent = self.drain_events(events);
            self.poll_accounts(Utc::now());

            let mut queue = self.shared.queue.lock();
            if queue.is_empty() && !self.shared.shutdown.load(Ordering::SeqCst) {
                let wait = if busy || urgent {
                    self.config.short_wait
                } else {
                    self.config.long_wait
                };
                self.shared.wake.wait_for(&mut queue, wait);
            }
        }
        tracing::info!("⏰ scheduler stopped");
    }

    /// Dispatch queued events, newest first, to the enabled assistants of
    /// their accounts. Returns whether any handler scheduled near-term
    /// work.
    fn drain_events(&self, events: Vec<UpdateEvent>) -> bool {
        let mut urgent = false;
        for event in events.into_iter().rev() {
            if !self.store.contains(&event.account_id) {
                tracing::debug!(account = event.account_id, kind = event.kind, "dropping event for unknown account");
                continue;
            }
            let doc = self.store.get(&event.account_id);
            let tx = doc.begin();
            let account = AccountCtx::new(&event.account_id, &tx);
            for assistant in self.assistants.iter() {
                match account.assistant_enabled(assistant.id()) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        tracing::error!(account = account.key(), assistant = assistant.id(), error = %err, "event dispatch failed");
                        continue;
                    }
                }
                match assistant.handle_update(&account, &event) {
                    Ok(needs_run) => urgent |= needs_run,
                    Err(err) => {
                        tracing::error!(account = account.key(), assistant = assistant.id(), error = %err, "event handler failed");
                    }
                }
            }
            if let Err(err) = tx.end() {
                tracing::error!(account = event.account_id, error = %err, "commit after event dispatch failed");
            }
        }
        urgent
    }

    /// One poll pass over every enabled account. Remote state is refreshed
    /// at most once per account, and only when an assistant is actually
    /// due; a failed refresh skips the account until the next cycle.
    fn poll_accounts(&self, now: DateTime<Utc>) {
        for key in self.store.accounts() {
            let doc = self.store.get(&key);
            let tx = doc.begin();
            let account = AccountCtx::new(&key, &tx);
            match account.enabled() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::error!(account = key, error = %err, "poll failed");
                    continue;
                }
            }

            let mut synced = false;
            for assistant in self.assistants.iter() {
                if !matches!(account.assistant_enabled(assistant.id()), Ok(true)) {
                    continue;
                }
                match assistant.should_run(&account) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        tracing::error!(account = key, assistant = assistant.id(), error = %err, "trigger check failed");
                        continue;
                    }
                }
                if !synced {
                    match sync_if_stale(&account, &self.config.sync, now) {
                        Ok(_) => synced = true,
                        Err(err) => {
                            tracing::warn!(account = key, error = %err, "skipping account until next cycle");
                            break;
                        }
                    }
                }
                self.run_assistant(&account, assistant, now);
            }

            if let Err(err) = tx.end() {
                tracing::error!(account = key, error = %err, "commit after poll failed");
            }
        }
    }

    fn run_assistant(&self, account: &AccountCtx<'_>, assistant: &Arc<dyn Assistant>, now: DateTime<Utc>) {
        tracing::debug!(account = account.key(), assistant = assistant.id(), "running assistant");
        let notifier = &self.notifier;
        let key = account.key().to_string();
        let mut send = |message: &str| notifier.send(&key, message);
        match assistant.run(account, &mut send) {
            Ok(()) => {
                let stamped = account
                    .assistant_cfg(assistant.id())
                    .and_then(|cfg| cfg.map(|cfg| cfg.set_last_run(now)).transpose());
                if let Err(err) = stamped {
                    tracing::error!(account = account.key(), assistant = assistant.id(), error = %err, "failed to stamp last run");
                }
            }
            Err(err) => {
                tracing::error!(account = account.key(), assistant = assistant.id(), error = %err, "assistant run failed");
            }
        }
    }
}
