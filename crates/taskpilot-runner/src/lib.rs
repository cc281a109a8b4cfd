//! taskpilot-runner — assistant contract, trigger policies, and the
//! cooperative account scheduler.
//!
//! ```text
//!  webhooks / bots / admin surfaces
//!            │ submit(UpdateEvent)
//!            ▼
//!    ┌────────────────┐   drain events (newest first)
//!    │ SchedulerHandle│──────────────┐
//!    └────────────────┘              ▼
//!    ┌───────────────────────────────────────────┐
//!    │ Scheduler (one worker thread)             │
//!    │   drain_events ─► handle_update           │
//!    │   poll_accounts ─► should_run ─► sync ─►  │
//!    │                    run ─► last_run stamp  │
//!    └───────────────────────────────────────────┘
//!            │ per-account transactions
//!            ▼
//!    taskpilot-store (documents, autosave)
//! ```
//!
//! Assistants are the unit of automation: each one implements
//! [`Assistant`] and is driven against every enabled account. Failures
//! are logged and isolated per assistant and per account.

pub mod assistant;
pub mod bootstrap;
pub mod error;
pub mod event;
pub mod notify;
pub mod remote;
pub mod scheduler;
pub mod triggers;

pub use assistant::{
    cfg_keys, scratch_keys, AccountCtx, Assistant, AssistantCfg, AssistantSet, Coercion,
    SettableKey,
};
pub use bootstrap::load_accounts;
pub use error::{AssistantError, RemoteSyncError};
pub use event::UpdateEvent;
pub use notify::{LogNotifier, Notifier};
pub use remote::{sync_if_stale, sync_with_retry, RemoteTasks, SyncPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use triggers::{Debounced, Periodic};
