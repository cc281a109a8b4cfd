//! Standard trigger policies for periodic and event-driven assistants.
//!
//! Both policies share the single `next_run` field on the assistant's
//! config: an explicit override deadline and a debounce deadline are the
//! same thing. Precedence, in [`Periodic::due`] order: never ran → due;
//! a set, passed `next_run` → due (and cleared); otherwise the periodic
//! interval against `last_run` decides.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use taskpilot_store::StoreError;

use crate::assistant::AssistantCfg;
use crate::event::UpdateEvent;

/// Due when the interval since `last_run` has elapsed, or a scheduled
/// `next_run` deadline has passed, or the assistant has never run.
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    interval: Duration,
}

impl Periodic {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes))
    }

    pub fn due(&self, cfg: &AssistantCfg, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(last_run) = cfg.last_run()? else {
            return Ok(true);
        };
        if let Some(next_run) = cfg.next_run()? {
            if now > next_run {
                cfg.set_next_run(None)?;
                return Ok(true);
            }
        }
        Ok(now - last_run > self.interval)
    }
}

/// Schedules a near-term `next_run` deadline when a matching event
/// arrives, coalescing bursts: an earlier deadline that is still in the
/// future is never pushed back.
#[derive(Debug, Clone)]
pub struct Debounced {
    delay: Duration,
    kinds: Option<HashSet<String>>,
}

impl Debounced {
    /// Debounce every event kind.
    pub fn new(delay: Duration) -> Self {
        Self { delay, kinds: None }
    }

    /// Debounce only the given event kinds; everything else is ignored.
    pub fn for_kinds<'k>(delay: Duration, kinds: impl IntoIterator<Item = &'k str>) -> Self {
        Self {
            delay,
            kinds: Some(kinds.into_iter().map(str::to_string).collect()),
        }
    }

    /// Feed one event through the policy. Returns whether a (re)scheduled
    /// deadline makes a near-term run necessary.
    pub fn observe(
        &self,
        cfg: &AssistantCfg,
        event: &UpdateEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return Ok(false);
            }
        }
        let candidate = now + self.delay;
        if let Some(next_run) = cfg.next_run()? {
            if candidate > next_run && next_run > now {
                return Ok(false);
            }
        }
        cfg.set_next_run(Some(candidate))?;
        Ok(true)
    }
}
