//! Module-scoped timers: pure timing core.
//!
//! Like the mutation dispatcher, the wheel holds no clock of its own -
//! [`TimerWheel::pump`] is handed `now` and fires whatever is due, which
//! keeps every timing property deterministic under test. The async
//! runtime shell sleeps until [`TimerWheel::next_due`].
//!
//! Two entry kinds:
//! - `every(period, cb)` - repeating tick, lives until cancelled;
//! - `do_after(cond, cb, interval)` - polls a condition until it yields a
//!   value, then invokes the callback exactly once with that value and
//!   stops. The "wait for a derived condition" primitive for cases with
//!   no direct mutation signal (e.g. data filled in by an unrelated
//!   fetch).

use std::time::{Duration, Instant};

use crate::dom::Document;
use crate::watch::Owner;

/// Default polling cadence for `do_after`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to one timer; cancelling an already-fired or cancelled handle
/// is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

type EveryCallback = Box<dyn FnMut(&mut Document) -> anyhow::Result<()> + Send>;

/// Erased condition probe: returns `Ok(true)` once it has fired.
type Probe = Box<dyn FnMut(&mut Document) -> anyhow::Result<bool> + Send>;

enum TimerKind {
    Every(EveryCallback),
    DoAfter(Probe),
}

struct TimerEntry {
    handle: TimerHandle,
    owner: Option<Owner>,
    due: Instant,
    period: Duration,
    kind: TimerKind,
}

/// All live timers, engine-wide, released per owner on module teardown.
#[derive(Default)]
pub struct TimerWheel {
    entries: Vec<TimerEntry>,
    next_handle: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repeating timer; first fire one period from `now`.
    pub fn every(
        &mut self,
        owner: Option<Owner>,
        now: Instant,
        period: Duration,
        cb: EveryCallback,
    ) -> TimerHandle {
        self.push(owner, now + period, period, TimerKind::Every(cb))
    }

    /// Poll `cond` at `interval` until it yields a value, then run `cb`
    /// with that value exactly once.
    pub fn do_after<T, C, F>(
        &mut self,
        owner: Option<Owner>,
        now: Instant,
        interval: Duration,
        mut cond: C,
        cb: F,
    ) -> TimerHandle
    where
        T: Send + 'static,
        C: FnMut(&Document) -> Option<T> + Send + 'static,
        F: FnOnce(&mut Document, T) -> anyhow::Result<()> + Send + 'static,
    {
        let mut cb = Some(cb);
        let probe: Probe = Box::new(move |doc| {
            let Some(value) = cond(doc) else {
                return Ok(false);
            };
            if let Some(cb) = cb.take() {
                cb(doc, value)?;
            }
            Ok(true)
        });
        self.push(owner, now + interval, interval, TimerKind::DoAfter(probe))
    }

    fn push(
        &mut self,
        owner: Option<Owner>,
        due: Instant,
        period: Duration,
        kind: TimerKind,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.entries.push(TimerEntry { handle, owner, due, period, kind });
        handle
    }

    /// Cancel a single timer. Returns whether it was still live.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        self.entries.len() != before
    }

    /// Cancel every timer a module session started.
    pub fn cancel_owner(&mut self, owner: &Owner) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.owner.as_ref() != Some(owner));
        before - self.entries.len()
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    pub fn live_count_for(&self, owner: &Owner) -> usize {
        self.entries
            .iter()
            .filter(|e| e.owner.as_ref() == Some(owner))
            .count()
    }

    /// Earliest due instant, for precise sleeping. `None` = nothing live.
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.due).min()
    }

    /// Fire everything due at `now`. Errors are logged and suppressed; a
    /// failing `every` callback keeps its timer.
    pub fn pump(&mut self, now: Instant, doc: &mut Document) {
        // Indices shift as entries complete; take due entries out first.
        let mut due: Vec<TimerEntry> = Vec::new();
        let mut idx = 0;
        while idx < self.entries.len() {
            if self.entries[idx].due <= now {
                due.push(self.entries.remove(idx));
            } else {
                idx += 1;
            }
        }

        for mut entry in due {
            match &mut entry.kind {
                TimerKind::Every(cb) => {
                    if let Err(err) = cb(doc) {
                        crate::log!("error"; "timer callback failed: {err:#}");
                    }
                    entry.due = now + entry.period;
                    self.entries.push(entry);
                }
                TimerKind::DoAfter(probe) => match probe(doc) {
                    Ok(true) => {} // fired; entry dropped
                    Ok(false) => {
                        entry.due = now + entry.period;
                        self.entries.push(entry);
                    }
                    Err(err) => {
                        crate::log!("error"; "do_after callback failed: {err:#}");
                    }
                },
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
