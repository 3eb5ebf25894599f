//! Per-callback call statistics.
//!
//! Every executed task is accounted against its callback identity: call
//! count, cumulative and maximum wall time, and the set of categories the
//! callback was registered under.
//!
//! A scheduler owns a private registry unless it is built with
//! `Scheduler::with_registry`, in which case several schedulers aggregate
//! into the same [`SharedRegistry`].

pub mod output;

use crate::scheduler::{CallbackId, KindSet, TaskKind};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Registry handle shared between schedulers on one thread.
pub type SharedRegistry = Rc<RefCell<ProfilingRegistry>>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Aggregated statistics for one callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRecord {
    /// Display name captured at the first call.
    pub name: String,
    /// Union of every category the callback ran under.
    pub kinds: KindSet,
    /// Number of completed calls.
    pub total_calls: u64,
    /// Cumulative wall time in microseconds.
    pub total_us: u64,
    /// Longest single call in microseconds.
    pub max_us: u64,
}

impl ProfileRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Mean wall time per call in microseconds.
    pub fn avg_us(&self) -> u64 {
        if self.total_calls == 0 {
            0
        } else {
            self.total_us / self.total_calls
        }
    }

    fn add_call(&mut self, origin: TaskKind, elapsed_us: u64) {
        self.total_us = self.total_us.saturating_add(elapsed_us);
        if self.max_us < elapsed_us {
            self.max_us = elapsed_us;
        }
        self.total_calls += 1;
        self.kinds.insert(origin);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Map from callback identity to its statistics.
#[derive(Debug, Default)]
pub struct ProfilingRegistry {
    records: FxHashMap<CallbackId, ProfileRecord>,
}

impl ProfilingRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry behind a shareable handle.
    pub fn shared() -> SharedRegistry {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Record for `id`, created with `name` on first sight.
    pub fn get_or_insert(&mut self, id: CallbackId, name: &str) -> &mut ProfileRecord {
        self.records
            .entry(id)
            .or_insert_with(|| ProfileRecord::new(name))
    }

    /// Account one completed call.
    pub fn record(&mut self, id: CallbackId, name: &str, origin: TaskKind, elapsed_us: u64) {
        self.get_or_insert(id, name).add_call(origin, elapsed_us);
    }

    /// Record for `id`, if any.
    pub fn get(&self, id: CallbackId) -> Option<&ProfileRecord> {
        self.records.get(&id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no callback has run yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by name, then identity.
    pub fn records(&self) -> Vec<(CallbackId, &ProfileRecord)> {
        let mut out: Vec<_> = self.records.iter().map(|(id, r)| (*id, r)).collect();
        out.sort_by(|a, b| a.1.name.cmp(&b.1.name).then(a.0.cmp(&b.0)));
        out
    }

    /// Drop every record that ran under a category in `filter`.
    /// Returns how many were dropped.
    pub fn clear(&mut self, filter: KindSet) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.kinds.intersects(filter));
        before - self.records.len()
    }

    /// Drop all records.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Sum of the records matching `filter`. `max_us` is the overall max.
    pub fn totals(&self, filter: KindSet) -> ProfileRecord {
        let mut total = ProfileRecord::new("TOTAL");
        for r in self.records.values().filter(|r| r.kinds.intersects(filter)) {
            total.total_calls += r.total_calls;
            total.total_us = total.total_us.saturating_add(r.total_us);
            total.max_us = total.max_us.max(r.max_us);
            total.kinds = total.kinds.union(r.kinds);
        }
        total
    }
}
