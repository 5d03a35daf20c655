use std::collections::HashMap;

use crate::models::{Cooldown, ServerAddr};

const BASE_TIMEOUT_SECS: f64 = 1.0;
const MIN_TIMEOUT_SECS: f64 = 0.1;
const MAX_TIMEOUT_SECS: f64 = 5.0;
const BASE_SKIP_SECS: i64 = 60;
const MAX_SKIP_SECS: i64 = 600;

/// Adaptive per-server probe timeouts with exponential skip backoff.
///
/// Responsive servers converge to short timeouts so a cycle spends little
/// time on them; a failing server doubles its timeout and sits out whole
/// cycles for progressively longer stretches instead of stalling every
/// scan.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    entries: HashMap<ServerAddr, Cooldown>,
}

impl CooldownTracker {
    pub fn from_entries(entries: HashMap<ServerAddr, Cooldown>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &HashMap<ServerAddr, Cooldown> {
        &self.entries
    }

    /// True while the server is inside its skip window.
    pub fn should_skip(&self, addr: &ServerAddr, now_ms: i64) -> bool {
        self.entries
            .get(addr)
            .is_some_and(|c| now_ms < c.skip_until_ms)
    }

    pub fn timeout_for(&self, addr: &ServerAddr) -> f64 {
        self.entries
            .get(addr)
            .map_or(BASE_TIMEOUT_SECS, |c| c.timeout_secs)
    }

    /// A reply arrived: shrink the timeout toward the floor and clear any
    /// backoff.
    pub fn on_success(&mut self, addr: &ServerAddr) {
        let entry = self.entries.entry(addr.clone()).or_insert_with(default_cooldown);
        entry.timeout_secs = (entry.timeout_secs * 0.9).max(MIN_TIMEOUT_SECS);
        entry.failures = 0;
        entry.skip_until_ms = 0;
    }

    /// A probe timed out or errored: double the timeout and extend the
    /// skip window (60s, 120s, 240s, capped at 600s).
    pub fn on_failure(&mut self, addr: &ServerAddr, now_ms: i64) {
        let entry = self.entries.entry(addr.clone()).or_insert_with(default_cooldown);
        entry.timeout_secs = (entry.timeout_secs * 2.0).min(MAX_TIMEOUT_SECS);
        entry.failures = entry.failures.saturating_add(1);
        let skip = (BASE_SKIP_SECS << (entry.failures - 1).min(30)).min(MAX_SKIP_SECS);
        entry.skip_until_ms = now_ms + skip * 1000;
    }
}

fn default_cooldown() -> Cooldown {
    Cooldown {
        timeout_secs: BASE_TIMEOUT_SECS,
        failures: 0,
        skip_until_ms: 0,
    }
}
