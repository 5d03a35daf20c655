use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{ChartData, ChartKey};

struct Slot {
    computed_at: Option<Instant>,
    data: Option<ChartData>,
}

/// TTL cache for computed charts, keyed by the full request tuple.
///
/// Each key carries its own lock, so concurrent requests for the same
/// chart coalesce into one computation while distinct charts compute in
/// parallel. Failed computations are never cached. Expired slots are
/// swept on every lookup, so the map cannot grow without bound under
/// arbitrary request parameters.
pub struct ChartCache {
    ttl: Duration,
    slots: Mutex<HashMap<ChartKey, Arc<Mutex<Slot>>>>,
}

impl ChartCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached chart for `key`, or computes and stores it.
    pub async fn get_or_compute<F, Fut>(&self, key: ChartKey, compute: F) -> anyhow::Result<ChartData>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<ChartData>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            self.sweep_expired(&mut slots);
            slots
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        computed_at: None,
                        data: None,
                    }))
                })
                .clone()
        };

        let mut guard = slot.lock().await;
        if let (Some(at), Some(data)) = (guard.computed_at, guard.data.as_ref())
            && at.elapsed() < self.ttl
        {
            debug!(operation = "chart_cache_hit", "serving cached chart");
            return Ok(data.clone());
        }

        let data = compute().await?;
        guard.computed_at = Some(Instant::now());
        guard.data = Some(data.clone());
        Ok(data)
    }

    /// Drops expired entries. A slot is dropped only when nobody holds it:
    /// a locked slot is mid-computation, an extra Arc ref is a waiter.
    fn sweep_expired(&self, slots: &mut HashMap<ChartKey, Arc<Mutex<Slot>>>) {
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            match guard.computed_at {
                Some(at) => at.elapsed() < self.ttl,
                None => false,
            }
        });
        let swept = before - slots.len();
        if swept > 0 {
            debug!(operation = "chart_cache_sweep", swept, "dropped expired chart entries");
        }
    }

    /// Number of live cache entries.
    pub async fn entry_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Drops every cached entry. Called after each collection cycle so
    /// fresh samples show up without waiting out the TTL.
    pub async fn invalidate_all(&self) {
        let mut slots = self.slots.lock().await;
        let n = slots.len();
        slots.clear();
        if n > 0 {
            debug!(operation = "chart_cache_invalidate", entries = n, "cleared chart cache");
        }
    }
}
