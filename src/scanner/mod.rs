//! Poll-cycle collection. The network protocol lives behind the
//! [`ServerProbe`] and [`ServerDirectory`] traits; this module owns the
//! cycle itself: snapshot registration, concurrent probing, name
//! sanitation, backoff bookkeeping and cache invalidation.

pub mod cooldown;
pub mod sanitize;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{StreamExt, stream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::ChartCache;
use crate::chart::{self, ChartConfig};
use crate::models::{ChartRequest, Sample, ServerAddr};
use crate::stats_repo::StatsRepo;

pub use cooldown::CooldownTracker;
pub use sanitize::{sanitize_map_name, sanitize_server_name};

/// What a successful probe learned about one server.
#[derive(Debug, Clone)]
pub struct ProbeReply {
    pub map: String,
    pub players: u32,
    pub server_name: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:.1}s")]
    Timeout(f64),
    #[error("probe failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Queries a single game server for its current state.
pub trait ServerProbe: Send + Sync {
    fn probe(
        &self,
        addr: ServerAddr,
        timeout: Duration,
    ) -> impl Future<Output = Result<ProbeReply, ProbeError>> + Send;
}

/// Source of the current server list, typically a master-server query.
pub trait ServerDirectory: Send + Sync {
    fn list_servers(&self) -> impl Future<Output = anyhow::Result<Vec<ServerAddr>>> + Send;
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub interval_secs: u64,
    pub concurrency: usize,
    /// Servers seen in the store within this many days are re-probed even
    /// when the directory no longer lists them.
    pub revisit_days: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            concurrency: 64,
            revisit_days: 3,
        }
    }
}

pub struct Scanner<P, D> {
    repo: Arc<StatsRepo>,
    probe: P,
    directory: D,
    config: ScanConfig,
    cooldowns: CooldownTracker,
}

impl<P: ServerProbe, D: ServerDirectory> Scanner<P, D> {
    pub async fn new(
        repo: Arc<StatsRepo>,
        probe: P,
        directory: D,
        config: ScanConfig,
    ) -> anyhow::Result<Self> {
        let cooldowns = CooldownTracker::from_entries(repo.load_cooldowns().await?);
        Ok(Self {
            repo,
            probe,
            directory,
            config,
            cooldowns,
        })
    }

    /// Runs one poll cycle: register the snapshot, probe every candidate
    /// server, store whatever answered. Probe failures only update backoff
    /// state; a cycle always completes.
    #[instrument(skip(self), fields(operation = "scan_cycle"))]
    pub async fn run_cycle(&mut self) -> anyhow::Result<u64> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let guid = now.format("%Y%m%d%H%M%S").to_string();

        if !self.repo.record_snapshot(&guid, now_ms).await? {
            warn!(guid, "snapshot already recorded, skipping cycle");
            return Ok(0);
        }

        let targets = self.collect_targets(now_ms).await?;
        if targets.is_empty() {
            debug!("no servers to probe");
            return Ok(0);
        }
        let target_count = targets.len();

        let results: Vec<(ServerAddr, Result<ProbeReply, ProbeError>)> =
            stream::iter(targets.into_iter().map(|addr| {
                let timeout = Duration::from_secs_f64(self.cooldowns.timeout_for(&addr));
                let probe = &self.probe;
                async move {
                    let result = probe.probe(addr.clone(), timeout).await;
                    (addr, result)
                }
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut samples = Vec::new();
        let mut names = Vec::new();
        for (addr, result) in results {
            match result {
                Ok(reply) => {
                    self.cooldowns.on_success(&addr);
                    let map = sanitize_map_name(&reply.map);
                    if map.is_empty() {
                        debug!(server = %addr, "dropping sample with empty map name");
                        continue;
                    }
                    if let Some(name) = reply.server_name.as_deref() {
                        let name = sanitize_server_name(name);
                        if !name.is_empty() {
                            names.push((addr.clone(), name));
                        }
                    }
                    samples.push(Sample {
                        server: addr,
                        map,
                        players: reply.players,
                        server_name: reply.server_name,
                        country_code: reply.country_code,
                    });
                }
                Err(err) => {
                    debug!(server = %addr, %err, "probe failed");
                    self.cooldowns.on_failure(&addr, now_ms);
                }
            }
        }

        let stored = self.repo.append_samples(&guid, &samples).await?;
        if !names.is_empty() {
            self.repo.save_server_names(&names).await?;
        }
        self.repo.save_cooldowns(self.cooldowns.entries()).await?;

        info!(
            guid,
            probed = target_count,
            responded = samples.len(),
            stored,
            "scan cycle complete"
        );
        Ok(stored)
    }

    /// Directory listing merged with recently seen servers, minus anything
    /// inside its backoff skip window.
    async fn collect_targets(&self, now_ms: i64) -> anyhow::Result<Vec<ServerAddr>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        match self.directory.list_servers().await {
            Ok(listed) => {
                for addr in listed {
                    if seen.insert(addr.clone()) {
                        targets.push(addr);
                    }
                }
            }
            Err(err) => warn!(%err, "server directory query failed, using known servers"),
        }

        for addr in self.repo.recent_servers(self.config.revisit_days).await? {
            if seen.insert(addr.clone()) {
                targets.push(addr);
            }
        }

        targets.retain(|addr| !self.cooldowns.should_skip(addr, now_ms));
        Ok(targets)
    }
}

/// Spawns the periodic scan loop. Every completed cycle invalidates the
/// chart cache (even an empty cycle changes snapshot counts and therefore
/// divisors and gap detection) and re-primes the default chart so the
/// common request never hits a cold cache. Returns a shutdown handle;
/// firing it stops the loop after the current cycle.
pub fn spawn<P, D>(
    mut scanner: Scanner<P, D>,
    cache: Arc<ChartCache>,
    chart_cfg: ChartConfig,
) -> oneshot::Sender<()>
where
    P: ServerProbe + 'static,
    D: ServerDirectory + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let interval_secs = scanner.config.interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match scanner.run_cycle().await {
                        Ok(_) => {
                            cache.invalidate_all().await;
                            refresh_default_chart(&scanner.repo, &cache, &chart_cfg).await;
                        }
                        Err(err) => error!(%err, "scan cycle failed"),
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("scanner shutting down");
                    break;
                }
            }
        }
    });
    shutdown_tx
}

async fn refresh_default_chart(repo: &Arc<StatsRepo>, cache: &ChartCache, cfg: &ChartConfig) {
    let req = ChartRequest {
        bias_exponent: cfg.default_bias,
        ..ChartRequest::default()
    };
    let key = req.cache_key();
    let repo = repo.clone();
    let cfg = cfg.clone();
    let result = cache
        .get_or_compute(key, || async move { chart::compute(&repo, &req, &cfg).await })
        .await;
    if let Err(err) = result {
        warn!(%err, "default chart refresh failed");
    }
}
