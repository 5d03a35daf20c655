// Background maintenance: VACUUM on a configurable schedule (cron
// expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::stats_repo::StatsRepo;

/// Spawns the maintenance worker. Returns a join handle.
pub fn spawn(repo: Arc<StatsRepo>, config: DatabaseConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, config).await;
    })
}

async fn run(repo: Arc<StatsRepo>, config: DatabaseConfig) {
    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config, vacuum_tx));

    while vacuum_rx.recv().await.is_some() {
        if let Err(e) = repo.vacuum().await {
            warn!(error = %e, "vacuum failed");
        } else {
            info!("vacuum complete");
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: DatabaseConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
