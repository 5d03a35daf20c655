// Shared test helpers

#![allow(dead_code)]

use std::sync::Arc;

use mapstats::models::{Sample, ServerAddr};
use mapstats::stats_repo::StatsRepo;
use tempfile::TempDir;

pub const HOUR_MS: i64 = 3_600_000;
pub const BUCKET_MS: i64 = 2 * HOUR_MS;

pub fn addr(host: &str, port: u16) -> ServerAddr {
    ServerAddr::new(host, port)
}

pub fn sample(host: &str, port: u16, map: &str, players: u32) -> Sample {
    Sample {
        server: addr(host, port),
        map: map.into(),
        players,
        server_name: None,
        country_code: None,
    }
}

/// Fresh store in a temp dir. The TempDir must stay alive for the test.
pub async fn test_repo() -> (Arc<StatsRepo>, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.db");
    let repo = StatsRepo::connect(path.to_str().unwrap(), 2).await.unwrap();
    repo.init().await.unwrap();
    (Arc::new(repo), dir)
}

/// Records a snapshot at `ts_ms` and stores its samples.
pub async fn seed_cycle(repo: &StatsRepo, guid: &str, ts_ms: i64, samples: &[Sample]) {
    assert!(repo.record_snapshot(guid, ts_ms).await.unwrap());
    repo.append_samples(guid, samples).await.unwrap();
}
