// SQLite store for poll data. Normalized append-only facts: `snaps` is the
// registry of completed poll cycles (the denominator for averages), `samples`
// references snapshot/server/map dimension rows.

use crate::models::{Cooldown, Sample, SampleFact, ServerAddr};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// Loaded cooldowns are re-capped in case limits shrank between runs.
const MAX_LOADED_TIMEOUT_SECS: f64 = 5.0;
const MAX_LOADED_FAILURES: u32 = 4;

pub struct StatsRepo {
    pool: SqlitePool,
}

impl StatsRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snaps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guid TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snaps_created_at ON snaps(created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                country_code TEXT,
                UNIQUE(host, port)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS maps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                snapshot_id INTEGER NOT NULL REFERENCES snaps(id),
                server_id INTEGER NOT NULL REFERENCES servers(id),
                map_id INTEGER NOT NULL REFERENCES maps(id),
                players INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_samples_snapshot_id ON samples(snapshot_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_names (
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                name TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (host, port)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_cooldowns (
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                timeout REAL NOT NULL,
                failures INTEGER NOT NULL,
                skip_until INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (host, port)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records one completed poll cycle. Idempotent: a guid already present
    /// is left untouched. Returns whether a new row was inserted.
    #[instrument(skip(self), fields(repo = "stats", operation = "record_snapshot"))]
    pub async fn record_snapshot(&self, guid: &str, timestamp_ms: i64) -> anyhow::Result<bool> {
        let r = sqlx::query("INSERT OR IGNORE INTO snaps (guid, created_at) VALUES ($1, $2)")
            .bind(guid)
            .bind(timestamp_ms)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Appends one poll cycle's samples in a single transaction. Samples with
    /// an empty host are skipped (the rest of the batch still commits);
    /// duplicates are not detected. The snapshot must be recorded first.
    /// Returns the number of rows inserted.
    #[instrument(skip(self, samples), fields(repo = "stats", operation = "append_samples", samples_count = samples.len()))]
    pub async fn append_samples(&self, guid: &str, samples: &[Sample]) -> anyhow::Result<u64> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;

        let snapshot_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM snaps WHERE guid = $1")
                .bind(guid)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(snapshot_id) = snapshot_id else {
            anyhow::bail!("snapshot {} not recorded before append", guid);
        };

        let mut inserted = 0u64;
        let mut skipped = 0u64;
        for s in samples {
            if s.server.host.is_empty() {
                skipped += 1;
                continue;
            }

            sqlx::query("INSERT OR IGNORE INTO maps (name) VALUES ($1)")
                .bind(&s.map)
                .execute(&mut *tx)
                .await?;
            let map_id: i64 = sqlx::query_scalar("SELECT id FROM maps WHERE name = $1")
                .bind(&s.map)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT OR IGNORE INTO servers (host, port, country_code) VALUES ($1, $2, $3)",
            )
            .bind(&s.server.host)
            .bind(s.server.port as i64)
            .bind(&s.country_code)
            .execute(&mut *tx)
            .await?;
            let server_id: i64 =
                sqlx::query_scalar("SELECT id FROM servers WHERE host = $1 AND port = $2")
                    .bind(&s.server.host)
                    .bind(s.server.port as i64)
                    .fetch_one(&mut *tx)
                    .await?;

            sqlx::query(
                "INSERT INTO samples (snapshot_id, server_id, map_id, players) VALUES ($1, $2, $3, $4)",
            )
            .bind(snapshot_id)
            .bind(server_id)
            .bind(map_id)
            .bind(s.players as i64)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }
        tx.commit().await?;

        if skipped > 0 {
            tracing::debug!(skipped, "samples skipped (missing server identity)");
        }
        Ok(inserted)
    }

    /// All samples whose snapshot timestamp lies in [start_ms, end_ms),
    /// joined through the registry, optionally filtered to one server.
    /// Rows that fail to decode are dropped with a log, never fatal.
    #[instrument(skip(self), fields(repo = "stats", operation = "query_window"))]
    pub async fn query_window(
        &self,
        start_ms: i64,
        end_ms: i64,
        server: Option<&ServerAddr>,
    ) -> anyhow::Result<Vec<SampleFact>> {
        let base = "SELECT s.host, s.port, m.name AS map, sa.players, sn.created_at
             FROM samples sa
             JOIN snaps sn ON sa.snapshot_id = sn.id
             JOIN servers s ON sa.server_id = s.id
             JOIN maps m ON sa.map_id = m.id
             WHERE sn.created_at >= $1 AND sn.created_at < $2";
        let rows = if let Some(addr) = server {
            sqlx::query(&format!("{} AND s.host = $3 AND s.port = $4", base))
                .bind(start_ms)
                .bind(end_ms)
                .bind(&addr.host)
                .bind(addr.port as i64)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(base)
                .bind(start_ms)
                .bind(end_ms)
                .fetch_all(&self.pool)
                .await?
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::parse_fact_row(&row) {
                Ok(fact) => out.push(fact),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping undecodable sample row");
                }
            }
        }
        Ok(out)
    }

    /// Distinct snapshot count per bucket for buckets with at least one
    /// snapshot. Zero-snapshot buckets are absent, so callers can tell
    /// "no data collected" from "data collected, zero players".
    #[instrument(skip(self), fields(repo = "stats", operation = "snapshot_counts_by_bucket"))]
    pub async fn snapshot_counts_by_bucket(
        &self,
        start_ms: i64,
        end_ms: i64,
        bucket_width_ms: i64,
    ) -> anyhow::Result<BTreeMap<i64, u64>> {
        anyhow::ensure!(bucket_width_ms > 0, "bucket width must be > 0");
        let rows = sqlx::query(
            "SELECT (created_at / $3) * $3 AS bucket, COUNT(DISTINCT guid) AS n
             FROM snaps WHERE created_at >= $1 AND created_at < $2
             GROUP BY bucket",
        )
        .bind(start_ms)
        .bind(end_ms)
        .bind(bucket_width_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = BTreeMap::new();
        for row in rows {
            let bucket: i64 = row.try_get("bucket")?;
            let n: i64 = row.try_get("n")?;
            out.insert(bucket, n.max(0) as u64);
        }
        Ok(out)
    }

    /// Timestamp of the most recent recorded snapshot, if any.
    pub async fn latest_snapshot_ts(&self) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(created_at) FROM snaps")
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    /// (min, max) snapshot timestamps, or None when the registry is empty.
    pub async fn snapshot_time_range(&self) -> anyhow::Result<Option<(i64, i64)>> {
        let row = sqlx::query("SELECT MIN(created_at) AS lo, MAX(created_at) AS hi FROM snaps")
            .fetch_one(&self.pool)
            .await?;
        let lo: Option<i64> = row.try_get("lo")?;
        let hi: Option<i64> = row.try_get("hi")?;
        Ok(lo.zip(hi))
    }

    /// Upserts display names reported alongside samples.
    #[instrument(skip(self, names), fields(repo = "stats", operation = "save_server_names", names_count = names.len()))]
    pub async fn save_server_names(
        &self,
        names: &[(ServerAddr, String)],
    ) -> anyhow::Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for (addr, name) in names {
            if name.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT OR REPLACE INTO server_names (host, port, name, updated_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(&addr.host)
            .bind(addr.port as i64)
            .bind(name)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_server_names(&self) -> anyhow::Result<HashMap<ServerAddr, String>> {
        let rows = sqlx::query("SELECT host, port, name FROM server_names")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let host: String = row.try_get("host")?;
            let port: i64 = row.try_get("port")?;
            let name: String = row.try_get("name")?;
            let Ok(port) = u16::try_from(port) else {
                continue;
            };
            out.insert(ServerAddr::new(host, port), name);
        }
        Ok(out)
    }

    /// Loads persisted probe cooldowns, re-capping timeout and failure count.
    pub async fn load_cooldowns(&self) -> anyhow::Result<HashMap<ServerAddr, Cooldown>> {
        let rows =
            sqlx::query("SELECT host, port, timeout, failures, skip_until FROM server_cooldowns")
                .fetch_all(&self.pool)
                .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let host: String = row.try_get("host")?;
            let port: i64 = row.try_get("port")?;
            let timeout: f64 = row.try_get("timeout")?;
            let failures: i64 = row.try_get("failures")?;
            let skip_until: i64 = row.try_get("skip_until")?;
            let Ok(port) = u16::try_from(port) else {
                continue;
            };
            out.insert(
                ServerAddr::new(host, port),
                Cooldown {
                    timeout_secs: timeout.min(MAX_LOADED_TIMEOUT_SECS),
                    failures: (failures.max(0) as u32).min(MAX_LOADED_FAILURES),
                    skip_until_ms: skip_until,
                },
            );
        }
        Ok(out)
    }

    #[instrument(skip(self, cooldowns), fields(repo = "stats", operation = "save_cooldowns", cooldowns_count = cooldowns.len()))]
    pub async fn save_cooldowns(
        &self,
        cooldowns: &HashMap<ServerAddr, Cooldown>,
    ) -> anyhow::Result<()> {
        if cooldowns.is_empty() {
            return Ok(());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for (addr, c) in cooldowns {
            sqlx::query(
                "INSERT OR REPLACE INTO server_cooldowns (host, port, timeout, failures, skip_until, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&addr.host)
            .bind(addr.port as i64)
            .bind(c.timeout_secs)
            .bind(c.failures as i64)
            .bind(c.skip_until_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Distinct servers that reported within the last `days` days. Used to
    /// keep probing servers that dropped off the directory listing.
    pub async fn recent_servers(&self, days: u32) -> anyhow::Result<Vec<ServerAddr>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - (days as i64) * 86_400_000;
        let rows = sqlx::query(
            "SELECT DISTINCT s.host, s.port
             FROM samples sa
             JOIN snaps sn ON sa.snapshot_id = sn.id
             JOIN servers s ON sa.server_id = s.id
             WHERE sn.created_at >= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let host: String = row.try_get("host")?;
            let port: i64 = row.try_get("port")?;
            if let Ok(port) = u16::try_from(port) {
                out.push(ServerAddr::new(host, port));
            }
        }
        Ok(out)
    }

    /// Reclaim space (run on the maintenance schedule).
    #[instrument(skip(self), fields(repo = "stats", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_fact_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<SampleFact> {
        let host: String = row.try_get("host")?;
        let port: i64 = row.try_get("port")?;
        let map: String = row.try_get("map")?;
        let players: i64 = row.try_get("players")?;
        let timestamp_ms: i64 = row.try_get("created_at")?;
        let port = u16::try_from(port)?;
        Ok(SampleFact {
            server: ServerAddr::new(host, port),
            map,
            players: players.max(0),
            timestamp_ms,
        })
    }
}
