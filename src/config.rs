use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chart: ChartSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

/// Aggregation tunables. Bucket width and the snapshot-count bias are
/// product decisions, so they live in config rather than in the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartSettings {
    #[serde(default = "default_bucket_width_minutes")]
    pub bucket_width_minutes: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_bias_exponent")]
    pub default_bias_exponent: f64,
}

fn default_bucket_width_minutes() -> u32 {
    120
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_bias_exponent() -> f64 {
    1.0
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            bucket_width_minutes: default_bucket_width_minutes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            default_bias_exponent: default_bias_exponent(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.vacuum_interval_secs > 0,
            "database.vacuum_interval_secs must be > 0, got {}",
            self.database.vacuum_interval_secs
        );
        anyhow::ensure!(
            self.chart.bucket_width_minutes > 0,
            "chart.bucket_width_minutes must be > 0, got {}",
            self.chart.bucket_width_minutes
        );
        anyhow::ensure!(
            self.chart.cache_ttl_secs > 0,
            "chart.cache_ttl_secs must be > 0, got {}",
            self.chart.cache_ttl_secs
        );
        anyhow::ensure!(
            self.chart.default_bias_exponent >= 0.1 && self.chart.default_bias_exponent <= 8.0,
            "chart.default_bias_exponent must be in [0.1, 8.0], got {}",
            self.chart.default_bias_exponent
        );
        Ok(())
    }
}
