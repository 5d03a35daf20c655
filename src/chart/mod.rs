// Chart computation: repo-facing entry point + pure aggregation engine.
// DB access stays here; chart::engine is pure and fully testable in memory.

pub mod engine;

use crate::config::ChartSettings;
use crate::models::{ChartData, ChartRequest};
use crate::stats_repo::StatsRepo;
use tracing::instrument;

/// Engine tunables resolved from config.
#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub bucket_width_ms: i64,
    /// Bias exponent applied when a request does not carry one.
    pub default_bias: f64,
}

impl ChartConfig {
    pub fn from_settings(settings: &ChartSettings) -> Self {
        Self {
            bucket_width_ms: settings.bucket_width_minutes as i64 * 60_000,
            default_bias: settings.default_bias_exponent,
        }
    }
}

/// Computes a chart result for one normalized request. Pure function of the
/// store contents and the request; an empty registry or window yields the
/// well-formed empty result, never an error.
#[instrument(skip(repo, req, cfg), fields(days = req.days_to_show, maps = req.maps_to_show))]
pub async fn compute(
    repo: &StatsRepo,
    req: &ChartRequest,
    cfg: &ChartConfig,
) -> anyhow::Result<ChartData> {
    let Some(latest_ms) = repo.latest_snapshot_ts().await? else {
        return Ok(ChartData::empty());
    };
    let now_ms = chrono::Utc::now().timestamp_millis();
    let (start_ms, end_ms) = engine::resolve_window(req, latest_ms, now_ms);

    let facts = repo
        .query_window(start_ms, end_ms, req.server_filter.single())
        .await?;
    let counts = repo
        .snapshot_counts_by_bucket(start_ms, end_ms, cfg.bucket_width_ms)
        .await?;

    // Display names are cosmetic; a failed lookup must not fail the query.
    let names = match repo.load_server_names().await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(error = %e, "server name lookup failed, using host:port labels");
            Default::default()
        }
    };

    Ok(engine::build_chart(
        req,
        cfg,
        (start_ms, end_ms),
        &facts,
        &counts,
        &names,
    ))
}
