// HTTP routes

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::ChartCache;
use crate::chart::ChartConfig;
use crate::config::AppConfig;
use crate::stats_repo::StatsRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) repo: Arc<StatsRepo>,
    pub(crate) cache: Arc<ChartCache>,
    pub(crate) chart_cfg: ChartConfig,
    pub(crate) config: AppConfig,
}

pub fn app(
    repo: Arc<StatsRepo>,
    cache: Arc<ChartCache>,
    chart_cfg: ChartConfig,
    config: AppConfig,
) -> Router {
    let state = AppState {
        repo,
        cache,
        chart_cfg,
        config,
    };
    Router::new()
        .route("/", get(|| async { "mapstats: map statistics service" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/data", get(http::api_data_handler)) // GET /api/data
        .route("/api/data_freshness", get(http::api_data_freshness_handler)) // GET /api/data_freshness
        .route("/api/date_range", get(http::api_date_range_handler)) // GET /api/date_range
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
