// GET handlers: version, api/data, api/data_freshness, api/date_range

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::DateTime;
use tracing::error;

use super::AppState;
use crate::version::{NAME, VERSION};
use crate::{chart, query};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/data — the chart query. Lenient parsing: bad params fall back
/// to defaults, so this only fails when the store itself does.
pub(super) async fn api_data_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let req = query::parse_chart_request(&params, state.config.chart.default_bias_exponent);
    let key = req.cache_key();
    let repo = state.repo.clone();
    let cfg = state.chart_cfg.clone();
    let result = state
        .cache
        .get_or_compute(key, || async move { chart::compute(&repo, &req, &cfg).await })
        .await;
    match result {
        Ok(data) => axum::Json(data).into_response(),
        Err(e) => {
            error!(error = %e, "chart query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": "chart computation failed" })),
            )
                .into_response()
        }
    }
}

/// GET /api/data_freshness — timestamp of the newest recorded snapshot.
pub(super) async fn api_data_freshness_handler(State(state): State<AppState>) -> Response {
    match state.repo.latest_snapshot_ts().await {
        Ok(latest) => {
            let formatted = latest
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| dt.format("%Y-%m-%d-%H:%M:%S").to_string());
            axum::Json(serde_json::json!({ "data_freshness": formatted })).into_response()
        }
        Err(e) => {
            error!(error = %e, "freshness query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /api/date_range — first and last snapshot dates, for date pickers.
pub(super) async fn api_date_range_handler(State(state): State<AppState>) -> Response {
    match state.repo.snapshot_time_range().await {
        Ok(range) => {
            let fmt = |ms: i64| {
                DateTime::from_timestamp_millis(ms).map(|dt| dt.format("%Y-%m-%d").to_string())
            };
            let (min_date, max_date) = match range {
                Some((lo, hi)) => (fmt(lo), fmt(hi)),
                None => (None, None),
            };
            axum::Json(serde_json::json!({
                "min_date": min_date,
                "max_date": max_date,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "date range query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
