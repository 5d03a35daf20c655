//! Lenient query-string parsing. The individual helpers report what they
//! rejected; `parse_chart_request` is the caller that decides a rejected
//! or missing parameter means "use the default", so a hand-edited URL
//! still produces a chart instead of an error page.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::models::{ChartRequest, ServerAddr, ServerFilter};

const MAX_FILTER_TOKEN_LEN: usize = 50;

/// A query parameter value that could not be understood.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("not a number: {0:?}")]
    NotANumber(String),
    #[error("not a finite number: {0:?}")]
    NotFinite(String),
    #[error("not a date (expected YYYY-MM-DD): {0:?}")]
    NotADate(String),
    #[error("not a server address (expected host:port): {0:?}")]
    NotAnAddress(String),
}

/// Parses a chart request from raw query parameters. Never fails: each
/// rejected parameter is logged and replaced with its default.
pub fn parse_chart_request(params: &HashMap<String, String>, default_bias: f64) -> ChartRequest {
    let defaults = ChartRequest {
        bias_exponent: default_bias,
        ..ChartRequest::default()
    };
    let get = |name: &str| params.get(name).map(String::as_str);

    ChartRequest {
        start_date: lenient(
            "start_date",
            get("start_date").map(|s| parse_date(s).map(Some)),
            None,
        ),
        days_to_show: lenient(
            "days",
            get("days").map(|s| parse_clamped(s, 1, 365)),
            defaults.days_to_show,
        ),
        only_maps_containing: parse_filter_tokens(get("only_maps_containing")),
        append_maps_containing: parse_filter_tokens(get("append_maps_containing")),
        maps_to_show: lenient(
            "maps",
            get("maps").map(|s| parse_clamped(s, 1, 50)),
            defaults.maps_to_show,
        ),
        precision: lenient(
            "precision",
            get("precision").map(|s| parse_clamped(s, 0, 6)),
            defaults.precision,
        ),
        bias_exponent: lenient(
            "bias",
            get("bias").map(|s| parse_clamped_f64(s, 0.1, 8.0)),
            defaults.bias_exponent,
        ),
        top_servers: lenient(
            "top_servers",
            get("top_servers").map(|s| parse_clamped(s, 1, 50)),
            defaults.top_servers,
        ),
        server_filter: lenient(
            "server",
            get("server").map(parse_server_filter),
            ServerFilter::All,
        ),
    }
}

/// The leniency policy: absent means default, rejected means log + default.
fn lenient<T>(name: &str, parsed: Option<Result<T, ParseError>>, default: T) -> T {
    match parsed {
        Some(Ok(v)) => v,
        Some(Err(err)) => {
            debug!(param = name, %err, "query parameter rejected, using default");
            default
        }
        None => default,
    }
}

/// Parses an integer-like value and clamps it into [lo, hi].
pub fn parse_clamped<T>(raw: &str, lo: T, hi: T) -> Result<T, ParseError>
where
    T: std::str::FromStr + Ord + Copy,
{
    raw.trim()
        .parse::<T>()
        .map(|v| v.clamp(lo, hi))
        .map_err(|_| ParseError::NotANumber(raw.to_string()))
}

/// Parses a float and clamps it into [lo, hi]. NaN and infinities are
/// rejected, not clamped.
pub fn parse_clamped_f64(raw: &str, lo: f64, hi: f64) -> Result<f64, ParseError> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ParseError::NotANumber(raw.to_string()))?;
    if v.is_finite() {
        Ok(v.clamp(lo, hi))
    } else {
        Err(ParseError::NotFinite(raw.to_string()))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ParseError::NotADate(raw.to_string()))
}

/// "ALL" (any case) or an empty value means no filter; anything else must
/// be a host:port pair.
pub fn parse_server_filter(raw: &str) -> Result<ServerFilter, ParseError> {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("all") {
        return Ok(ServerFilter::All);
    }
    ServerAddr::parse(t)
        .map(ServerFilter::Single)
        .ok_or_else(|| ParseError::NotAnAddress(raw.to_string()))
}

/// Splits a comma-separated filter into lowercased tokens. Empty tokens
/// are dropped and each token is truncated to a sane length. Total: any
/// string is a valid (possibly empty) token list.
fn parse_filter_tokens(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .map(|mut t| {
            if t.len() > MAX_FILTER_TOKEN_LEN {
                let mut cut = MAX_FILTER_TOKEN_LEN;
                while !t.is_char_boundary(cut) {
                    cut -= 1;
                }
                t.truncate(cut);
            }
            t
        })
        .collect()
}
