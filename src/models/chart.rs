// Chart request descriptor and result shape (serialized as-is to the API).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ServerAddr;

/// Restrict a chart query to one server, or aggregate across all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerFilter {
    All,
    Single(ServerAddr),
}

impl ServerFilter {
    /// The single server to filter by, if any.
    pub fn single(&self) -> Option<&ServerAddr> {
        match self {
            ServerFilter::All => None,
            ServerFilter::Single(addr) => Some(addr),
        }
    }
}

/// Normalized chart query parameters. Produced by the query layer
/// (parsed, clamped, defaulted); consumed by the aggregation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    /// Window start (UTC midnight). None: `days_to_show` days ending now.
    pub start_date: Option<NaiveDate>,
    pub days_to_show: u32,
    /// Lowercased substrings, OR-combined. Empty: keep all maps.
    pub only_maps_containing: Vec<String>,
    /// Extra maps charted even outside the top-N, matched by substring.
    pub append_maps_containing: Vec<String>,
    pub maps_to_show: usize,
    pub precision: u32,
    /// Exponent on per-bucket snapshot counts when weighting summary KPIs.
    pub bias_exponent: f64,
    pub top_servers: usize,
    pub server_filter: ServerFilter,
}

impl Default for ChartRequest {
    fn default() -> Self {
        Self {
            start_date: None,
            days_to_show: 7,
            only_maps_containing: Vec::new(),
            append_maps_containing: Vec::new(),
            maps_to_show: 15,
            precision: 2,
            bias_exponent: 1.0,
            top_servers: 10,
            server_filter: ServerFilter::All,
        }
    }
}

impl ChartRequest {
    /// Cache key covering every parameter. Two requests differing in any
    /// field are distinct entries; the float is keyed by bit pattern.
    pub fn cache_key(&self) -> ChartKey {
        ChartKey {
            start_date: self.start_date,
            days_to_show: self.days_to_show,
            only_maps_containing: self.only_maps_containing.clone(),
            append_maps_containing: self.append_maps_containing.clone(),
            maps_to_show: self.maps_to_show,
            precision: self.precision,
            bias_exponent_bits: self.bias_exponent.to_bits(),
            top_servers: self.top_servers,
            server_filter: self.server_filter.clone(),
        }
    }
}

/// Hashable form of a [`ChartRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    start_date: Option<NaiveDate>,
    days_to_show: u32,
    only_maps_containing: Vec<String>,
    append_maps_containing: Vec<String>,
    maps_to_show: usize,
    precision: u32,
    bias_exponent_bits: u64,
    top_servers: usize,
    server_filter: ServerFilter,
}

/// One data series: a label plus one value per bucket label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    pub data: Vec<f64>,
}

/// One ranking row: label plus popularity (percentage share for maps,
/// average contribution for servers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub label: String,
    pub pop: f64,
}

/// Full chart result. Always structurally complete: an empty window yields
/// empty vectors and zero counts, never missing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    /// Bucket start times, ISO-8601, one per bucket in the window.
    pub labels: Vec<String>,
    /// Percentage share per bucket for each shown map, plus "Other".
    pub datasets: Vec<Series>,
    /// Average total players per bucket (sum of players / snapshot count).
    pub daily_totals: Vec<f64>,
    /// Recorded snapshots per bucket (zero for gaps).
    pub snapshot_counts: Vec<u64>,
    /// Shown maps ranked by share of the grand total contribution.
    pub ranking: Vec<RankEntry>,
    pub shown_maps_count: usize,
    pub appended_maps_count: usize,
    /// Per-bucket average contribution for each top server, plus "Other".
    pub server_datasets: Vec<Series>,
    /// Servers ranked by mean contribution over gap-free buckets.
    pub server_ranking: Vec<RankEntry>,
    /// Snapshot-count-weighted average of per-bucket player totals.
    pub average_player_count: f64,
}

impl ChartData {
    pub fn empty() -> Self {
        Self {
            labels: Vec::new(),
            datasets: Vec::new(),
            daily_totals: Vec::new(),
            snapshot_counts: Vec::new(),
            ranking: Vec::new(),
            shown_maps_count: 0,
            appended_maps_count: 0,
            server_datasets: Vec::new(),
            server_ranking: Vec::new(),
            average_player_count: 0.0,
        }
    }
}
