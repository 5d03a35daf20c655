// Pure aggregation over (bucket, key, value) groupings.
//
// The central rule: per-bucket averages divide by the registry's snapshot
// count for that bucket, never by the number of samples that happened to
// report. A map online for only some of a bucket's poll cycles gets a
// correspondingly lower average. Rankings use total contribution (sum of
// per-bucket averages over the window), and server ranking averages divide
// only by buckets that actually have snapshots, so collection gaps do not
// deflate them.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{ChartData, ChartRequest, RankEntry, SampleFact, Series, ServerAddr};

use super::ChartConfig;

const MS_PER_DAY: i64 = 86_400_000;

/// Resolves the query window [start, start + days). A missing start date
/// means "the last `days_to_show` days ending now"; a start past the latest
/// recorded snapshot is clamped to `latest - days` so a window with real
/// data is queried whenever data exists.
pub fn resolve_window(req: &ChartRequest, latest_ms: i64, now_ms: i64) -> (i64, i64) {
    let days_ms = req.days_to_show as i64 * MS_PER_DAY;
    let mut start = match req.start_date {
        Some(d) => d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis(),
        None => now_ms - days_ms,
    };
    if start > latest_ms {
        start = latest_ms - days_ms;
    }
    (start, start + days_ms)
}

/// Rounds to `precision` decimal places. Applied at emission only;
/// intermediate accumulation stays unrounded.
pub fn round_to(v: f64, precision: u32) -> f64 {
    let m = 10f64.powi(precision as i32);
    (v * m).round() / m
}

/// True when `map_lower` contains any of the (lowercased) filter tokens.
pub fn matches_any(map_lower: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|t| map_lower.contains(t.as_str()))
}

fn bucket_label(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// All bucket starts inside [start, end), floor-aligned to the bucket width.
fn bucket_range(start: i64, end: i64, width: i64) -> Vec<i64> {
    if width <= 0 || end <= start {
        return Vec::new();
    }
    let mut b = start.div_euclid(width) * width;
    if b < start {
        b += width;
    }
    let mut out = Vec::new();
    while b < end {
        out.push(b);
        b += width;
    }
    out
}

/// Builds the full chart result from loaded facts and the registry's
/// per-bucket snapshot counts. Pure: no I/O, no hidden state.
pub fn build_chart(
    req: &ChartRequest,
    cfg: &ChartConfig,
    window: (i64, i64),
    facts: &[SampleFact],
    snapshot_counts: &BTreeMap<i64, u64>,
    server_names: &HashMap<ServerAddr, String>,
) -> ChartData {
    let (start_ms, end_ms) = window;
    let width = cfg.bucket_width_ms;
    let buckets = bucket_range(start_ms, end_ms, width);
    if buckets.is_empty() {
        return ChartData::empty();
    }
    let first_bucket = buckets[0];

    let kept: Vec<&SampleFact> = facts
        .iter()
        .filter(|f| {
            f.timestamp_ms >= start_ms
                && f.timestamp_ms < end_ms
                && (req.only_maps_containing.is_empty()
                    || matches_any(&f.map.to_lowercase(), &req.only_maps_containing))
        })
        .collect();
    if kept.is_empty() {
        return ChartData::empty();
    }

    // Grouped sums: (bucket, map) and (bucket, server) player totals.
    let mut map_sum: HashMap<&str, BTreeMap<i64, i64>> = HashMap::new();
    let mut server_sum: HashMap<&ServerAddr, BTreeMap<i64, i64>> = HashMap::new();
    let mut bucket_sum: BTreeMap<i64, i64> = BTreeMap::new();
    for f in &kept {
        let b = f.timestamp_ms.div_euclid(width) * width;
        if b < first_bucket {
            continue;
        }
        *map_sum.entry(f.map.as_str()).or_default().entry(b).or_insert(0) += f.players;
        *server_sum.entry(&f.server).or_default().entry(b).or_insert(0) += f.players;
        *bucket_sum.entry(b).or_insert(0) += f.players;
    }

    // Divisor for a populated bucket: total snapshots recorded in it. A
    // bucket holding samples but no registry row falls back to 1 rather
    // than dividing by zero.
    let divisor = |b: i64| -> f64 { snapshot_counts.get(&b).copied().unwrap_or(0).max(1) as f64 };

    let mut map_avg: HashMap<&str, BTreeMap<i64, f64>> = HashMap::new();
    let mut map_total: HashMap<&str, f64> = HashMap::new();
    let mut bucket_total_avg: BTreeMap<i64, f64> = BTreeMap::new();
    for (map, sums) in &map_sum {
        for (b, sum) in sums {
            let avg = *sum as f64 / divisor(*b);
            map_avg.entry(map).or_default().insert(*b, avg);
            *map_total.entry(map).or_insert(0.0) += avg;
            *bucket_total_avg.entry(*b).or_insert(0.0) += avg;
        }
    }

    // Top-N by total contribution across the window. A one-bucket spike
    // does not outrank a steadily popular map with a larger total.
    let mut by_total: Vec<(&str, f64)> = map_total.iter().map(|(m, t)| (*m, *t)).collect();
    by_total.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top: Vec<&str> = by_total
        .iter()
        .take(req.maps_to_show)
        .map(|(m, _)| *m)
        .collect();
    let top_set: HashSet<&str> = top.iter().copied().collect();

    // Secondary filter: chart extra maps outside the top-N, ordered by
    // total contribution. They are excluded from "Other".
    let mut appended: Vec<&str> = if req.append_maps_containing.is_empty() {
        Vec::new()
    } else {
        by_total
            .iter()
            .filter(|(m, _)| {
                !top_set.contains(m) && matches_any(&m.to_lowercase(), &req.append_maps_containing)
            })
            .map(|(m, _)| *m)
            .collect()
    };
    appended.dedup();

    let shown: Vec<&str> = top.iter().chain(appended.iter()).copied().collect();
    let shown_set: HashSet<&str> = shown.iter().copied().collect();

    // Percentage-share series. Shares within a populated bucket sum to 100
    // across all maps; empty buckets are all-zero.
    let share = |map: &str, b: i64| -> f64 {
        let total = bucket_total_avg.get(&b).copied().unwrap_or(0.0);
        if total <= 0.0 {
            return 0.0;
        }
        let avg = map_avg.get(map).and_then(|m| m.get(&b)).copied().unwrap_or(0.0);
        avg / total * 100.0
    };

    let mut datasets: Vec<Series> = Vec::with_capacity(shown.len() + 1);
    for m in &shown {
        datasets.push(Series {
            label: (*m).to_string(),
            data: buckets
                .iter()
                .map(|b| round_to(share(m, *b), req.precision))
                .collect(),
        });
    }
    if map_total.len() > shown_set.len() {
        let other: Vec<f64> = buckets
            .iter()
            .map(|b| {
                let total = bucket_total_avg.get(b).copied().unwrap_or(0.0);
                if total <= 0.0 {
                    return 0.0;
                }
                let shown_share: f64 = shown.iter().map(|m| share(m, *b)).sum();
                round_to((100.0 - shown_share).max(0.0), req.precision)
            })
            .collect();
        datasets.push(Series {
            label: "Other".into(),
            data: other,
        });
    }

    // Legend ranking: share of the grand total contribution.
    let grand_total: f64 = map_total.values().sum();
    let mut ranking: Vec<RankEntry> = Vec::new();
    if grand_total > 0.0 {
        for (m, total) in by_total.iter().filter(|(m, _)| shown_set.contains(m)) {
            ranking.push(RankEntry {
                label: (*m).to_string(),
                pop: round_to(total / grand_total * 100.0, req.precision),
            });
        }
        let shown_total: f64 = by_total
            .iter()
            .filter(|(m, _)| shown_set.contains(m))
            .map(|(_, t)| *t)
            .sum();
        let other_total = grand_total - shown_total;
        if other_total > 0.0 {
            ranking.push(RankEntry {
                label: "Other".into(),
                pop: round_to(other_total / grand_total * 100.0, req.precision),
            });
        }
    }

    // Raw supporting series: average total players and snapshot counts.
    let daily_totals: Vec<f64> = buckets
        .iter()
        .map(|b| {
            let sum = bucket_sum.get(b).copied().unwrap_or(0);
            if sum > 0 {
                round_to(sum as f64 / divisor(*b), req.precision)
            } else {
                0.0
            }
        })
        .collect();
    let snapshot_counts_out: Vec<u64> = buckets
        .iter()
        .map(|b| snapshot_counts.get(b).copied().unwrap_or(0))
        .collect();

    // Server contribution: per-bucket average, then mean over only the
    // buckets with at least one recorded snapshot (a collection outage is
    // a gap, not a run of zeros).
    let mut server_avg: HashMap<&ServerAddr, BTreeMap<i64, f64>> = HashMap::new();
    let mut server_total: HashMap<&ServerAddr, f64> = HashMap::new();
    for (addr, sums) in &server_sum {
        for (b, sum) in sums {
            let avg = *sum as f64 / divisor(*b);
            server_avg.entry(addr).or_default().insert(*b, avg);
            *server_total.entry(addr).or_insert(0.0) += avg;
        }
    }
    let populated_buckets = buckets
        .iter()
        .filter(|b| snapshot_counts.get(b).copied().unwrap_or(0) > 0)
        .count()
        .max(1) as f64;

    let mut server_averages: Vec<(&ServerAddr, f64)> = server_total
        .iter()
        .map(|(addr, total)| (*addr, *total / populated_buckets))
        .collect();
    server_averages.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.to_string().cmp(&b.0.to_string()))
    });
    let top_n = req.top_servers.min(server_averages.len());

    let display = |addr: &ServerAddr| -> String {
        server_names.get(addr).cloned().unwrap_or_else(|| addr.to_string())
    };

    let mut server_ranking: Vec<RankEntry> = Vec::with_capacity(top_n + 1);
    for (addr, avg) in &server_averages[..top_n] {
        server_ranking.push(RankEntry {
            label: display(addr),
            pop: round_to(*avg, req.precision),
        });
    }
    if server_averages.len() > top_n {
        let other: f64 = server_averages[top_n..].iter().map(|(_, v)| *v).sum();
        if other > 0.0 {
            server_ranking.push(RankEntry {
                label: "Other".into(),
                pop: round_to(other, req.precision),
            });
        }
    }

    let mut server_datasets: Vec<Series> = Vec::with_capacity(top_n + 1);
    for (addr, _) in &server_averages[..top_n] {
        let series = server_avg.get(*addr);
        server_datasets.push(Series {
            label: display(addr),
            data: buckets
                .iter()
                .map(|b| {
                    let v = series.and_then(|s| s.get(b)).copied().unwrap_or(0.0);
                    round_to(v, req.precision)
                })
                .collect(),
        });
    }
    if server_averages.len() > top_n {
        let rest: Vec<&ServerAddr> = server_averages[top_n..].iter().map(|(a, _)| *a).collect();
        server_datasets.push(Series {
            label: "Other".into(),
            data: buckets
                .iter()
                .map(|b| {
                    let v: f64 = rest
                        .iter()
                        .filter_map(|a| server_avg.get(*a).and_then(|s| s.get(b)))
                        .sum();
                    round_to(v, req.precision)
                })
                .collect(),
        });
    }

    // Summary KPI: snapshot-count-weighted mean of bucket totals. The
    // exponent biases toward densely sampled buckets; gap buckets carry no
    // weight either way.
    let mut weight_sum = 0.0;
    let mut weighted_total = 0.0;
    for b in &buckets {
        let n = snapshot_counts.get(b).copied().unwrap_or(0);
        if n == 0 {
            continue;
        }
        let w = (n as f64).powf(req.bias_exponent);
        weight_sum += w;
        weighted_total += bucket_total_avg.get(b).copied().unwrap_or(0.0) * w;
    }
    let average_player_count = if weight_sum > 0.0 {
        round_to(weighted_total / weight_sum, req.precision)
    } else {
        0.0
    };

    ChartData {
        labels: buckets.iter().map(|b| bucket_label(*b)).collect(),
        datasets,
        daily_totals,
        snapshot_counts: snapshot_counts_out,
        ranking,
        shown_maps_count: top.len(),
        appended_maps_count: appended.len(),
        server_datasets,
        server_ranking,
        average_player_count,
    }
}
