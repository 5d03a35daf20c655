// Aggregation engine tests: registry-count averaging, percentage
// normalization, ranking, gap handling, filters

mod common;

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use common::{BUCKET_MS, sample, seed_cycle, test_repo};
use mapstats::chart::{self, ChartConfig, engine};
use mapstats::models::{ChartRequest, SampleFact, ServerAddr};

fn cfg() -> ChartConfig {
    ChartConfig {
        bucket_width_ms: BUCKET_MS,
        default_bias: 1.0,
    }
}

fn fact(host: &str, port: u16, map: &str, players: i64, ts_ms: i64) -> SampleFact {
    SampleFact {
        server: ServerAddr::new(host, port),
        map: map.into(),
        players,
        timestamp_ms: ts_ms,
    }
}

fn build(
    req: &ChartRequest,
    window: (i64, i64),
    facts: &[SampleFact],
    counts: &[(i64, u64)],
) -> mapstats::models::ChartData {
    let counts: BTreeMap<i64, u64> = counts.iter().copied().collect();
    engine::build_chart(req, &cfg(), window, facts, &counts, &HashMap::new())
}

fn series<'a>(data: &'a mapstats::models::ChartData, label: &str) -> &'a [f64] {
    &data
        .datasets
        .iter()
        .find(|s| s.label == label)
        .unwrap_or_else(|| panic!("no dataset {label}"))
        .data
}

#[test]
fn test_shares_in_populated_bucket_sum_to_100() {
    let req = ChartRequest::default();
    let data = build(
        &req,
        (0, 2 * BUCKET_MS),
        &[
            fact("a", 1, "de_dust2", 30, 100),
            fact("b", 2, "cp_well", 10, 200),
        ],
        &[(0, 1)],
    );

    assert_eq!(series(&data, "de_dust2"), &[75.0, 0.0]);
    assert_eq!(series(&data, "cp_well"), &[25.0, 0.0]);
    // both maps shown, no Other series
    assert_eq!(data.datasets.len(), 2);
    assert_eq!(data.shown_maps_count, 2);
    assert_eq!(data.daily_totals, vec![40.0, 0.0]);
    assert_eq!(data.snapshot_counts, vec![1, 0]);
    assert_eq!(data.labels.len(), 2);
    assert_eq!(data.labels[0], "1970-01-01T00:00:00");
}

#[test]
fn test_averages_divide_by_registry_count_not_sample_count() {
    // two snapshots in the bucket, the map reported in only one of them
    let req = ChartRequest::default();
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[fact("a", 1, "de_dust2", 30, 100)],
        &[(0, 2)],
    );

    assert_eq!(data.daily_totals, vec![15.0]);
    // share is still 100: the map is all of what was seen
    assert_eq!(series(&data, "de_dust2"), &[100.0]);
    assert_eq!(data.average_player_count, 15.0);
}

#[test]
fn test_samples_without_registry_row_divide_by_one() {
    let req = ChartRequest::default();
    let data = build(&req, (0, BUCKET_MS), &[fact("a", 1, "de_dust2", 30, 100)], &[]);

    assert_eq!(data.daily_totals, vec![30.0]);
    // no registered snapshot anywhere, so the weighted KPI has no input
    assert_eq!(data.average_player_count, 0.0);
}

#[test]
fn test_ranking_is_by_total_contribution_not_peak() {
    // steady: 10 in each of 3 buckets (total 30); spike: 25 once (total 25)
    let req = ChartRequest {
        maps_to_show: 1,
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, 3 * BUCKET_MS),
        &[
            fact("a", 1, "steady", 10, 100),
            fact("a", 1, "steady", 10, BUCKET_MS + 100),
            fact("a", 1, "steady", 10, 2 * BUCKET_MS + 100),
            fact("b", 2, "spike", 25, BUCKET_MS + 200),
        ],
        &[(0, 1), (BUCKET_MS, 1), (2 * BUCKET_MS, 1)],
    );

    assert_eq!(data.shown_maps_count, 1);
    assert_eq!(data.ranking[0].label, "steady");
    assert_eq!(data.ranking[0].pop, 54.55);
    assert_eq!(data.ranking[1].label, "Other");
    assert_eq!(data.ranking[1].pop, 45.45);

    // in the spike bucket: steady 10/35, spike folded into Other
    let steady = series(&data, "steady");
    let other = series(&data, "Other");
    assert_eq!(steady[1], 28.57);
    assert_eq!(other[1], 71.43);
    // every populated bucket's shares sum to ~100 after rounding
    for i in 0..3 {
        let total = steady[i] + other[i];
        assert!((total - 100.0).abs() < 0.5, "bucket {i} sums to {total}");
    }
}

#[test]
fn test_only_maps_filter_renormalizes_shares() {
    let req = ChartRequest {
        only_maps_containing: vec!["dust".into()],
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[
            fact("a", 1, "de_dust2", 30, 100),
            fact("b", 2, "cp_well", 90, 200),
        ],
        &[(0, 1)],
    );

    // cp_well is filtered out entirely, shares are relative to dust alone
    assert_eq!(data.datasets.len(), 1);
    assert_eq!(series(&data, "de_dust2"), &[100.0]);
    assert_eq!(data.daily_totals, vec![30.0]);
}

#[test]
fn test_only_maps_filter_matching_nothing_yields_empty() {
    let req = ChartRequest {
        only_maps_containing: vec!["zzz".into()],
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[fact("a", 1, "de_dust2", 30, 100)],
        &[(0, 1)],
    );
    assert!(data.labels.is_empty());
    assert!(data.datasets.is_empty());
}

#[test]
fn test_appended_maps_are_charted_but_not_in_other() {
    let req = ChartRequest {
        maps_to_show: 1,
        append_maps_containing: vec!["well".into()],
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[
            fact("a", 1, "de_dust2", 50, 100),
            fact("a", 1, "cp_well", 30, 100),
            fact("a", 1, "koth_viaduct", 20, 100),
        ],
        &[(0, 1)],
    );

    assert_eq!(data.shown_maps_count, 1);
    assert_eq!(data.appended_maps_count, 1);
    assert_eq!(series(&data, "de_dust2"), &[50.0]);
    assert_eq!(series(&data, "cp_well"), &[30.0]);
    // Other holds only the map that is neither top nor appended
    assert_eq!(series(&data, "Other"), &[20.0]);
}

#[test]
fn test_server_ranking_excludes_gap_buckets() {
    // two buckets in the window, only the first has a recorded snapshot
    let req = ChartRequest::default();
    let data = build(
        &req,
        (0, 2 * BUCKET_MS),
        &[fact("a", 1, "de_dust2", 10, 100)],
        &[(0, 1)],
    );

    // mean over populated buckets only: 10, not 10/2
    assert_eq!(data.server_ranking.len(), 1);
    assert_eq!(data.server_ranking[0].label, "a:1");
    assert_eq!(data.server_ranking[0].pop, 10.0);
    assert_eq!(data.server_datasets[0].data, vec![10.0, 0.0]);
}

#[test]
fn test_top_servers_folds_rest_into_other() {
    let req = ChartRequest {
        top_servers: 1,
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[
            fact("big", 1, "de_dust2", 20, 100),
            fact("small", 2, "de_dust2", 5, 100),
            fact("tiny", 3, "de_dust2", 1, 100),
        ],
        &[(0, 1)],
    );

    assert_eq!(data.server_ranking.len(), 2);
    assert_eq!(data.server_ranking[0].label, "big:1");
    assert_eq!(data.server_ranking[0].pop, 20.0);
    assert_eq!(data.server_ranking[1].label, "Other");
    assert_eq!(data.server_ranking[1].pop, 6.0);
    assert_eq!(data.server_datasets.len(), 2);
    assert_eq!(data.server_datasets[1].data, vec![6.0]);
}

#[test]
fn test_server_display_names_label_datasets() {
    let req = ChartRequest::default();
    let counts: BTreeMap<i64, u64> = [(0, 1)].into_iter().collect();
    let mut names = HashMap::new();
    names.insert(ServerAddr::new("a", 1), "My Fancy Server".to_string());
    let data = engine::build_chart(
        &req,
        &cfg(),
        (0, BUCKET_MS),
        &[fact("a", 1, "de_dust2", 10, 100)],
        &counts,
        &names,
    );
    assert_eq!(data.server_ranking[0].label, "My Fancy Server");
    assert_eq!(data.server_datasets[0].label, "My Fancy Server");
}

#[test]
fn test_equal_averages_survive_unequal_snapshot_density() {
    // 1000 players over 100 snapshots and 100 players over 10 snapshots
    // both average 10; neither bucket's density may tilt the summary
    let facts = [
        fact("a", 1, "de_dust2", 1000, 100),
        fact("a", 1, "de_dust2", 100, BUCKET_MS + 100),
    ];
    let counts = [(0, 100), (BUCKET_MS, 10)];

    let data = build(&ChartRequest::default(), (0, 2 * BUCKET_MS), &facts, &counts);
    assert_eq!(data.daily_totals, vec![10.0, 10.0]);
    assert_eq!(data.average_player_count, 10.0);

    // equal bucket averages stay put under any bias exponent
    let biased = build(
        &ChartRequest {
            bias_exponent: 3.0,
            ..ChartRequest::default()
        },
        (0, 2 * BUCKET_MS),
        &facts,
        &counts,
    );
    assert_eq!(biased.average_player_count, 10.0);
}

#[test]
fn test_kpi_weights_buckets_by_snapshot_count() {
    let req = ChartRequest::default();
    // bucket 0: 4 snapshots, total avg 30; bucket 1: 1 snapshot, total avg 10
    let data = build(
        &req,
        (0, 2 * BUCKET_MS),
        &[
            fact("a", 1, "de_dust2", 120, 100),
            fact("a", 1, "de_dust2", 10, BUCKET_MS + 100),
        ],
        &[(0, 4), (BUCKET_MS, 1)],
    );

    // linear weighting: (30*4 + 10*1) / 5
    assert_eq!(data.average_player_count, 26.0);

    let biased = build(
        &ChartRequest {
            bias_exponent: 2.0,
            ..ChartRequest::default()
        },
        (0, 2 * BUCKET_MS),
        &[
            fact("a", 1, "de_dust2", 120, 100),
            fact("a", 1, "de_dust2", 10, BUCKET_MS + 100),
        ],
        &[(0, 4), (BUCKET_MS, 1)],
    );
    // quadratic weighting: (30*16 + 10*1) / 17
    assert_eq!(biased.average_player_count, 28.82);
}

#[test]
fn test_precision_zero_rounds_to_integers() {
    let req = ChartRequest {
        precision: 0,
        ..ChartRequest::default()
    };
    let data = build(
        &req,
        (0, BUCKET_MS),
        &[
            fact("a", 1, "one", 1, 100),
            fact("a", 1, "two", 2, 100),
        ],
        &[(0, 1)],
    );
    assert_eq!(series(&data, "two"), &[67.0]);
    assert_eq!(series(&data, "one"), &[33.0]);
}

#[test]
fn test_resolve_window_clamps_future_start_to_latest() {
    let req = ChartRequest {
        start_date: NaiveDate::from_ymd_opt(2099, 1, 1),
        days_to_show: 7,
        ..ChartRequest::default()
    };
    let latest_ms = 1_700_000_000_000;
    let now_ms = 1_700_000_100_000;
    let (start, end) = engine::resolve_window(&req, latest_ms, now_ms);
    assert_eq!(start, latest_ms - 7 * 86_400_000);
    assert_eq!(end, latest_ms);
}

#[test]
fn test_resolve_window_defaults_to_trailing_days() {
    let req = ChartRequest {
        days_to_show: 3,
        ..ChartRequest::default()
    };
    let now_ms = 1_700_000_000_000;
    let (start, end) = engine::resolve_window(&req, now_ms, now_ms);
    assert_eq!(end - start, 3 * 86_400_000);
    assert_eq!(end, now_ms);
}

#[test]
fn test_synthetic_load_recovers_ground_truth_ranking() {
    // six maps with fixed per-snapshot populations, two snapshots per
    // bucket over two days; the engine must recover the exact ordering
    let populations: [(&str, i64); 6] = [
        ("alpha", 60),
        ("bravo", 50),
        ("charlie", 40),
        ("delta", 30),
        ("echo", 20),
        ("foxtrot", 10),
    ];
    let buckets_n = 24; // 2 days of 2h buckets
    let mut facts = Vec::new();
    let mut counts = Vec::new();
    for i in 0..buckets_n {
        let b = i as i64 * BUCKET_MS;
        counts.push((b, 2u64));
        for snap in 0..2 {
            let ts = b + snap * 600_000 + 100;
            for (map, players) in populations {
                facts.push(fact("a", 1, map, players, ts));
            }
        }
    }

    let req = ChartRequest {
        maps_to_show: 5,
        ..ChartRequest::default()
    };
    let data = build(&req, (0, buckets_n as i64 * BUCKET_MS), &facts, &counts);

    let expected: Vec<&str> = populations[..5].iter().map(|(m, _)| *m).collect();
    let ranked: Vec<&str> = data
        .ranking
        .iter()
        .take(5)
        .map(|r| r.label.as_str())
        .collect();
    assert_eq!(ranked, expected);
    assert_eq!(data.ranking.last().unwrap().label, "Other");

    // constant load: every bucket's average total is the sum of populations
    let ground_truth: i64 = populations.iter().map(|(_, p)| p).sum();
    for (i, &total) in data.daily_totals.iter().enumerate() {
        assert_eq!(total, ground_truth as f64, "bucket {i}");
    }
    assert_eq!(data.average_player_count, ground_truth as f64);

    // shares reflect the population split exactly (alpha: 60/210)
    let alpha = series(&data, "alpha");
    assert!(alpha.iter().all(|&v| (v - 28.57).abs() < 1e-9));
}

#[tokio::test]
async fn test_compute_end_to_end() {
    let (repo, _dir) = test_repo().await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    seed_cycle(
        &repo,
        "g1",
        now_ms - 3 * BUCKET_MS,
        &[sample("a", 1, "de_dust2", 30), sample("b", 2, "cp_well", 10)],
    )
    .await;
    seed_cycle(&repo, "g2", now_ms - BUCKET_MS, &[sample("a", 1, "de_dust2", 20)]).await;

    let req = ChartRequest::default();
    let data = chart::compute(&repo, &req, &cfg()).await.unwrap();

    assert!(!data.labels.is_empty());
    assert_eq!(data.labels.len(), data.daily_totals.len());
    assert_eq!(data.labels.len(), data.snapshot_counts.len());
    for s in &data.datasets {
        assert_eq!(s.data.len(), data.labels.len());
    }
    // every populated bucket's shares sum to ~100
    for (i, &n) in data.snapshot_counts.iter().enumerate() {
        let total: f64 = data.datasets.iter().map(|s| s.data[i]).sum();
        if n > 0 && data.daily_totals[i] > 0.0 {
            assert!((total - 100.0).abs() < 0.5, "bucket {i} sums to {total}");
        } else {
            assert_eq!(total, 0.0, "gap bucket {i} must be all zero");
        }
    }
    assert_eq!(data.snapshot_counts.iter().sum::<u64>(), 2);
}

#[tokio::test]
async fn test_compute_on_empty_store_is_empty() {
    let (repo, _dir) = test_repo().await;
    let data = chart::compute(&repo, &ChartRequest::default(), &cfg())
        .await
        .unwrap();
    assert!(data.labels.is_empty());
    assert_eq!(data.average_player_count, 0.0);
}
