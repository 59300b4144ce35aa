use chrono::{Duration, TimeZone, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use scoreboard_ledger::canonical::{canonicalize, similarity_canonical};
use scoreboard_ledger::extract::parse_extraction_json;
use scoreboard_ledger::model::{Outcome, ResultRow, StoredMatch};
use scoreboard_ledger::stats::{SeasonSettings, aggregate, rank};
use scoreboard_ledger::SortKey;

fn sample_matches(count: usize, players: usize) -> Vec<StoredMatch> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|m| {
            let created_at = start + Duration::minutes(m as i64 * 7);
            let results = (0..10)
                .map(|slot| {
                    let pid = ((m * 3 + slot) % players) as i64 + 1;
                    ResultRow {
                        match_id: m as i64 + 1,
                        match_created_at: created_at,
                        player_id: pid,
                        player_name: format!("Player {pid}"),
                        player_canonical: format!("player {pid}"),
                        raw_name: format!("Player {pid}"),
                        result: if slot < 5 { Outcome::Win } else { Outcome::Lose },
                        kills: (m + slot) as u32 % 17,
                        deaths: (m * slot) as u32 % 9,
                        assists: slot as u32 * 2,
                    }
                })
                .collect();
            StoredMatch {
                id: m as i64 + 1,
                created_at,
                results,
            }
        })
        .collect()
}

fn bench_canonicalize(c: &mut Criterion) {
    c.bench_function("canonicalize", |b| {
        b.iter(|| black_box(canonicalize(black_box("  xX_Dark  Lord_Xx [CLAN] "))))
    });
}

fn bench_similarity_scan(c: &mut Criterion) {
    let names = (0..500)
        .map(|i| format!("player name {i}"))
        .collect::<Vec<_>>();
    c.bench_function("similarity_scan_500", |b| {
        b.iter(|| {
            let best = names
                .iter()
                .map(|n| similarity_canonical(black_box("player nane 250"), n))
                .fold(0.0_f64, f64::max);
            black_box(best)
        })
    });
}

fn bench_leaderboard(c: &mut Criterion) {
    let matches = sample_matches(2_000, 120);
    let settings = SeasonSettings::default()
        .with_reset("player 7", Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap());
    c.bench_function("leaderboard_2000_matches", |b| {
        b.iter(|| {
            let rows = rank(aggregate(&settings, black_box(&matches)).into_values(), SortKey::Kda);
            black_box(rows.len())
        })
    });
}

fn bench_extraction_parse(c: &mut Criterion) {
    c.bench_function("extraction_parse", |b| {
        b.iter(|| {
            let rows = parse_extraction_json(black_box(EXTRACTION_JSON)).unwrap();
            black_box(rows.len())
        })
    });
}

criterion_group!(
    perf,
    bench_canonicalize,
    bench_similarity_scan,
    bench_leaderboard,
    bench_extraction_parse
);
criterion_main!(perf);

const EXTRACTION_JSON: &str = r#"```json
{"players": [
  {"player_name": "Ace", "result": "WIN", "kills": 12, "deaths": 3, "assists": 7},
  {"player_name": "Bolt", "result": "WIN", "kills": 9, "deaths": 4, "assists": 2},
  {"player_name": "Cinder", "result": "WIN", "kills": 6, "deaths": 5, "assists": 10},
  {"player_name": "Dusk", "result": "WIN", "kills": 3, "deaths": 6, "assists": 12},
  {"player_name": "Echo", "result": "WIN", "kills": 8, "deaths": 2, "assists": 4},
  {"player_name": "Flint", "result": "LOSE", "kills": 5, "deaths": 9, "assists": 1},
  {"player_name": "Gale", "result": "LOSE", "kills": 4, "deaths": 8, "assists": 6},
  {"player_name": "Haze", "result": "LOSE", "kills": 7, "deaths": 7, "assists": 3},
  {"player_name": "Ion", "result": "LOSE", "kills": 2, "deaths": 10, "assists": 5},
  {"player_name": "Jinx", "result": "LOSE", "kills": 1, "deaths": 6, "assists": 9}
]}
```"#;
