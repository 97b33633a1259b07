use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::Duration;

use royale_tracker::aggregate::reduce_deck_stats;
use royale_tracker::model::Battle;
use royale_tracker::normalize::normalize_battle;
use royale_tracker::payload::BattlePayload;
use royale_tracker::tag::Tag;

fn owner() -> Tag {
    Tag::parse("#2PP").expect("valid tag")
}

fn sample_battles(copies: usize) -> Vec<Battle> {
    let raw: Vec<BattlePayload> = serde_json::from_str(BATTLELOG_JSON).expect("valid fixture json");
    let base = raw
        .iter()
        .filter_map(|b| normalize_battle(b, &owner()))
        .collect::<Vec<_>>();
    (0..copies)
        .flat_map(|i| {
            base.iter().map(move |b| {
                let mut b = b.clone();
                b.battle_id = format!("{}#{i}", b.battle_id);
                b.timestamp += Duration::minutes(i as i64);
                b
            })
        })
        .collect()
}

fn bench_battlelog_parse(c: &mut Criterion) {
    c.bench_function("battlelog_parse", |b| {
        b.iter(|| {
            let rows: Vec<BattlePayload> = serde_json::from_str(black_box(BATTLELOG_JSON)).unwrap();
            black_box(rows.len());
        })
    });
}

fn bench_battle_normalize(c: &mut Criterion) {
    let raw: Vec<BattlePayload> = serde_json::from_str(BATTLELOG_JSON).unwrap();
    let owner = owner();
    c.bench_function("battle_normalize", |b| {
        b.iter(|| {
            let kept = raw
                .iter()
                .filter_map(|p| normalize_battle(black_box(p), &owner))
                .count();
            black_box(kept);
        })
    });
}

fn bench_deck_stats_reduce(c: &mut Criterion) {
    let battles = sample_battles(2_000);
    c.bench_function("deck_stats_reduce", |b| {
        b.iter(|| {
            let stats = reduce_deck_stats(black_box(&battles));
            black_box(stats.len());
        })
    });
}

criterion_group!(
    perf,
    bench_battlelog_parse,
    bench_battle_normalize,
    bench_deck_stats_reduce
);
criterion_main!(perf);

static BATTLELOG_JSON: &str = include_str!("../tests/fixtures/battlelog.json");
