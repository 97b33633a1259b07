use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::deck::{Card, DeckSignature};
use crate::model::{Battle, BattleResult, ClanMember, MemberDeckObservation, PlayerSnapshot};
use crate::store::Store;
use crate::tag::Tag;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckStat {
    pub deck_signature: DeckSignature,
    pub cards: Vec<Card>,
    pub games_played: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub win_rate: f64,
    pub total_trophy_change: i64,
    pub avg_trophy_change: f64,
    pub last_played: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    All,
    Last(usize),
    Since(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub trophies: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BattleSummary {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub win_rate: Option<f64>,
    pub total_trophy_change: i64,
    pub first_battle: Option<DateTime<Utc>>,
    pub last_battle: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckPeriod {
    pub deck_signature: DeckSignature,
    pub cards: Vec<Card>,
    pub favorite_card: Option<String>,
    pub arena: Option<String>,
    pub trophies: i64,
    pub best_trophies: i64,
    pub exp_level: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub duration_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckUsage {
    pub deck_signature: DeckSignature,
    pub cards: Vec<Card>,
    pub players: Vec<String>,
}

impl DeckUsage {
    pub fn count(&self) -> usize {
        self.players.len()
    }
}

#[derive(Default)]
struct DeckAcc<'a> {
    games: u64,
    wins: u64,
    losses: u64,
    draws: u64,
    trophy_sum: i64,
    latest: Option<&'a Battle>,
}

/// Groups battles by deck signature. Only signatures with at least one game
/// can appear, so `win_rate` never divides by zero.
pub fn reduce_deck_stats(battles: &[Battle]) -> Vec<DeckStat> {
    let mut groups: BTreeMap<&DeckSignature, DeckAcc<'_>> = BTreeMap::new();
    for b in battles {
        let acc = groups.entry(&b.deck_signature).or_default();
        acc.games += 1;
        match b.result {
            BattleResult::Win => acc.wins += 1,
            BattleResult::Loss => acc.losses += 1,
            BattleResult::Draw => acc.draws += 1,
        }
        acc.trophy_sum += b.trophy_change.unwrap_or(0);
        let newer = acc.latest.is_none_or(|cur| {
            (b.timestamp, &b.battle_id) >= (cur.timestamp, &cur.battle_id)
        });
        if newer {
            acc.latest = Some(b);
        }
    }

    let mut out = groups
        .into_iter()
        .filter_map(|(signature, acc)| {
            let latest = acc.latest?;
            if acc.games == 0 {
                return None;
            }
            Some(DeckStat {
                deck_signature: signature.clone(),
                cards: latest.own_deck.clone(),
                games_played: acc.games,
                wins: acc.wins,
                losses: acc.losses,
                draws: acc.draws,
                win_rate: acc.wins as f64 / acc.games as f64,
                total_trophy_change: acc.trophy_sum,
                avg_trophy_change: acc.trophy_sum as f64 / acc.games as f64,
                last_played: latest.timestamp,
            })
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| {
        b.games_played
            .cmp(&a.games_played)
            .then(b.wins.cmp(&a.wins))
            .then(a.deck_signature.cmp(&b.deck_signature))
    });
    out
}

pub fn trophy_trend(snapshots: &[PlayerSnapshot], window: TrendWindow) -> Vec<TrendPoint> {
    let mut points = snapshots
        .iter()
        .map(|s| TrendPoint {
            timestamp: s.captured_at,
            trophies: s.trophies,
        })
        .collect::<Vec<_>>();
    points.sort_by_key(|p| p.timestamp);
    match window {
        TrendWindow::All => points,
        TrendWindow::Last(n) => {
            let skip = points.len().saturating_sub(n);
            points.split_off(skip)
        }
        TrendWindow::Since(start) => points.into_iter().filter(|p| p.timestamp >= start).collect(),
    }
}

pub fn clan_activity(mut members: Vec<ClanMember>) -> Vec<ClanMember> {
    members.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.tag.cmp(&b.tag))
    });
    members
}

pub fn summarize_battles(battles: &[Battle]) -> BattleSummary {
    let mut summary = BattleSummary::default();
    for b in battles {
        summary.total += 1;
        match b.result {
            BattleResult::Win => summary.wins += 1,
            BattleResult::Loss => summary.losses += 1,
            BattleResult::Draw => summary.draws += 1,
        }
        summary.total_trophy_change += b.trophy_change.unwrap_or(0);
        summary.first_battle = Some(summary.first_battle.map_or(b.timestamp, |t| t.min(b.timestamp)));
        summary.last_battle = Some(summary.last_battle.map_or(b.timestamp, |t| t.max(b.timestamp)));
    }
    if summary.total > 0 {
        summary.win_rate = Some(summary.wins as f64 / summary.total as f64);
    }
    summary
}

pub fn consolidate_deck_history(observations: &[MemberDeckObservation]) -> Vec<DeckPeriod> {
    let mut ordered = observations.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|o| o.captured_at);

    let mut periods: Vec<DeckPeriod> = Vec::new();
    for o in ordered {
        match periods.last_mut() {
            Some(current) if current.deck_signature == o.deck_signature => {
                current.last_seen = o.captured_at;
                current.cards = o.cards.clone();
                current.favorite_card = o.favorite_card.clone();
                current.arena = o.arena.clone();
                current.trophies = o.trophies;
                current.best_trophies = o.best_trophies;
                current.exp_level = o.exp_level;
            }
            _ => periods.push(DeckPeriod {
                deck_signature: o.deck_signature.clone(),
                cards: o.cards.clone(),
                favorite_card: o.favorite_card.clone(),
                arena: o.arena.clone(),
                trophies: o.trophies,
                best_trophies: o.best_trophies,
                exp_level: o.exp_level,
                first_seen: o.captured_at,
                last_seen: o.captured_at,
                duration_label: String::new(),
            }),
        }
    }
    for p in &mut periods {
        p.duration_label = describe_duration(p.last_seen - p.first_seen);
    }
    periods.reverse();
    periods
}

pub fn member_deck_histories(
    observations: &[MemberDeckObservation],
) -> BTreeMap<Tag, Vec<DeckPeriod>> {
    let mut by_member: BTreeMap<&Tag, Vec<MemberDeckObservation>> = BTreeMap::new();
    for o in observations {
        by_member.entry(&o.player_tag).or_default().push(o.clone());
    }
    by_member
        .into_iter()
        .map(|(tag, obs)| (tag.clone(), consolidate_deck_history(&obs)))
        .collect()
}

pub fn clan_deck_usage(observations: &[MemberDeckObservation]) -> Vec<DeckUsage> {
    let mut latest: BTreeMap<&Tag, &MemberDeckObservation> = BTreeMap::new();
    for o in observations {
        let replace = latest
            .get(&o.player_tag)
            .is_none_or(|cur| o.captured_at >= cur.captured_at);
        if replace {
            latest.insert(&o.player_tag, o);
        }
    }

    let mut groups: BTreeMap<&DeckSignature, DeckUsage> = BTreeMap::new();
    for o in latest.into_values() {
        groups
            .entry(&o.deck_signature)
            .or_insert_with(|| DeckUsage {
                deck_signature: o.deck_signature.clone(),
                cards: o.cards.clone(),
                players: Vec::new(),
            })
            .players
            .push(o.name.clone());
    }
    let mut out = groups.into_values().collect::<Vec<_>>();
    for usage in &mut out {
        usage.players.sort();
    }
    out.sort_by(|a, b| {
        b.count()
            .cmp(&a.count())
            .then_with(|| a.deck_signature.cmp(&b.deck_signature))
    });
    out
}

/// Whole days first; below a day, hours only past 3600 s and minutes only
/// past 60 s, so exactly one hour reads "60 minutes".
pub fn describe_duration(d: Duration) -> String {
    let days = d.num_days();
    if days > 0 {
        return plural(days, "day");
    }
    let secs = d.num_seconds();
    if secs > 3600 {
        plural(secs / 3600, "hour")
    } else if secs > 60 {
        plural(secs / 60, "minute")
    } else {
        "Less than a minute".to_string()
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

pub struct Aggregator<'a> {
    store: &'a Store,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn compute_deck_stats(&self) -> Result<Vec<DeckStat>> {
        Ok(reduce_deck_stats(&self.store.load_battles()?))
    }

    pub fn compute_trophy_trend(&self, window: TrendWindow) -> Result<Vec<TrendPoint>> {
        Ok(trophy_trend(&self.store.load_snapshots()?, window))
    }

    pub fn compute_clan_activity(&self) -> Result<Vec<ClanMember>> {
        Ok(clan_activity(self.store.load_clan_members()?))
    }

    pub fn compute_battle_summary(&self) -> Result<BattleSummary> {
        Ok(summarize_battles(&self.store.load_battles()?))
    }

    pub fn compute_member_deck_history(&self, tag: &Tag) -> Result<Vec<DeckPeriod>> {
        Ok(consolidate_deck_history(
            &self.store.load_member_decks(Some(tag))?,
        ))
    }

    pub fn compute_member_deck_histories(&self) -> Result<BTreeMap<Tag, Vec<DeckPeriod>>> {
        Ok(member_deck_histories(&self.store.load_member_decks(None)?))
    }

    pub fn compute_clan_deck_usage(&self) -> Result<Vec<DeckUsage>> {
        Ok(clan_deck_usage(&self.store.load_member_decks(None)?))
    }
}
