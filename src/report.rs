use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{
    Aggregator, BattleSummary, DeckPeriod, DeckStat, DeckUsage, TrendPoint, TrendWindow,
};
use crate::model::{Battle, ClanMember, PlayerSnapshot};
use crate::store::Store;
use crate::tag::Tag;

pub const DEFAULT_TOP_DECKS: usize = 10;
pub const DEFAULT_RECENT_BATTLES: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub top_decks: usize,
    pub recent_battles: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_decks: DEFAULT_TOP_DECKS,
            recent_battles: DEFAULT_RECENT_BATTLES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub latest_snapshot: Option<PlayerSnapshot>,
    pub deck_stats: Vec<DeckStat>,
    pub recent_battles: Vec<Battle>,
    pub clan_activity: Vec<ClanMember>,
    pub summary: BattleSummary,
    pub trophy_trend: Vec<TrendPoint>,
    pub clan_deck_usage: Vec<DeckUsage>,
    pub member_deck_history: BTreeMap<Tag, Vec<DeckPeriod>>,
}

impl ReportInputs {
    pub fn load(store: &Store, options: &ReportOptions) -> Result<Self> {
        let agg = Aggregator::new(store);
        Ok(Self {
            latest_snapshot: store.latest_snapshot()?,
            deck_stats: agg.compute_deck_stats()?,
            recent_battles: store.recent_battles(options.recent_battles)?,
            clan_activity: agg.compute_clan_activity()?,
            summary: agg.compute_battle_summary()?,
            trophy_trend: agg.compute_trophy_trend(TrendWindow::All)?,
            clan_deck_usage: agg.compute_clan_deck_usage()?,
            member_deck_history: agg.compute_member_deck_histories()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportModel {
    pub generated_at: DateTime<Utc>,
    pub player: Option<PlayerSnapshot>,
    pub summary: BattleSummary,
    pub top_decks: Vec<DeckStat>,
    pub recent_battles: Vec<Battle>,
    pub clan_activity: Vec<ClanMember>,
    pub trophy_trend: Vec<TrendPoint>,
    pub clan_deck_usage: Vec<DeckUsage>,
    pub member_deck_history: BTreeMap<Tag, Vec<DeckPeriod>>,
}

pub fn assemble(
    inputs: ReportInputs,
    options: &ReportOptions,
    generated_at: DateTime<Utc>,
) -> ReportModel {
    let mut top_decks = inputs.deck_stats;
    top_decks.sort_by(|a, b| {
        b.games_played
            .cmp(&a.games_played)
            .then(b.wins.cmp(&a.wins))
            .then_with(|| a.deck_signature.cmp(&b.deck_signature))
    });
    top_decks.truncate(options.top_decks);

    let mut recent_battles = inputs.recent_battles;
    recent_battles.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.battle_id.cmp(&a.battle_id))
    });
    recent_battles.truncate(options.recent_battles);

    ReportModel {
        generated_at,
        player: inputs.latest_snapshot,
        summary: inputs.summary,
        top_decks,
        recent_battles,
        clan_activity: inputs.clan_activity,
        trophy_trend: inputs.trophy_trend,
        clan_deck_usage: inputs.clan_deck_usage,
        member_deck_history: inputs.member_deck_history,
    }
}

pub fn build_report(store: &Store, options: &ReportOptions) -> Result<ReportModel> {
    let inputs = ReportInputs::load(store, options)?;
    Ok(assemble(inputs, options, Utc::now()))
}

/// Pretty JSON for the renderer. Writes to a sibling temp file first so a
/// reader never sees a half-written report.
pub fn write_report(path: &Path, model: &ReportModel) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(model).context("serialize report model")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("move report into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::deck::{Card, DeckSignature};
    use crate::model::BattleResult;
    use crate::tag::Tag;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn stat(seed: u64, games: u64, wins: u64) -> DeckStat {
        let cards = (0..8)
            .map(|i| Card {
                id: Some(seed * 100 + i),
                name: format!("c{i}"),
                level: None,
                evolution_level: 0,
            })
            .collect::<Vec<_>>();
        DeckStat {
            deck_signature: DeckSignature::from_cards(&cards),
            cards,
            games_played: games,
            wins,
            losses: games - wins,
            draws: 0,
            win_rate: wins as f64 / games as f64,
            total_trophy_change: 0,
            avg_trophy_change: 0.0,
            last_played: t(0),
        }
    }

    fn battle(minute: i64) -> Battle {
        Battle {
            battle_id: format!("b{minute:03}"),
            player_tag: Tag::parse("P").unwrap(),
            timestamp: t(minute),
            battle_type: Some("PvP".to_string()),
            game_mode: None,
            arena: None,
            is_ladder_tournament: false,
            result: BattleResult::Win,
            own_deck: Vec::new(),
            opponent_deck: Vec::new(),
            deck_signature: DeckSignature::from_cards(&[]),
            own_crowns: 1,
            opponent_crowns: 0,
            trophy_change: Some(30),
            king_tower_hit_points: None,
            opponent_tag: None,
            opponent_name: None,
            opponent_starting_trophies: None,
        }
    }

    #[test]
    fn keeps_top_decks_by_games() {
        let inputs = ReportInputs {
            deck_stats: vec![stat(1, 2, 1), stat(2, 9, 3), stat(3, 5, 5), stat(4, 1, 1)],
            ..ReportInputs::default()
        };
        let options = ReportOptions {
            top_decks: 2,
            recent_battles: 25,
        };
        let model = assemble(inputs, &options, t(0));
        let games = model.top_decks.iter().map(|d| d.games_played).collect::<Vec<_>>();
        assert_eq!(games, vec![9, 5]);
    }

    #[test]
    fn recent_battles_are_newest_first_and_capped() {
        let inputs = ReportInputs {
            recent_battles: (0..40).map(battle).collect(),
            ..ReportInputs::default()
        };
        let model = assemble(inputs, &ReportOptions::default(), t(0));
        assert_eq!(model.recent_battles.len(), DEFAULT_RECENT_BATTLES);
        assert_eq!(model.recent_battles[0].timestamp, t(39));
        assert_eq!(model.recent_battles[24].timestamp, t(15));
    }

    #[test]
    fn empty_inputs_give_empty_report() {
        let model = assemble(ReportInputs::default(), &ReportOptions::default(), t(0));
        assert!(model.player.is_none());
        assert!(model.top_decks.is_empty());
        assert_eq!(model.summary.total, 0);
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["generated_at"], "2024-06-01T12:00:00Z");
        assert!(json["summary"]["win_rate"].is_null());
        assert_eq!(json["member_deck_history"], serde_json::json!({}));
    }

    #[test]
    fn assembling_twice_is_identical() {
        let inputs = ReportInputs {
            deck_stats: vec![stat(1, 3, 2), stat(2, 3, 2)],
            recent_battles: vec![battle(1), battle(2)],
            ..ReportInputs::default()
        };
        let a = assemble(inputs.clone(), &ReportOptions::default(), t(5));
        let b = assemble(inputs, &ReportOptions::default(), t(5));
        assert_eq!(a, b);
    }

    #[test]
    fn writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let model = assemble(ReportInputs::default(), &ReportOptions::default(), t(0));
        write_report(&path, &model).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"generated_at\""));
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["top_decks"], serde_json::json!([]));
    }
}
