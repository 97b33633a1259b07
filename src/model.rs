use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::deck::{Card, DeckSignature};
use crate::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleResult {
    Win,
    Loss,
    Draw,
}

impl BattleResult {
    pub fn from_crowns(own: u32, opponent: u32) -> Self {
        if own > opponent {
            Self::Win
        } else if own < opponent {
            Self::Loss
        } else {
            Self::Draw
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Draw => "draw",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "win" => Some(Self::Win),
            "loss" => Some(Self::Loss),
            "draw" => Some(Self::Draw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub battle_id: String,
    pub player_tag: Tag,
    pub timestamp: DateTime<Utc>,
    pub battle_type: Option<String>,
    pub game_mode: Option<String>,
    pub arena: Option<String>,
    pub is_ladder_tournament: bool,
    pub result: BattleResult,
    pub own_deck: Vec<Card>,
    pub opponent_deck: Vec<Card>,
    pub deck_signature: DeckSignature,
    pub own_crowns: u32,
    pub opponent_crowns: u32,
    pub trophy_change: Option<i64>,
    pub king_tower_hit_points: Option<i64>,
    pub opponent_tag: Option<Tag>,
    pub opponent_name: Option<String>,
    pub opponent_starting_trophies: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_tag: Tag,
    pub name: String,
    pub captured_at: DateTime<Utc>,
    pub trophies: i64,
    pub best_trophies: i64,
    pub level: u32,
    pub clan_tag: Option<Tag>,
    pub clan_name: Option<String>,
    pub wins: u64,
    pub losses: u64,
    pub battle_count: u64,
    pub win_rate_lifetime: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanMember {
    pub tag: Tag,
    pub name: String,
    pub role: Option<String>,
    pub exp_level: u32,
    pub trophies: i64,
    pub donations: u64,
    pub donations_received: u64,
    pub clan_tag: Tag,
    pub clan_name: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDeckObservation {
    pub player_tag: Tag,
    pub name: String,
    pub captured_at: DateTime<Utc>,
    pub deck_signature: DeckSignature,
    pub cards: Vec<Card>,
    pub favorite_card: Option<String>,
    pub arena: Option<String>,
    pub trophies: i64,
    pub best_trophies: i64,
    pub exp_level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub battles_fetched: usize,
    pub battles_inserted: usize,
    pub battles_skipped: usize,
    pub members_upserted: usize,
}

/// Canonical text form used in the store. Fixed width, so text ordering in
/// SQL matches chronological ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_stored_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_api_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in ["%Y%m%dT%H%M%S%.fZ", "%Y%m%dT%H%M%SZ"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    parse_stored_timestamp(trimmed)
}
