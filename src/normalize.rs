use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::deck::{Card, DECK_SIZE, DeckSignature};
use crate::model::{
    Battle, BattleResult, ClanMember, MemberDeckObservation, PlayerSnapshot, parse_api_timestamp,
};
use crate::payload::{
    BattlePayload, CardPayload, ClanMemberPayload, ClanPayload, PlayerPayload, TeamPayload,
};
use crate::tag::Tag;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationSkip {
    #[error("battle has no usable battleTime ({0:?})")]
    MissingTimestamp(Option<String>),
    #[error("battle has no team entry")]
    MissingTeam,
    #[error("battle has no opponent entry")]
    MissingOpponent,
    #[error("own deck has {count} cards, expected {}", DECK_SIZE)]
    ShortDeck { count: usize },
}

pub fn normalize_battle(raw: &BattlePayload, owner: &Tag) -> Option<Battle> {
    match try_normalize_battle(raw, owner) {
        Ok(battle) => Some(battle),
        Err(reason) => {
            warn!(
                battle_time = raw.battle_time.as_deref().unwrap_or("?"),
                %reason,
                "skipping battle record"
            );
            None
        }
    }
}

pub fn try_normalize_battle(
    raw: &BattlePayload,
    owner: &Tag,
) -> Result<Battle, NormalizationSkip> {
    let battle_time = raw
        .battle_time
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let timestamp = battle_time
        .and_then(parse_api_timestamp)
        .ok_or_else(|| NormalizationSkip::MissingTimestamp(raw.battle_time.clone()))?;
    let battle_time = battle_time.unwrap_or_default();

    let own = find_owner_team(&raw.team, owner).ok_or(NormalizationSkip::MissingTeam)?;
    let opponent = raw.opponent.first().ok_or(NormalizationSkip::MissingOpponent)?;

    let own_deck = normalize_cards(&own.cards);
    if own_deck.len() < DECK_SIZE {
        return Err(NormalizationSkip::ShortDeck {
            count: own_deck.len(),
        });
    }
    // Kept as sent; boat battles and some event modes report no opponent cards.
    let opponent_deck = normalize_cards(&opponent.cards);

    let own_crowns = own.crowns.unwrap_or(0);
    let opponent_crowns = opponent.crowns.unwrap_or(0);
    let game_mode = raw
        .game_mode
        .as_ref()
        .and_then(|m| m.name.clone())
        .filter(|s| !s.trim().is_empty());

    Ok(Battle {
        battle_id: battle_identity(raw, battle_time),
        player_tag: owner.clone(),
        timestamp,
        battle_type: raw.battle_type.clone(),
        game_mode,
        arena: raw.arena.as_ref().and_then(|a| a.name.clone()),
        is_ladder_tournament: raw.is_ladder_tournament,
        result: BattleResult::from_crowns(own_crowns, opponent_crowns),
        deck_signature: DeckSignature::from_cards(&own_deck),
        own_deck,
        opponent_deck,
        own_crowns,
        opponent_crowns,
        trophy_change: own.trophy_change,
        king_tower_hit_points: own.king_tower_hit_points,
        opponent_tag: opponent.tag.as_deref().and_then(|t| Tag::parse(t).ok()),
        opponent_name: opponent.name.clone(),
        opponent_starting_trophies: opponent.starting_trophies,
    })
}

/// `<battleTime>|<opponent tags, sorted>|<game mode>`.
pub fn battle_identity(raw: &BattlePayload, battle_time: &str) -> String {
    let mut opponents = raw
        .opponent
        .iter()
        .filter_map(|o| o.tag.as_deref())
        .map(|t| {
            Tag::parse(t)
                .map(|tag| tag.as_str().to_string())
                .unwrap_or_else(|_| t.trim().to_string())
        })
        .collect::<Vec<_>>();
    opponents.sort();
    let mode = raw
        .game_mode
        .as_ref()
        .and_then(|m| m.id.map(|id| id.to_string()).or_else(|| m.name.clone()))
        .unwrap_or_default();
    format!("{}|{}|{}", battle_time, opponents.join(","), mode)
}

fn find_owner_team<'a>(teams: &'a [TeamPayload], owner: &Tag) -> Option<&'a TeamPayload> {
    teams
        .iter()
        .find(|t| {
            t.tag
                .as_deref()
                .and_then(|raw| Tag::parse(raw).ok())
                .is_some_and(|tag| &tag == owner)
        })
        .or_else(|| teams.first())
}

fn normalize_cards(cards: &[CardPayload]) -> Vec<Card> {
    cards
        .iter()
        .filter_map(|c| {
            let name = c
                .name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if c.id.is_none() && name.is_none() {
                return None;
            }
            Some(Card {
                id: c.id,
                name: name.unwrap_or_else(|| format!("card-{}", c.id.unwrap_or_default())),
                level: c.level,
                evolution_level: c.evolution_level.unwrap_or(0),
            })
        })
        .collect()
}

pub fn normalize_player(
    raw: &PlayerPayload,
    fallback_tag: &Tag,
    captured_at: DateTime<Utc>,
) -> PlayerSnapshot {
    let wins = raw.wins.unwrap_or(0);
    let losses = raw.losses.unwrap_or(0);
    let decided = wins + losses;
    let win_rate_lifetime = if decided > 0 {
        Some(wins as f64 / decided as f64)
    } else {
        None
    };
    let clan_tag = raw.clan.as_ref().and_then(|c| Tag::parse(&c.tag).ok());
    PlayerSnapshot {
        player_tag: Tag::parse(&raw.tag).unwrap_or_else(|_| fallback_tag.clone()),
        name: raw.name.clone(),
        captured_at,
        trophies: raw.trophies.unwrap_or(0),
        best_trophies: raw.best_trophies.unwrap_or(0),
        level: raw.exp_level.unwrap_or(0),
        clan_name: clan_tag
            .as_ref()
            .and_then(|_| raw.clan.as_ref().and_then(|c| c.name.clone())),
        clan_tag,
        wins,
        losses,
        battle_count: raw.battle_count.unwrap_or(0),
        win_rate_lifetime,
    }
}

pub fn normalize_clan(
    raw: &ClanPayload,
    fallback_tag: &Tag,
    updated_at: DateTime<Utc>,
) -> Vec<ClanMember> {
    let clan_tag = Tag::parse(&raw.tag).unwrap_or_else(|_| fallback_tag.clone());
    raw.member_list
        .iter()
        .filter_map(|m| normalize_member(m, &clan_tag, &raw.name, updated_at))
        .collect()
}

fn normalize_member(
    raw: &ClanMemberPayload,
    clan_tag: &Tag,
    clan_name: &str,
    updated_at: DateTime<Utc>,
) -> Option<ClanMember> {
    let tag = match Tag::parse(&raw.tag) {
        Ok(tag) => tag,
        Err(err) => {
            warn!(tag = %raw.tag, %err, "skipping clan member");
            return None;
        }
    };
    Some(ClanMember {
        tag,
        name: raw.name.clone(),
        role: raw.role.clone(),
        exp_level: raw.exp_level.unwrap_or(0),
        trophies: raw.trophies.unwrap_or(0),
        donations: raw.donations.unwrap_or(0),
        donations_received: raw.donations_received.unwrap_or(0),
        clan_tag: clan_tag.clone(),
        clan_name: clan_name.to_string(),
        last_seen: raw.last_seen.as_deref().and_then(parse_api_timestamp),
        updated_at,
    })
}

pub fn normalize_member_deck(
    raw: &PlayerPayload,
    captured_at: DateTime<Utc>,
) -> Option<MemberDeckObservation> {
    let player_tag = Tag::parse(&raw.tag).ok()?;
    let cards = normalize_cards(&raw.current_deck);
    if cards.len() < DECK_SIZE {
        warn!(tag = %player_tag, count = cards.len(), "member profile has no full deck");
        return None;
    }
    Some(MemberDeckObservation {
        player_tag,
        name: raw.name.clone(),
        captured_at,
        deck_signature: DeckSignature::from_cards(&cards),
        cards,
        favorite_card: raw
            .current_favourite_card
            .as_ref()
            .and_then(|c| c.name.clone()),
        arena: raw.arena.as_ref().and_then(|a| a.name.clone()),
        trophies: raw.trophies.unwrap_or(0),
        best_trophies: raw.best_trophies.unwrap_or(0),
        exp_level: raw.exp_level.unwrap_or(0),
    })
}
