use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerPayload {
    pub tag: String,
    pub name: String,
    pub exp_level: Option<u32>,
    pub trophies: Option<i64>,
    pub best_trophies: Option<i64>,
    pub wins: Option<u64>,
    pub losses: Option<u64>,
    pub battle_count: Option<u64>,
    pub clan: Option<ClanRef>,
    pub arena: Option<NamedRef>,
    pub current_deck: Vec<CardPayload>,
    pub current_favourite_card: Option<CardPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClanRef {
    pub tag: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NamedRef {
    pub id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CardPayload {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub level: Option<u32>,
    pub evolution_level: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BattlePayload {
    #[serde(rename = "type")]
    pub battle_type: Option<String>,
    pub battle_time: Option<String>,
    pub is_ladder_tournament: bool,
    pub arena: Option<NamedRef>,
    pub game_mode: Option<NamedRef>,
    pub team: Vec<TeamPayload>,
    pub opponent: Vec<TeamPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TeamPayload {
    pub tag: Option<String>,
    pub name: Option<String>,
    pub starting_trophies: Option<i64>,
    pub trophy_change: Option<i64>,
    pub crowns: Option<u32>,
    pub king_tower_hit_points: Option<i64>,
    pub cards: Vec<CardPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClanPayload {
    pub tag: String,
    pub name: String,
    pub member_list: Vec<ClanMemberPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClanMemberPayload {
    pub tag: String,
    pub name: String,
    pub role: Option<String>,
    pub last_seen: Option<String>,
    pub exp_level: Option<u32>,
    pub trophies: Option<i64>,
    pub donations: Option<u64>,
    pub donations_received: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_battle_deserializes() {
        let raw = r#"{"battleTime":"20240101T000000.000Z","team":[{"cards":[{"name":"Knight"}]}]}"#;
        let battle: BattlePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(battle.team.len(), 1);
        assert!(battle.opponent.is_empty());
        assert_eq!(battle.team[0].crowns, None);
        assert_eq!(battle.team[0].cards[0].id, None);
    }

    #[test]
    fn ignores_unknown_fields() {
        let raw = r##"{"tag":"#ABC","name":"x","memberList":[{"tag":"#D","name":"y","clanRank":3,"arena":{"id":1}}]}"##;
        let clan: ClanPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(clan.member_list.len(), 1);
        assert_eq!(clan.member_list[0].donations, None);
    }
}
