use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DECK_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: Option<u64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default)]
    pub evolution_level: u32,
}

impl Card {
    pub fn is_evolved(&self) -> bool {
        self.evolution_level > 0
    }

    fn key(&self) -> CardKey<'_> {
        match self.id {
            Some(id) => CardKey::Id(id),
            None => CardKey::Name(&self.name),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CardKey<'a> {
    Id(u64),
    Name(&'a str),
}

impl fmt::Display for CardKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardKey::Id(id) => write!(f, "{id}"),
            CardKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

/// Order-independent key of a deck's card set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckSignature(String);

impl DeckSignature {
    pub fn from_cards(cards: &[Card]) -> Self {
        let mut keys = cards.iter().map(Card::key).collect::<Vec<_>>();
        keys.sort();
        let joined = keys
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeckSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for DeckSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeckSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: u64, name: &str) -> Card {
        Card {
            id: Some(id),
            name: name.to_string(),
            level: None,
            evolution_level: 0,
        }
    }

    fn deck(ids: &[(u64, &str)]) -> Vec<Card> {
        ids.iter().map(|(id, name)| card(*id, name)).collect()
    }

    #[test]
    fn signature_ignores_play_order() {
        let a = deck(&[
            (26000000, "Knight"),
            (26000017, "Wizard"),
            (26000001, "Archers"),
            (28000000, "Fireball"),
            (26000010, "Skeletons"),
            (27000000, "Cannon"),
            (28000008, "Zap"),
            (26000021, "Hog Rider"),
        ]);
        let mut b = a.clone();
        b.reverse();
        b.swap(0, 3);
        assert_eq!(DeckSignature::from_cards(&a), DeckSignature::from_cards(&b));
    }

    #[test]
    fn signature_ignores_evolution_and_level() {
        let plain = deck(&[(26000000, "Knight"), (26000017, "Wizard")]);
        let mut evolved = plain.clone();
        evolved[0].evolution_level = 1;
        evolved[1].level = Some(14);
        assert_eq!(
            DeckSignature::from_cards(&plain),
            DeckSignature::from_cards(&evolved)
        );
    }

    #[test]
    fn signature_sorts_ids_numerically_and_names_last() {
        let cards = vec![
            Card {
                id: None,
                name: "Mystery".to_string(),
                level: None,
                evolution_level: 0,
            },
            card(900, "B"),
            card(10000, "A"),
        ];
        assert_eq!(
            DeckSignature::from_cards(&cards).as_str(),
            "900,10000,name:Mystery"
        );
    }

    #[test]
    fn different_card_sets_differ() {
        let a = deck(&[(1, "a"), (2, "b")]);
        let b = deck(&[(1, "a"), (3, "c")]);
        assert_ne!(DeckSignature::from_cards(&a), DeckSignature::from_cards(&b));
    }
}
