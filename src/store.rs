use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row, TransactionBehavior, params};
use thiserror::Error;
use tracing::{debug, info};

use crate::deck::{Card, DeckSignature};
use crate::model::{
    Battle, BattleResult, ClanMember, CollectionRun, MemberDeckObservation, PlayerSnapshot,
    format_timestamp, parse_stored_timestamp,
};
use crate::tag::Tag;

pub const DEFAULT_DB_FILE: &str = "clash_royale.db";

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS battles (
    battle_id TEXT PRIMARY KEY,
    player_tag TEXT NOT NULL,
    battle_time TEXT NOT NULL,
    battle_type TEXT NULL,
    game_mode TEXT NULL,
    arena TEXT NULL,
    is_ladder_tournament INTEGER NOT NULL,
    result TEXT NOT NULL,
    deck_signature TEXT NOT NULL,
    own_deck_json TEXT NOT NULL,
    opponent_deck_json TEXT NOT NULL,
    own_crowns INTEGER NOT NULL,
    opponent_crowns INTEGER NOT NULL,
    trophy_change INTEGER NULL,
    king_tower_hit_points INTEGER NULL,
    opponent_tag TEXT NULL,
    opponent_name TEXT NULL,
    opponent_starting_trophies INTEGER NULL,
    inserted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_battles_time ON battles(battle_time);
CREATE INDEX IF NOT EXISTS idx_battles_signature ON battles(deck_signature);
CREATE TRIGGER IF NOT EXISTS battles_no_update BEFORE UPDATE ON battles
BEGIN SELECT RAISE(ABORT, 'battles are append-only'); END;
CREATE TRIGGER IF NOT EXISTS battles_no_delete BEFORE DELETE ON battles
BEGIN SELECT RAISE(ABORT, 'battles are append-only'); END;

CREATE TABLE IF NOT EXISTS player_snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_tag TEXT NOT NULL,
    name TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    trophies INTEGER NOT NULL,
    best_trophies INTEGER NOT NULL,
    level INTEGER NOT NULL,
    clan_tag TEXT NULL,
    clan_name TEXT NULL,
    wins INTEGER NOT NULL,
    losses INTEGER NOT NULL,
    battle_count INTEGER NOT NULL,
    win_rate_lifetime REAL NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_captured ON player_snapshots(player_tag, captured_at);
CREATE TRIGGER IF NOT EXISTS snapshots_no_update BEFORE UPDATE ON player_snapshots
BEGIN SELECT RAISE(ABORT, 'player snapshots are append-only'); END;
CREATE TRIGGER IF NOT EXISTS snapshots_no_delete BEFORE DELETE ON player_snapshots
BEGIN SELECT RAISE(ABORT, 'player snapshots are append-only'); END;

CREATE TABLE IF NOT EXISTS clan_members (
    tag TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NULL,
    exp_level INTEGER NOT NULL,
    trophies INTEGER NOT NULL,
    donations INTEGER NOT NULL,
    donations_received INTEGER NOT NULL,
    clan_tag TEXT NOT NULL,
    clan_name TEXT NOT NULL,
    last_seen TEXT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS member_decks (
    observation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_tag TEXT NOT NULL,
    name TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    deck_signature TEXT NOT NULL,
    cards_json TEXT NOT NULL,
    favorite_card TEXT NULL,
    arena TEXT NULL,
    trophies INTEGER NOT NULL,
    best_trophies INTEGER NOT NULL,
    exp_level INTEGER NOT NULL,
    UNIQUE(player_tag, captured_at)
);

CREATE TABLE IF NOT EXISTS collection_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    battles_fetched INTEGER NOT NULL,
    battles_inserted INTEGER NOT NULL,
    battles_skipped INTEGER NOT NULL,
    members_upserted INTEGER NOT NULL
);
"#;

const MIGRATIONS: &[&str] = &[SCHEMA_V1];

const BATTLE_COLUMNS: &str = "battle_id, player_tag, battle_time, battle_type, game_mode, arena, \
    is_ladder_tournament, result, deck_signature, own_deck_json, opponent_deck_json, \
    own_crowns, opponent_crowns, trophy_change, king_tower_hit_points, \
    opponent_tag, opponent_name, opponent_starting_trophies";

const SNAPSHOT_COLUMNS: &str = "player_tag, name, captured_at, trophies, best_trophies, level, \
    clan_tag, clan_name, wins, losses, battle_count, win_rate_lifetime";

const MEMBER_COLUMNS: &str = "tag, name, role, exp_level, trophies, donations, donations_received, \
    clan_tag, clan_name, last_seen, updated_at";

const MEMBER_DECK_COLUMNS: &str = "player_tag, name, captured_at, deck_signature, cards_json, \
    favorite_card, arena, trophies, best_trophies, exp_level";

#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("open sqlite db {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("create store dir {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode {what}: {source}")]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("snapshot for {tag} captured at {incoming} is older than stored snapshot at {latest}")]
    SnapshotOutOfOrder {
        tag: String,
        incoming: String,
        latest: String,
    },
    #[error("store schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: u32, supported: u32 },
    #[error("store at {} has not been initialized by a collection run", .0.display())]
    Uninitialized(PathBuf),
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreWriteError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreWriteError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StoreWriteError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_read_only(path: &Path) -> Result<Self, StoreWriteError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|source| {
            StoreWriteError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let store = Self { conn };
        let version = store.schema_version()?;
        if version == 0 {
            return Err(StoreWriteError::Uninitialized(path.to_path_buf()));
        }
        if version as usize > MIGRATIONS.len() {
            return Err(StoreWriteError::SchemaTooNew {
                found: version,
                supported: MIGRATIONS.len() as u32,
            });
        }
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreWriteError> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<u32, StoreWriteError> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
    }

    fn migrate(&mut self) -> Result<(), StoreWriteError> {
        let current = self.schema_version()? as usize;
        if current > MIGRATIONS.len() {
            return Err(StoreWriteError::SchemaTooNew {
                found: current as u32,
                supported: MIGRATIONS.len() as u32,
            });
        }
        for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current) {
            let version = idx + 1;
            let tx = self.conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version as i64)?;
            tx.commit()?;
            info!(version, "applied store migration");
        }
        Ok(())
    }

    /// Start the single write transaction of a run. Dropping the writer
    /// without [`RunWriter::commit`] rolls everything back.
    pub fn begin_run(&mut self) -> Result<RunWriter<'_>, StoreWriteError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(RunWriter { tx })
    }

    pub fn battle_count(&self) -> Result<usize> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM battles", [], |row| row.get::<_, i64>(0))
            .context("count battles")?;
        Ok(n as usize)
    }

    pub fn load_battles(&self) -> Result<Vec<Battle>> {
        let sql = format!(
            "SELECT {BATTLE_COLUMNS} FROM battles ORDER BY battle_time ASC, battle_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare load battles")?;
        let rows = stmt
            .query_map([], battle_from_row)
            .context("query load battles")?;
        collect_rows(rows, "decode battle row")
    }

    pub fn recent_battles(&self, limit: usize) -> Result<Vec<Battle>> {
        let sql = format!(
            "SELECT {BATTLE_COLUMNS} FROM battles ORDER BY battle_time DESC, battle_id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare recent battles")?;
        let rows = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], battle_from_row)
            .context("query recent battles")?;
        collect_rows(rows, "decode battle row")
    }

    pub fn load_snapshots(&self) -> Result<Vec<PlayerSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM player_snapshots ORDER BY captured_at ASC, snapshot_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare load snapshots")?;
        let rows = stmt
            .query_map([], snapshot_from_row)
            .context("query load snapshots")?;
        collect_rows(rows, "decode snapshot row")
    }

    pub fn latest_snapshot(&self) -> Result<Option<PlayerSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM player_snapshots ORDER BY captured_at DESC, snapshot_id DESC LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare latest snapshot")?;
        let mut rows = stmt
            .query_map([], snapshot_from_row)
            .context("query latest snapshot")?;
        rows.next()
            .transpose()
            .context("decode snapshot row")
    }

    pub fn load_clan_members(&self) -> Result<Vec<ClanMember>> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM clan_members ORDER BY tag ASC");
        let mut stmt = self.conn.prepare(&sql).context("prepare load clan members")?;
        let rows = stmt
            .query_map([], member_from_row)
            .context("query load clan members")?;
        collect_rows(rows, "decode clan member row")
    }

    pub fn load_member_decks(&self, tag: Option<&Tag>) -> Result<Vec<MemberDeckObservation>> {
        let sql = format!(
            "SELECT {MEMBER_DECK_COLUMNS} FROM member_decks
             WHERE (?1 IS NULL OR player_tag = ?1)
             ORDER BY captured_at ASC, observation_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare load member decks")?;
        let rows = stmt
            .query_map(params![tag.map(Tag::as_str)], member_deck_from_row)
            .context("query load member decks")?;
        collect_rows(rows, "decode member deck row")
    }

    pub fn last_run(&self) -> Result<Option<CollectionRun>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT started_at, finished_at, battles_fetched, battles_inserted,
                        battles_skipped, members_upserted
                 FROM collection_runs ORDER BY run_id DESC LIMIT 1",
            )
            .context("prepare last run")?;
        let mut rows = stmt
            .query_map([], |row| {
                Ok(CollectionRun {
                    started_at: timestamp_col(row, 0)?,
                    finished_at: timestamp_col(row, 1)?,
                    battles_fetched: row.get::<_, i64>(2)? as usize,
                    battles_inserted: row.get::<_, i64>(3)? as usize,
                    battles_skipped: row.get::<_, i64>(4)? as usize,
                    members_upserted: row.get::<_, i64>(5)? as usize,
                })
            })
            .context("query last run")?;
        rows.next().transpose().context("decode run row")
    }
}

pub struct RunWriter<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl RunWriter<'_> {
    /// Inserts battles not yet stored and returns how many were new. Existing
    /// rows are never touched, so repeating a call inserts nothing.
    pub fn insert_new_battles(&self, battles: &[Battle]) -> Result<usize, StoreWriteError> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO battles (
                battle_id, player_tag, battle_time, battle_type, game_mode, arena,
                is_ladder_tournament, result, deck_signature, own_deck_json, opponent_deck_json,
                own_crowns, opponent_crowns, trophy_change, king_tower_hit_points,
                opponent_tag, opponent_name, opponent_starting_trophies, inserted_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19
            )
            ON CONFLICT(battle_id) DO NOTHING
            "#,
        )?;
        let inserted_at = format_timestamp(&Utc::now());
        let mut inserted = 0usize;
        for b in battles {
            let own_deck = encode_json("own deck", &b.own_deck)?;
            let opponent_deck = encode_json("opponent deck", &b.opponent_deck)?;
            inserted += stmt.execute(params![
                b.battle_id,
                b.player_tag.as_str(),
                format_timestamp(&b.timestamp),
                b.battle_type,
                b.game_mode,
                b.arena,
                bool_to_i64(b.is_ladder_tournament),
                b.result.as_str(),
                b.deck_signature.as_str(),
                own_deck,
                opponent_deck,
                b.own_crowns,
                b.opponent_crowns,
                b.trophy_change,
                b.king_tower_hit_points,
                b.opponent_tag.as_ref().map(Tag::as_str),
                b.opponent_name,
                b.opponent_starting_trophies,
                inserted_at,
            ])?;
        }
        debug!(offered = battles.len(), inserted, "staged battles");
        Ok(inserted)
    }

    pub fn record_player_snapshot(&self, s: &PlayerSnapshot) -> Result<(), StoreWriteError> {
        let incoming = format_timestamp(&s.captured_at);
        let latest: Option<String> = self.tx.query_row(
            "SELECT MAX(captured_at) FROM player_snapshots WHERE player_tag = ?1",
            params![s.player_tag.as_str()],
            |row| row.get(0),
        )?;
        if let Some(latest) = latest
            && incoming < latest
        {
            return Err(StoreWriteError::SnapshotOutOfOrder {
                tag: s.player_tag.to_string(),
                incoming,
                latest,
            });
        }
        self.tx.execute(
            r#"
            INSERT INTO player_snapshots (
                player_tag, name, captured_at, trophies, best_trophies, level,
                clan_tag, clan_name, wins, losses, battle_count, win_rate_lifetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                s.player_tag.as_str(),
                s.name,
                incoming,
                s.trophies,
                s.best_trophies,
                s.level,
                s.clan_tag.as_ref().map(Tag::as_str),
                s.clan_name,
                s.wins as i64,
                s.losses as i64,
                s.battle_count as i64,
                s.win_rate_lifetime,
            ],
        )?;
        Ok(())
    }

    /// Merges members on tag. `last_seen` keeps the later of the stored and
    /// incoming values and a missing incoming value never clears it.
    pub fn upsert_clan_members(&self, members: &[ClanMember]) -> Result<usize, StoreWriteError> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO clan_members (
                tag, name, role, exp_level, trophies, donations, donations_received,
                clan_tag, clan_name, last_seen, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(tag) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                exp_level = excluded.exp_level,
                trophies = excluded.trophies,
                donations = excluded.donations,
                donations_received = excluded.donations_received,
                clan_tag = excluded.clan_tag,
                clan_name = excluded.clan_name,
                last_seen = CASE
                    WHEN clan_members.last_seen IS NULL THEN excluded.last_seen
                    WHEN excluded.last_seen IS NULL THEN clan_members.last_seen
                    WHEN excluded.last_seen > clan_members.last_seen THEN excluded.last_seen
                    ELSE clan_members.last_seen
                END,
                updated_at = excluded.updated_at
            "#,
        )?;
        let mut upserted = 0usize;
        for m in members {
            upserted += stmt.execute(params![
                m.tag.as_str(),
                m.name,
                m.role,
                m.exp_level,
                m.trophies,
                m.donations as i64,
                m.donations_received as i64,
                m.clan_tag.as_str(),
                m.clan_name,
                m.last_seen.as_ref().map(format_timestamp),
                format_timestamp(&m.updated_at),
            ])?;
        }
        Ok(upserted)
    }

    pub fn record_member_decks(
        &self,
        observations: &[MemberDeckObservation],
    ) -> Result<usize, StoreWriteError> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO member_decks (
                player_tag, name, captured_at, deck_signature, cards_json,
                favorite_card, arena, trophies, best_trophies, exp_level
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(player_tag, captured_at) DO NOTHING
            "#,
        )?;
        let mut recorded = 0usize;
        for o in observations {
            recorded += stmt.execute(params![
                o.player_tag.as_str(),
                o.name,
                format_timestamp(&o.captured_at),
                o.deck_signature.as_str(),
                encode_json("member deck", &o.cards)?,
                o.favorite_card,
                o.arena,
                o.trophies,
                o.best_trophies,
                o.exp_level,
            ])?;
        }
        Ok(recorded)
    }

    pub fn record_run(&self, run: &CollectionRun) -> Result<i64, StoreWriteError> {
        self.tx.execute(
            "INSERT INTO collection_runs (
                started_at, finished_at, battles_fetched, battles_inserted,
                battles_skipped, members_upserted
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_timestamp(&run.started_at),
                format_timestamp(&run.finished_at),
                run.battles_fetched as i64,
                run.battles_inserted as i64,
                run.battles_skipped as i64,
                run.members_upserted as i64,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn commit(self) -> Result<(), StoreWriteError> {
        self.tx.commit()?;
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct BadColumn(String);

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn bad_column(idx: usize, msg: impl Into<String>) -> rusqlite::Error {
    conversion_err(idx, BadColumn(msg.into()))
}

fn tag_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Tag> {
    let raw: String = row.get(idx)?;
    Tag::parse(&raw).map_err(|err| conversion_err(idx, err))
}

fn opt_tag_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Tag>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Tag::parse(&r).map_err(|err| conversion_err(idx, err)))
        .transpose()
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_stored_timestamp(&raw).ok_or_else(|| bad_column(idx, format!("bad timestamp {raw:?}")))
}

fn opt_timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        parse_stored_timestamp(&r).ok_or_else(|| bad_column(idx, format!("bad timestamp {r:?}")))
    })
    .transpose()
}

fn cards_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<Card>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_err(idx, err))
}

fn battle_from_row(row: &Row<'_>) -> rusqlite::Result<Battle> {
    let result_raw: String = row.get(7)?;
    let result = BattleResult::parse(&result_raw)
        .ok_or_else(|| bad_column(7, format!("unknown result {result_raw:?}")))?;
    Ok(Battle {
        battle_id: row.get(0)?,
        player_tag: tag_col(row, 1)?,
        timestamp: timestamp_col(row, 2)?,
        battle_type: row.get(3)?,
        game_mode: row.get(4)?,
        arena: row.get(5)?,
        is_ladder_tournament: row.get::<_, i64>(6)? != 0,
        result,
        deck_signature: DeckSignature::from_stored(row.get(8)?),
        own_deck: cards_col(row, 9)?,
        opponent_deck: cards_col(row, 10)?,
        own_crowns: row.get(11)?,
        opponent_crowns: row.get(12)?,
        trophy_change: row.get(13)?,
        king_tower_hit_points: row.get(14)?,
        opponent_tag: opt_tag_col(row, 15)?,
        opponent_name: row.get(16)?,
        opponent_starting_trophies: row.get(17)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerSnapshot> {
    Ok(PlayerSnapshot {
        player_tag: tag_col(row, 0)?,
        name: row.get(1)?,
        captured_at: timestamp_col(row, 2)?,
        trophies: row.get(3)?,
        best_trophies: row.get(4)?,
        level: row.get(5)?,
        clan_tag: opt_tag_col(row, 6)?,
        clan_name: row.get(7)?,
        wins: row.get::<_, i64>(8)? as u64,
        losses: row.get::<_, i64>(9)? as u64,
        battle_count: row.get::<_, i64>(10)? as u64,
        win_rate_lifetime: row.get(11)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ClanMember> {
    Ok(ClanMember {
        tag: tag_col(row, 0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        exp_level: row.get(3)?,
        trophies: row.get(4)?,
        donations: row.get::<_, i64>(5)? as u64,
        donations_received: row.get::<_, i64>(6)? as u64,
        clan_tag: tag_col(row, 7)?,
        clan_name: row.get(8)?,
        last_seen: opt_timestamp_col(row, 9)?,
        updated_at: timestamp_col(row, 10)?,
    })
}

fn member_deck_from_row(row: &Row<'_>) -> rusqlite::Result<MemberDeckObservation> {
    Ok(MemberDeckObservation {
        player_tag: tag_col(row, 0)?,
        name: row.get(1)?,
        captured_at: timestamp_col(row, 2)?,
        deck_signature: DeckSignature::from_stored(row.get(3)?),
        cards: cards_col(row, 4)?,
        favorite_card: row.get(5)?,
        arena: row.get(6)?,
        trophies: row.get(7)?,
        best_trophies: row.get(8)?,
        exp_level: row.get(9)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &'static str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context(what)?);
    }
    Ok(out)
}

fn encode_json<T: serde::Serialize>(
    what: &'static str,
    value: &T,
) -> Result<String, StoreWriteError> {
    serde_json::to_string(value).map_err(|source| StoreWriteError::Encode { what, source })
}

fn bool_to_i64(v: bool) -> i64 {
    if v { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn tag(raw: &str) -> Tag {
        Tag::parse(raw).unwrap()
    }

    fn card(id: u64) -> Card {
        Card {
            id: Some(id),
            name: format!("Card {id}"),
            level: Some(11),
            evolution_level: 0,
        }
    }

    fn battle(id: &str, minute: i64, result: BattleResult) -> Battle {
        let deck = (0..8).map(|i| card(26_000_000 + i)).collect::<Vec<_>>();
        Battle {
            battle_id: id.to_string(),
            player_tag: tag("#OWNER"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minute),
            battle_type: Some("PvP".to_string()),
            game_mode: Some("Ladder".to_string()),
            arena: None,
            is_ladder_tournament: false,
            result,
            deck_signature: DeckSignature::from_cards(&deck),
            own_deck: deck.clone(),
            opponent_deck: deck,
            own_crowns: 1,
            opponent_crowns: 0,
            trophy_change: Some(30),
            king_tower_hit_points: None,
            opponent_tag: Some(tag("#OPP")),
            opponent_name: None,
            opponent_starting_trophies: Some(5000),
        }
    }

    fn snapshot(day: u32) -> PlayerSnapshot {
        PlayerSnapshot {
            player_tag: tag("#OWNER"),
            name: "Owner".to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            trophies: 5000 + day as i64,
            best_trophies: 6000,
            level: 13,
            clan_tag: Some(tag("#CLAN")),
            clan_name: Some("Clan".to_string()),
            wins: 10,
            losses: 5,
            battle_count: 20,
            win_rate_lifetime: Some(10.0 / 15.0),
        }
    }

    fn member(tag_raw: &str, last_seen: Option<DateTime<Utc>>) -> ClanMember {
        ClanMember {
            tag: tag(tag_raw),
            name: tag_raw.to_string(),
            role: Some("member".to_string()),
            exp_level: 12,
            trophies: 4000,
            donations: 10,
            donations_received: 5,
            clan_tag: tag("#CLAN"),
            clan_name: "Clan".to_string(),
            last_seen,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn battle_insert_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let battles = vec![
            battle("a", 0, BattleResult::Win),
            battle("b", 1, BattleResult::Loss),
        ];
        let w = store.begin_run().unwrap();
        assert_eq!(w.insert_new_battles(&battles).unwrap(), 2);
        assert_eq!(w.insert_new_battles(&battles).unwrap(), 0);
        w.commit().unwrap();

        let w = store.begin_run().unwrap();
        assert_eq!(w.insert_new_battles(&battles).unwrap(), 0);
        w.commit().unwrap();
        assert_eq!(store.battle_count().unwrap(), 2);
    }

    #[test]
    fn battles_round_trip_through_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let original = battle("a", 0, BattleResult::Draw);
        let w = store.begin_run().unwrap();
        w.insert_new_battles(std::slice::from_ref(&original)).unwrap();
        w.commit().unwrap();
        let loaded = store.load_battles().unwrap();
        assert_eq!(loaded, vec![original]);
    }

    #[test]
    fn stored_battles_reject_updates() {
        let mut store = Store::open_in_memory().unwrap();
        let w = store.begin_run().unwrap();
        w.insert_new_battles(&[battle("a", 0, BattleResult::Win)])
            .unwrap();
        w.commit().unwrap();
        let err = store
            .conn
            .execute("UPDATE battles SET result = 'loss'", [])
            .unwrap_err();
        assert!(err.to_string().contains("append-only"));
    }

    #[test]
    fn last_seen_never_moves_backwards() {
        let mut store = Store::open_in_memory().unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let early = late - Duration::days(2);

        let w = store.begin_run().unwrap();
        w.upsert_clan_members(&[member("#M1", Some(late)), member("#M2", None)])
            .unwrap();
        w.commit().unwrap();

        let mut renamed = member("#M1", Some(early));
        renamed.name = "Renamed".to_string();
        let w = store.begin_run().unwrap();
        w.upsert_clan_members(&[renamed, member("#M2", Some(early))])
            .unwrap();
        w.commit().unwrap();

        let w = store.begin_run().unwrap();
        w.upsert_clan_members(&[member("#M2", None)]).unwrap();
        w.commit().unwrap();

        let members = store.load_clan_members().unwrap();
        let m1 = members.iter().find(|m| m.tag == tag("#M1")).unwrap();
        let m2 = members.iter().find(|m| m.tag == tag("#M2")).unwrap();
        assert_eq!(m1.last_seen, Some(late));
        assert_eq!(m1.name, "Renamed");
        assert_eq!(m2.last_seen, Some(early));
    }

    #[test]
    fn failed_snapshot_rolls_back_staged_battles() {
        let mut store = Store::open_in_memory().unwrap();
        let w = store.begin_run().unwrap();
        w.record_player_snapshot(&snapshot(10)).unwrap();
        w.commit().unwrap();

        let result = (|| {
            let w = store.begin_run()?;
            w.insert_new_battles(&[battle("a", 0, BattleResult::Win)])?;
            w.record_player_snapshot(&snapshot(9))?;
            w.commit()
        })();
        assert!(matches!(
            result,
            Err(StoreWriteError::SnapshotOutOfOrder { .. })
        ));
        assert_eq!(store.battle_count().unwrap(), 0);
        assert_eq!(store.load_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn snapshots_load_in_capture_order() {
        let mut store = Store::open_in_memory().unwrap();
        for day in [1, 2, 2, 3] {
            let w = store.begin_run().unwrap();
            w.record_player_snapshot(&snapshot(day)).unwrap();
            w.commit().unwrap();
        }
        let days = store
            .load_snapshots()
            .unwrap()
            .iter()
            .map(|s| s.trophies - 5000)
            .collect::<Vec<_>>();
        assert_eq!(days, vec![1, 2, 2, 3]);
        assert_eq!(store.latest_snapshot().unwrap().unwrap().trophies, 5003);
    }

    #[test]
    fn recent_battles_are_newest_first_and_bounded() {
        let mut store = Store::open_in_memory().unwrap();
        let battles = (0..5)
            .map(|i| battle(&format!("b{i}"), i, BattleResult::Win))
            .collect::<Vec<_>>();
        let w = store.begin_run().unwrap();
        w.insert_new_battles(&battles).unwrap();
        w.commit().unwrap();
        let ids = store
            .recent_battles(3)
            .unwrap()
            .into_iter()
            .map(|b| b.battle_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b4", "b3", "b2"]);
        assert_eq!(store.recent_battles(usize::MAX).unwrap().len(), 5);
    }

    #[test]
    fn run_rows_are_recorded() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.last_run().unwrap().is_none());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let run = CollectionRun {
            started_at: now,
            finished_at: now + Duration::seconds(3),
            battles_fetched: 25,
            battles_inserted: 4,
            battles_skipped: 1,
            members_upserted: 40,
        };
        let w = store.begin_run().unwrap();
        w.record_run(&run).unwrap();
        w.commit().unwrap();
        assert_eq!(store.last_run().unwrap(), Some(run));
    }

    #[test]
    fn open_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("royale.db");
        let store = Store::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), MIGRATIONS.len() as u32);
        assert!(path.exists());
    }

    #[test]
    fn open_reports_unusable_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let err = Store::open(&blocker.join("royale.db")).err().unwrap();
        assert!(matches!(err, StoreWriteError::CreateDir { ref path, .. } if *path == blocker));
    }

    #[test]
    fn migration_is_recorded_once() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), MIGRATIONS.len() as u32);
    }
}
