use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::{FetchError, GameApi};
use crate::config::Config;
use crate::model::{Battle, ClanMember, CollectionRun, MemberDeckObservation, PlayerSnapshot};
use crate::normalize::{normalize_battle, normalize_clan, normalize_member_deck, normalize_player};
use crate::payload::{BattlePayload, ClanPayload, PlayerPayload};
use crate::report::{ReportInputs, ReportModel, ReportOptions, assemble};
use crate::store::{Store, StoreWriteError};
use crate::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetching,
    Normalizing,
    Storing,
    Aggregating,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Storing => "storing",
            Self::Aggregating => "aggregating",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("api rejected the request: {0}")]
    FatalAuth(#[source] FetchError),
    #[error("store write failed, run rolled back: {0}")]
    Store(#[from] StoreWriteError),
    #[error("aggregate stored history: {0:#}")]
    Aggregate(anyhow::Error),
}

impl RunError {
    pub fn stage(&self) -> RunStage {
        match self {
            Self::FatalAuth(_) => RunStage::Fetching,
            Self::Store(_) => RunStage::Storing,
            Self::Aggregate(_) => RunStage::Aggregating,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FatalAuth(_) => 2,
            Self::Store(_) | Self::Aggregate(_) => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub player_tag: Tag,
    pub clan_tag: Option<Tag>,
    pub track_member_decks: bool,
    pub report: ReportOptions,
}

impl RunSettings {
    pub fn for_player(player_tag: Tag) -> Self {
        Self {
            player_tag,
            clan_tag: None,
            track_member_decks: false,
            report: ReportOptions::default(),
        }
    }
}

impl From<&Config> for RunSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            player_tag: cfg.player_tag.clone(),
            clan_tag: cfg.clan_tag.clone(),
            track_member_decks: cfg.track_member_decks,
            report: cfg.report,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: i64,
    pub run: CollectionRun,
    pub report: ReportModel,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<RunSummary>),
    Skipped(FetchError),
}

struct Fetched {
    player: PlayerPayload,
    battles: Vec<BattlePayload>,
    clan: Option<(Tag, ClanPayload)>,
    member_profiles: Vec<PlayerPayload>,
}

pub fn run_collection(
    settings: &RunSettings,
    api: &impl GameApi,
    store: &mut Store,
) -> Result<RunOutcome, RunError> {
    run_collection_at(settings, api, store, Utc::now())
}

pub fn run_collection_at(
    settings: &RunSettings,
    api: &impl GameApi,
    store: &mut Store,
    captured_at: DateTime<Utc>,
) -> Result<RunOutcome, RunError> {
    enter(RunStage::Fetching);
    let fetched = match fetch_all(settings, api) {
        Ok(fetched) => fetched,
        Err(err) if err.is_transient() => {
            warn!(%err, "transient fetch failure, skipping run");
            return Ok(RunOutcome::Skipped(err));
        }
        Err(err) => return Err(fail(RunError::FatalAuth(err))),
    };

    enter(RunStage::Normalizing);
    let battles = fetched
        .battles
        .iter()
        .filter_map(|raw| normalize_battle(raw, &settings.player_tag))
        .collect::<Vec<_>>();
    let battles_skipped = fetched.battles.len() - battles.len();
    let snapshot = normalize_player(&fetched.player, &settings.player_tag, captured_at);
    let members = fetched
        .clan
        .as_ref()
        .map(|(tag, clan)| normalize_clan(clan, tag, captured_at))
        .unwrap_or_default();
    let member_decks = fetched
        .member_profiles
        .iter()
        .filter_map(|p| normalize_member_deck(p, captured_at))
        .collect::<Vec<_>>();

    enter(RunStage::Storing);
    let (run_id, run) = write_run(
        store,
        &battles,
        &snapshot,
        &members,
        &member_decks,
        CollectionRun {
            started_at: captured_at,
            finished_at: captured_at,
            battles_fetched: fetched.battles.len(),
            battles_inserted: 0,
            battles_skipped,
            members_upserted: 0,
        },
    )
    .map_err(|err| fail(RunError::Store(err)))?;

    enter(RunStage::Aggregating);
    let inputs = ReportInputs::load(store, &settings.report)
        .map_err(|err| fail(RunError::Aggregate(err)))?;

    enter(RunStage::Assembling);
    let report = assemble(inputs, &settings.report, run.finished_at);

    enter(RunStage::Done);
    info!(
        run_id,
        fetched = run.battles_fetched,
        inserted = run.battles_inserted,
        skipped = run.battles_skipped,
        members = run.members_upserted,
        member_decks = member_decks.len(),
        "collection run complete"
    );
    Ok(RunOutcome::Completed(Box::new(RunSummary {
        run_id,
        run,
        report,
    })))
}

fn fetch_all(settings: &RunSettings, api: &impl GameApi) -> Result<Fetched, FetchError> {
    let player = api.fetch_player(&settings.player_tag)?;
    let battles = api.fetch_battlelog(&settings.player_tag)?;

    let clan_tag = settings.clan_tag.clone().or_else(|| {
        player
            .clan
            .as_ref()
            .and_then(|c| Tag::parse(&c.tag).ok())
    });
    let clan = match clan_tag {
        Some(tag) => {
            let payload = api.fetch_clan(&tag)?;
            Some((tag, payload))
        }
        None => {
            info!(player = %settings.player_tag, "no clan configured or joined");
            None
        }
    };

    let mut member_profiles = Vec::new();
    if settings.track_member_decks
        && let Some((_, clan)) = &clan
    {
        for member in &clan.member_list {
            let Ok(tag) = Tag::parse(&member.tag) else {
                continue;
            };
            match api.fetch_player(&tag) {
                Ok(profile) => member_profiles.push(profile),
                Err(err) if matches!(err.status(), Some(401 | 403)) => return Err(err),
                Err(err) => warn!(member = %tag, %err, "skipping member deck"),
            }
        }
    }

    Ok(Fetched {
        player,
        battles,
        clan,
        member_profiles,
    })
}

fn write_run(
    store: &mut Store,
    battles: &[Battle],
    snapshot: &PlayerSnapshot,
    members: &[ClanMember],
    member_decks: &[MemberDeckObservation],
    mut run: CollectionRun,
) -> Result<(i64, CollectionRun), StoreWriteError> {
    let writer = store.begin_run()?;
    run.battles_inserted = writer.insert_new_battles(battles)?;
    writer.record_player_snapshot(snapshot)?;
    run.members_upserted = writer.upsert_clan_members(members)?;
    writer.record_member_decks(member_decks)?;
    run.finished_at = Utc::now().max(run.started_at);
    let run_id = writer.record_run(&run)?;
    writer.commit()?;
    Ok((run_id, run))
}

fn enter(stage: RunStage) {
    info!(%stage, "run stage");
}

fn fail(err: RunError) -> RunError {
    error!(stage = %RunStage::Failed, failed_in = %err.stage(), %err, "collection run failed");
    err
}
