use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::api::{DEFAULT_BASE_URL, RetryPolicy};
use crate::report::{DEFAULT_RECENT_BATTLES, DEFAULT_TOP_DECKS, ReportOptions};
use crate::store::DEFAULT_DB_FILE;
use crate::tag::{Tag, TagError};

pub const DEFAULT_REPORT_FILE: &str = "report.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key} is not a valid tag: {source}")]
    BadTag {
        key: &'static str,
        source: TagError,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub player_tag: Tag,
    pub clan_tag: Option<Tag>,
    pub db_path: PathBuf,
    pub api_base_url: String,
    pub retry: RetryPolicy,
    pub track_member_decks: bool,
    pub report: ReportOptions,
    pub report_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| non_blank(&lookup, key);

        let api_token = get("CR_API_TOKEN").ok_or(ConfigError::Missing("CR_API_TOKEN"))?;
        let player_tag = parse_tag(
            "CR_PLAYER_TAG",
            &get("CR_PLAYER_TAG").ok_or(ConfigError::Missing("CR_PLAYER_TAG"))?,
        )?;
        let clan_tag = get("CR_CLAN_TAG")
            .map(|raw| parse_tag("CR_CLAN_TAG", &raw))
            .transpose()?;

        let defaults = RetryPolicy::default();
        let max_attempts = parse_or("CR_MAX_ATTEMPTS", get("CR_MAX_ATTEMPTS"), defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "CR_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let base_ms = parse_or(
            "CR_BACKOFF_MS",
            get("CR_BACKOFF_MS"),
            defaults.base_delay.as_millis() as u64,
        )?;
        let max_ms = parse_or(
            "CR_BACKOFF_MAX_MS",
            get("CR_BACKOFF_MAX_MS"),
            defaults.max_delay.as_millis() as u64,
        )?;
        let output = ReportConfig::from_lookup(&lookup)?;

        Ok(Self {
            api_token,
            player_tag,
            clan_tag,
            db_path: output.db_path,
            api_base_url: get("CR_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms.max(base_ms)),
            },
            track_member_decks: parse_flag("CR_TRACK_MEMBER_DECKS", get("CR_TRACK_MEMBER_DECKS"))?,
            report: output.options,
            report_path: output.out_path,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub db_path: PathBuf,
    pub options: ReportOptions,
    pub out_path: PathBuf,
}

impl ReportConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| non_blank(&lookup, key);
        Ok(Self {
            db_path: get("CR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE)),
            options: ReportOptions {
                top_decks: parse_or("CR_REPORT_TOP_DECKS", get("CR_REPORT_TOP_DECKS"), DEFAULT_TOP_DECKS)?,
                recent_battles: parse_or(
                    "CR_REPORT_RECENT_BATTLES",
                    get("CR_REPORT_RECENT_BATTLES"),
                    DEFAULT_RECENT_BATTLES,
                )?,
            },
            out_path: get("CR_REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_FILE)),
        })
    }
}

fn non_blank(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_tag(key: &'static str, raw: &str) -> Result<Tag, ConfigError> {
    Tag::parse(raw).map_err(|source| ConfigError::BadTag { key, source })
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        }),
    }
}

fn parse_flag(key: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value,
            reason: "expected true/false".to_string(),
        }),
    }
}
