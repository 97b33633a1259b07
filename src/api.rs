use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::payload::{BattlePayload, ClanPayload, PlayerPayload};
use crate::tag::Tag;

pub const DEFAULT_BASE_URL: &str = "https://api.clashroyale.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("royale-tracker/", env!("CARGO_PKG_VERSION"));

static CLIENT: OnceCell<Client> = OnceCell::new();

fn shared_client() -> Result<&'static Client, reqwest::Error> {
    CLIENT.get_or_try_init(|| {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
    })
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure fetching {url} after {attempts} attempt(s): {reason}")]
    Transient {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("request to {url} rejected with HTTP {status}: {message}")]
    FatalAuth {
        url: String,
        status: u16,
        message: String,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::FatalAuth { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FatalAuth { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub trait GameApi {
    fn fetch_player(&self, tag: &Tag) -> Result<PlayerPayload, FetchError>;
    fn fetch_battlelog(&self, tag: &Tag) -> Result<Vec<BattlePayload>, FetchError>;
    fn fetch_clan(&self, tag: &Tag) -> Result<ClanPayload, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Retryable,
    Fatal,
}

pub fn classify_status(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Disposition::Retryable
    } else {
        Disposition::Fatal
    }
}

#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal {
        status: u16,
        message: String,
    },
}

pub fn with_retry<T>(
    policy: &RetryPolicy,
    url: &str,
    mut sleep: impl FnMut(Duration),
    mut attempt: impl FnMut() -> Attempt<T>,
) -> Result<T, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();
    for n in 1..=max_attempts {
        match attempt() {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal { status, message } => {
                return Err(FetchError::FatalAuth {
                    url: url.to_string(),
                    status,
                    message,
                });
            }
            Attempt::Retry {
                reason,
                retry_after,
            } => {
                if n < max_attempts {
                    let backoff = policy.delay_for(n);
                    let delay = retry_after
                        .map(|hint| hint.min(policy.max_delay).max(backoff))
                        .unwrap_or(backoff);
                    warn!(
                        url,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "retrying request"
                    );
                    sleep(delay);
                }
                last_reason = reason;
            }
        }
    }
    Err(FetchError::Transient {
        url: url.to_string(),
        attempts: max_attempts,
        reason: last_reason,
    })
}

pub struct ApiClient {
    http: &'static Client,
    base_url: String,
    token: String,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: shared_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            policy,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "fetching");
        let body = with_retry(&self.policy, &url, std::thread::sleep, || {
            self.attempt_once(&url)
        })?;
        serde_json::from_str::<T>(body.trim()).map_err(|err| FetchError::Malformed {
            url,
            reason: err.to_string(),
        })
    }

    fn attempt_once(&self, url: &str) -> Attempt<String> {
        let resp = match self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
        {
            Ok(resp) => resp,
            Err(err) => {
                return Attempt::Retry {
                    reason: format!("request failed: {err}"),
                    retry_after: None,
                };
            }
        };
        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let body = match resp.text() {
            Ok(body) => body,
            Err(err) => {
                return Attempt::Retry {
                    reason: format!("failed reading body: {err}"),
                    retry_after,
                };
            }
        };
        match classify_status(status) {
            Disposition::Success => Attempt::Done(body),
            Disposition::Retryable => Attempt::Retry {
                reason: format!("http {}: {}", status, snippet(&body)),
                retry_after,
            },
            Disposition::Fatal => Attempt::Fatal {
                status: status.as_u16(),
                message: snippet(&body),
            },
        }
    }
}

impl GameApi for ApiClient {
    fn fetch_player(&self, tag: &Tag) -> Result<PlayerPayload, FetchError> {
        self.get_json(&format!("/players/{}", tag.url_segment()))
    }

    fn fetch_battlelog(&self, tag: &Tag) -> Result<Vec<BattlePayload>, FetchError> {
        self.get_json(&format!("/players/{}/battlelog", tag.url_segment()))
    }

    fn fetch_clan(&self, tag: &Tag) -> Result<ClanPayload, FetchError> {
        self.get_json(&format!("/clans/{}", tag.url_segment()))
    }
}

/// Only the delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    body.trim()
        .replace(['\n', '\r'], " ")
        .chars()
        .take(220)
        .collect()
}
