//! Runtime configuration from environment variables
//!
//! Every value has a default; a value that is set but does not parse is an
//! error rather than silently falling back.

use crate::leaderboard::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::ratelimit::RateLimitConfig;
use crate::selection::{DedupPolicy, PlacementPolicy, DEFAULT_HISTORY_LIMIT};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Server-side configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingConfig {
    /// Path to SQLite database file
    pub db_path: PathBuf,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    pub dedup: DedupPolicy,

    /// How many of a voter's recent votes count as "seen"
    pub voter_history_limit: usize,

    pub placement: PlacementPolicy,

    /// Give the loser an appearance in each period record
    pub count_losses: bool,

    pub rate_limit: RateLimitConfig,

    pub leaderboard_default_limit: usize,

    /// Key for signing pair session tokens; random per process when unset
    pub session_secret: Option<String>,

    /// Accept votes whose session id is not a signed token
    pub accept_opaque_sessions: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/ranking.db"),
            bind_addr: "0.0.0.0:8080".to_string(),
            dedup: DedupPolicy::default(),
            voter_history_limit: DEFAULT_HISTORY_LIMIT,
            placement: PlacementPolicy::AsDrawn,
            count_losses: true,
            rate_limit: RateLimitConfig::default(),
            leaderboard_default_limit: DEFAULT_LIMIT,
            session_secret: None,
            accept_opaque_sessions: true,
        }
    }
}

impl RankingConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RANKING_DB_PATH` (default: data/ranking.db)
    /// - `RANKING_BIND_ADDR` (default: 0.0.0.0:8080)
    /// - `PAIR_MAX_ATTEMPTS` (default: 50)
    /// - `PAIR_ACCEPT_ON_EXHAUSTION` (default: true)
    /// - `VOTER_HISTORY_LIMIT` (default: 100)
    /// - `PLACEMENT_PROMOTED_FIRST` (default: false)
    /// - `AGGREGATE_COUNT_LOSSES` (default: true)
    /// - `RATE_LIMIT_WINDOW_MS` (default: 60000)
    /// - `RATE_LIMIT_MAX_REQUESTS` (default: 100)
    /// - `RATE_LIMIT_MAX_KEYS` (default: 10000)
    /// - `LEADERBOARD_DEFAULT_LIMIT` (default: 20, max 100)
    /// - `SESSION_SECRET` (default: random per process)
    /// - `SESSION_ACCEPT_OPAQUE` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let promoted_first = parse_or(&lookup, "PLACEMENT_PROMOTED_FIRST", false)?;
        let leaderboard_default_limit = parse_or(
            &lookup,
            "LEADERBOARD_DEFAULT_LIMIT",
            defaults.leaderboard_default_limit,
        )?;
        if !(1..=MAX_LIMIT).contains(&leaderboard_default_limit) {
            return Err(invalid("LEADERBOARD_DEFAULT_LIMIT", leaderboard_default_limit));
        }

        let max_attempts: u32 =
            parse_or(&lookup, "PAIR_MAX_ATTEMPTS", defaults.dedup.max_attempts)?;
        if max_attempts == 0 {
            return Err(invalid("PAIR_MAX_ATTEMPTS", max_attempts));
        }

        let window_ms: u64 = parse_or(
            &lookup,
            "RATE_LIMIT_WINDOW_MS",
            defaults.rate_limit.window.as_millis() as u64,
        )?;
        if window_ms == 0 {
            return Err(invalid("RATE_LIMIT_WINDOW_MS", window_ms));
        }

        Ok(Self {
            db_path: lookup("RANKING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            bind_addr: lookup("RANKING_BIND_ADDR").unwrap_or(defaults.bind_addr),

            dedup: DedupPolicy {
                max_attempts,
                accept_on_exhaustion: parse_or(
                    &lookup,
                    "PAIR_ACCEPT_ON_EXHAUSTION",
                    defaults.dedup.accept_on_exhaustion,
                )?,
            },

            voter_history_limit: parse_or(
                &lookup,
                "VOTER_HISTORY_LIMIT",
                defaults.voter_history_limit,
            )?,

            placement: if promoted_first {
                PlacementPolicy::PromotedFirst
            } else {
                PlacementPolicy::AsDrawn
            },

            count_losses: parse_or(&lookup, "AGGREGATE_COUNT_LOSSES", defaults.count_losses)?,

            rate_limit: RateLimitConfig {
                window: Duration::from_millis(window_ms),
                max_requests: parse_or(
                    &lookup,
                    "RATE_LIMIT_MAX_REQUESTS",
                    defaults.rate_limit.max_requests,
                )?,
                max_keys: parse_or(&lookup, "RATE_LIMIT_MAX_KEYS", defaults.rate_limit.max_keys)?,
            },

            leaderboard_default_limit,

            session_secret: lookup("SESSION_SECRET").filter(|s| !s.trim().is_empty()),

            accept_opaque_sessions: parse_or(
                &lookup,
                "SESSION_ACCEPT_OPAQUE",
                defaults.accept_opaque_sessions,
            )?,
        })
    }
}

/// Client-side configuration for the offline vote queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineQueueConfig {
    /// Base URL of the ranking server
    pub endpoint: String,
    pub voter_id: String,
    /// Directory for the queue's JSON files
    pub storage_dir: PathBuf,
}

impl OfflineQueueConfig {
    /// Environment variables:
    /// - `PAIRRANK_ENDPOINT` (default: http://localhost:8080)
    /// - `PAIRRANK_VOTER_ID` (default: anonymous)
    /// - `PAIRRANK_OFFLINE_DIR` (default: data/offline)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            endpoint: lookup("PAIRRANK_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            voter_id: lookup("PAIRRANK_VOTER_ID").unwrap_or_else(|| "anonymous".to_string()),
            storage_dir: lookup("PAIRRANK_OFFLINE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/offline")),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, raw)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
