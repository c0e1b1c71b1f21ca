//! Engine configuration

use crate::error::{Error, Result};
use serde::Serialize;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// What happens when a message matches more than one rule in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every matching rule acts on the message, in rule order. A
    /// message can end up copied to a folder and deleted by another
    /// rule in the same pass.
    #[default]
    AllMatching,
    /// Once a rule has acted on a UID, later rules skip it.
    FirstMatchWins,
}

impl FromStr for MatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all-matching" => Ok(Self::AllMatching),
            "first" | "first-match-wins" => Ok(Self::FirstMatchWins),
            other => {
                Err(Error::Config(format!("Unknown match policy: {other}")))
            }
        }
    }
}

/// Knobs for one filter run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on TCP connect + TLS + LOGIN + SELECT.
    pub connect_timeout: Duration,
    /// Bound on each protocol call after the session is open.
    pub command_timeout: Duration,
    /// Attempts to open a session; only connect failures and timeouts
    /// are retried.
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    /// Distinct servers processed at once. Accounts on the same server
    /// always run one after another.
    pub max_parallel_hosts: usize,
    /// UIDs per COPY/STORE command.
    pub batch_size: usize,
    pub match_policy: MatchPolicy,
    /// Evaluate and report without COPY/STORE/EXPUNGE.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
            connect_attempts: 1,
            retry_delay: Duration::from_secs(5),
            max_parallel_hosts: 4,
            batch_size: 500,
            match_policy: MatchPolicy::AllMatching,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `INBOX_FILTER_CONNECT_TIMEOUT_SECS` (default: `30`)
    /// - `INBOX_FILTER_COMMAND_TIMEOUT_SECS` (default: `60`)
    /// - `INBOX_FILTER_CONNECT_ATTEMPTS` (default: `1`)
    /// - `INBOX_FILTER_RETRY_DELAY_SECS` (default: `5`)
    /// - `INBOX_FILTER_MAX_PARALLEL_HOSTS` (default: `4`)
    /// - `INBOX_FILTER_BATCH_SIZE` (default: `500`)
    /// - `INBOX_FILTER_MATCH_POLICY` (`all` or `first`, default: `all`)
    /// - `INBOX_FILTER_DRY_RUN` (default: `false`)
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when a variable does not parse or the result
    /// fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`] but reading from `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            parse_or(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };
        let var = |suffix: &str| format!("INBOX_FILTER_{suffix}");

        let config = Self {
            connect_timeout: secs(
                &var("CONNECT_TIMEOUT_SECS"),
                defaults.connect_timeout,
            )?,
            command_timeout: secs(
                &var("COMMAND_TIMEOUT_SECS"),
                defaults.command_timeout,
            )?,
            connect_attempts: parse_or(
                &lookup,
                &var("CONNECT_ATTEMPTS"),
                defaults.connect_attempts,
            )?,
            retry_delay: secs(
                &var("RETRY_DELAY_SECS"),
                defaults.retry_delay,
            )?,
            max_parallel_hosts: parse_or(
                &lookup,
                &var("MAX_PARALLEL_HOSTS"),
                defaults.max_parallel_hosts,
            )?,
            batch_size: parse_or(
                &lookup,
                &var("BATCH_SIZE"),
                defaults.batch_size,
            )?,
            match_policy: parse_or(
                &lookup,
                &var("MATCH_POLICY"),
                defaults.match_policy,
            )?,
            dry_run: parse_or(&lookup, &var("DRY_RUN"), defaults.dry_run)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or skip every account.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first field that is zero.
    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(Error::Config(
                "connect_attempts must be at least 1".into(),
            ));
        }
        if self.max_parallel_hosts == 0 {
            return Err(Error::Config(
                "max_parallel_hosts must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {key}: {e}"))),
        _ => Ok(default),
    }
}
