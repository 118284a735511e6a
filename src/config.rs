//! Runtime configuration, read from the environment (and `.env`).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::heist::HeistSettings;
use crate::types::Snowflake;

const DEFAULT_STORE_PATH: &str = "./heists.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name} has an invalid duration `{value}` (expected e.g. 500ms, 2s, 5m, 1h, 1d)")]
    InvalidDuration { name: &'static str, value: String },

    #[error("HEIST_TICK_INTERVAL must be greater than zero")]
    ZeroTickInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub token: String,
    /// Only accept `/heist` in this channel. Any channel when unset.
    pub heist_channel_id: Option<Snowflake>,
    /// Register commands on this guild only (fast propagation) instead of
    /// globally.
    pub guild_id: Option<Snowflake>,
    pub store_path: PathBuf,
    pub heist: HeistSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = get("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let duration = |name: &'static str, default: Duration| match get(name) {
            Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidDuration {
                name,
                value,
            }),
            None => Ok(default),
        };
        let defaults = HeistSettings::default();
        let heist = HeistSettings {
            cooldown: duration("HEIST_COOLDOWN", defaults.cooldown)?,
            tick_interval: duration("HEIST_TICK_INTERVAL", defaults.tick_interval)?,
        };
        if heist.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }

        Ok(Self {
            token,
            heist_channel_id: get("HEIST_CHANNEL_ID"),
            guild_id: get("GUILD_ID"),
            store_path: get("HEIST_STORE_PATH")
                .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string())
                .into(),
            heist,
        })
    }
}

/// Parse `500ms`, `2s`, `5m`, `1h`, `1d`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number: u64 = number.parse().ok()?;

    let millis = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    number.checked_mul(millis).map(Duration::from_millis)
}
