//! Environment-backed configuration for `window-smoke`.

use std::env;

use thiserror::Error;
use window_core::{MAX_PAGE_LIMIT, WindowConfig};

const DEFAULT_CHANNEL: &str = "open-lobby";
const DEFAULT_SEED_MESSAGES: usize = 240;

/// Smoke run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Channel opened by the run.
    pub channel_id: String,
    /// Messages seeded into the in-memory history before opening.
    pub seed_messages: usize,
    /// Engine tuning.
    pub window: WindowConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let channel_id = lookup("MODWINDOW_CHANNEL")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());

        let mut window = WindowConfig::open_channel();
        if let Some(capacity) = parse_optional::<usize, _>("MODWINDOW_CAPACITY", &mut lookup)? {
            window.capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(page_limit) = parse_optional::<u16, _>("MODWINDOW_PAGE_LIMIT", &mut lookup)? {
            window.page_limit = page_limit_in_range("MODWINDOW_PAGE_LIMIT", page_limit)?;
            window.latest_limit = window.page_limit;
        }
        if let Some(around) = parse_optional::<u16, _>("MODWINDOW_AROUND_LIMIT", &mut lookup)? {
            let around = page_limit_in_range("MODWINDOW_AROUND_LIMIT", around)?;
            window.around_prev_limit = around;
            window.around_next_limit = around;
        }
        if let Some(cap) = parse_optional::<u32, _>("MODWINDOW_NEW_MESSAGE_CAP", &mut lookup)? {
            if cap == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MODWINDOW_NEW_MESSAGE_CAP",
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
            window.new_message_cap = cap;
        }

        let seed_messages = parse_optional::<usize, _>("MODWINDOW_SEED_MESSAGES", &mut lookup)?
            .unwrap_or(DEFAULT_SEED_MESSAGES);

        Ok(Self {
            channel_id,
            seed_messages,
            window,
        })
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn page_limit_in_range(key: &'static str, limit: u16) -> Result<u16, ConfigError> {
    if (1..=MAX_PAGE_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: limit.to_string(),
            reason: format!("must be within 1..={MAX_PAGE_LIMIT}"),
        })
    }
}
