//! Runtime configuration from environment variables.
//!
//! Every setting except the room number has a default. Config is read before
//! logging exists, so the defaults that were applied are kept on the config
//! and logged once the subscriber is up.

use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::api::FeedPaths;
use crate::diagnostics;
use crate::error::ConfigError;

pub const ENV_API_URL: &str = "NOTIFIER_API_URL";
pub const ENV_ROOM: &str = "NOTIFIER_ROOM";
pub const ENV_DATA_DIR: &str = "NOTIFIER_DATA_DIR";
pub const ENV_LOG_DIR: &str = "NOTIFIER_LOG_DIR";
pub const ENV_ACTIVE_POLL_MS: &str = "NOTIFIER_ACTIVE_POLL_MS";
pub const ENV_CANCELLED_POLL_MS: &str = "NOTIFIER_CANCELLED_POLL_MS";
pub const ENV_SOUND: &str = "NOTIFIER_SOUND";
pub const ENV_ORDERS_PATH: &str = "NOTIFIER_ORDERS_PATH";
pub const ENV_CANCELLED_PATH: &str = "NOTIFIER_CANCELLED_PATH";
pub const ENV_CANCEL_PATH: &str = "NOTIFIER_CANCEL_PATH";

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_ACTIVE_POLL_MS: u64 = 3_000;
const DEFAULT_CANCELLED_POLL_MS: u64 = 5_000;
/// Faster than this just hammers the order service.
const MIN_POLL_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundMode {
    Bell,
    Off,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub room_number: String,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub active_poll_interval: Duration,
    pub cancelled_poll_interval: Duration,
    pub sound: SoundMode,
    pub paths: FeedPaths,
    /// `(variable, value used)` for every setting that fell back to its default.
    pub applied_defaults: Vec<(&'static str, String)>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut applied_defaults = Vec::new();
        let mut or_default = |key: &'static str, default: String| match var(key) {
            Some(value) => value,
            None => {
                applied_defaults.push((key, default.clone()));
                default
            }
        };

        let room_number = var(ENV_ROOM).ok_or(ConfigError::Missing(ENV_ROOM))?;

        let api_url = or_default(ENV_API_URL, DEFAULT_API_URL.to_string());
        let data_dir = PathBuf::from(or_default(
            ENV_DATA_DIR,
            diagnostics::default_data_dir().display().to_string(),
        ));
        let log_dir = PathBuf::from(or_default(
            ENV_LOG_DIR,
            data_dir.join("logs").display().to_string(),
        ));
        let active_poll_interval = parse_interval(
            ENV_ACTIVE_POLL_MS,
            &or_default(ENV_ACTIVE_POLL_MS, DEFAULT_ACTIVE_POLL_MS.to_string()),
        )?;
        let cancelled_poll_interval = parse_interval(
            ENV_CANCELLED_POLL_MS,
            &or_default(ENV_CANCELLED_POLL_MS, DEFAULT_CANCELLED_POLL_MS.to_string()),
        )?;

        let sound = match or_default(ENV_SOUND, "bell".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "bell" | "on" => SoundMode::Bell,
            "off" | "none" => SoundMode::Off,
            other => {
                return Err(ConfigError::Invalid {
                    key: ENV_SOUND,
                    value: other.to_string(),
                    reason: "expected bell or off".to_string(),
                })
            }
        };

        let defaults = FeedPaths::default();
        let paths = FeedPaths {
            orders: or_default(ENV_ORDERS_PATH, defaults.orders),
            cancelled: or_default(ENV_CANCELLED_PATH, defaults.cancelled),
            cancel: or_default(ENV_CANCEL_PATH, defaults.cancel),
        };

        Ok(Self {
            api_url,
            room_number,
            data_dir,
            log_dir,
            active_poll_interval,
            cancelled_poll_interval,
            sound,
            paths,
            applied_defaults,
        })
    }

    /// Log each default that was applied. Call after logging is initialised.
    pub fn log_applied_defaults(&self) {
        for (key, value) in &self.applied_defaults {
            info!("{key} not set, using default: {value}");
        }
    }
}

fn parse_interval(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if ms < MIN_POLL_MS {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: format!("must be at least {MIN_POLL_MS} ms"),
        });
    }
    Ok(Duration::from_millis(ms))
}
