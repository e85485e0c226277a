//! Process-wide settings read from the environment

use crate::error::{ModerationError, ModerationResult};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SWEEP_BATCH: usize = 25;
pub const DEFAULT_NOTICE_TTL_SECS: u64 = 10;
pub const DEFAULT_CASE_RETRIES: u32 = 5;

/// Bot settings
#[derive(Clone)]
pub struct Settings {
    pub token: String,
    /// Directory holding policy and moderation snapshots
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    /// Maximum records a sweeper handles per tick
    pub sweep_batch: usize,
    /// How long automod warnings stay visible before self-deleting
    pub notice_ttl: Duration,
    /// Attempts before case allocation gives up
    pub case_retries: u32,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("token", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("sweep_interval", &self.sweep_interval)
            .field("sweep_batch", &self.sweep_batch)
            .field("notice_ttl", &self.notice_ttl)
            .field("case_retries", &self.case_retries)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: String::new(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_batch: DEFAULT_SWEEP_BATCH,
            notice_ttl: Duration::from_secs(DEFAULT_NOTICE_TTL_SECS),
            case_retries: DEFAULT_CASE_RETRIES,
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    ///
    /// # Errors
    /// Returns a validation error if `DISCORD_TOKEN` is missing or a numeric
    /// variable does not parse.
    pub fn from_env() -> ModerationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    ///
    /// # Errors
    /// See [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ModerationResult<Self> {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ModerationError::Validation("DISCORD_TOKEN must be set".to_string()))?;

        let defaults = Self::default();
        let data_dir = lookup("WARDEN_DATA_DIR").map_or(defaults.data_dir, PathBuf::from);
        let sweep_interval = parse_var(&lookup, "WARDEN_SWEEP_INTERVAL_SECS")?
            .map_or(defaults.sweep_interval, Duration::from_secs);
        let sweep_batch = parse_var(&lookup, "WARDEN_SWEEP_BATCH")?.unwrap_or(defaults.sweep_batch);
        let notice_ttl = parse_var(&lookup, "WARDEN_NOTICE_TTL_SECS")?
            .map_or(defaults.notice_ttl, Duration::from_secs);
        let case_retries =
            parse_var(&lookup, "WARDEN_CASE_RETRIES")?.unwrap_or(defaults.case_retries);

        if sweep_interval.is_zero() {
            return Err(ModerationError::Validation(
                "WARDEN_SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if sweep_batch == 0 || case_retries == 0 {
            return Err(ModerationError::Validation(
                "WARDEN_SWEEP_BATCH and WARDEN_CASE_RETRIES must be positive".to_string(),
            ));
        }

        Ok(Self {
            token,
            data_dir,
            sweep_interval,
            sweep_batch,
            notice_ttl,
            case_retries,
        })
    }

    #[must_use]
    pub fn policies_path(&self) -> PathBuf {
        self.data_dir.join("policies.yaml")
    }

    #[must_use]
    pub fn moderation_path(&self) -> PathBuf {
        self.data_dir.join("moderation.yaml")
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ModerationResult<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ModerationError::Validation(format!("{key} is not a valid number: {raw}")))
        })
        .transpose()
}
