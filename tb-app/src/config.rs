//! tunebridge configuration loader.

use cron::Schedule;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct TunebridgeConfig {
    pub discord: DiscordConfig,
    pub playlist: PlaylistConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Channel watched for video references.
    pub channel: String,
    /// User to DM when a submission fails hard.
    #[serde(default)]
    pub technician: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistConfig {
    pub id: String,
    #[serde(default)]
    pub access_token: String,
    /// Videos strictly longer than this are kept out of the playlist.
    #[serde(default)]
    pub max_duration_seconds: Option<u64>,
    #[serde(default)]
    pub policy: PolicyMode,
}

/// What happens to a video the duration policy rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// The refusal reply carries an "add anyway" button.
    #[default]
    Override,
    /// Refused outright, no recourse in chat.
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Cron expression, evaluated in UTC, for the daily quota reset.
    #[serde(default = "default_reset_schedule")]
    pub reset_schedule: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            reset_schedule: default_reset_schedule(),
        }
    }
}

impl QuotaConfig {
    pub fn schedule(&self) -> anyhow::Result<Schedule> {
        Schedule::from_str(&self.reset_schedule)
            .map_err(|e| anyhow::anyhow!("quota.reset_schedule {:?}: {e}", self.reset_schedule))
    }
}

fn default_reset_schedule() -> String {
    tb_engine::DEFAULT_RESET_SCHEDULE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_cursor_path")]
    pub cursor_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            cursor_path: default_cursor_path(),
        }
    }
}

impl TunebridgeConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: TunebridgeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TUNEBRIDGE_DISCORD_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.discord.bot_token = v;
            }
        }
        if let Ok(v) = std::env::var("TUNEBRIDGE_PLAYLIST_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.playlist.access_token = v;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("discord.bot_token is required"));
        }
        if self.discord.channel.trim().is_empty() {
            return Err(anyhow::anyhow!("discord.channel is required"));
        }
        if self.playlist.id.trim().is_empty() {
            return Err(anyhow::anyhow!("playlist.id is required"));
        }
        if self.playlist.access_token.trim().is_empty() {
            return Err(anyhow::anyhow!("playlist.access_token is required"));
        }
        self.quota.schedule().map(|_| ())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".tunebridge").join("config.toml")
}

pub fn default_cursor_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join(".tunebridge")
        .join("data")
        .join("last-message-id")
}
