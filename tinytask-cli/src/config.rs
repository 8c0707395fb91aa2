//! Configuration loading from tinytask.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tinytask::{FailsafeZone, KeySymbol, PlayerConfig, RecorderConfig, SessionConfig, DEFAULT_FILE};

/// Config file looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "tinytask.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// File used by `record`, `play`, `load` and `save` when none is named.
    #[serde(default = "default_file")]
    pub default_file: PathBuf,

    #[serde(default)]
    pub recorder: RecorderSection,

    #[serde(default)]
    pub player: PlayerSection,
}

#[derive(Debug, Deserialize)]
pub struct RecorderSection {
    /// Pointer moves closer than this to the previous move are coalesced.
    #[serde(default = "default_move_threshold")]
    pub move_threshold: i32,

    /// Key whose release ends a recording; "none" disables it.
    #[serde(default = "default_record_stop_key")]
    pub stop_key: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayerSection {
    /// Key whose release interrupts playback; "none" disables it.
    #[serde(default = "default_play_stop_key")]
    pub stop_key: String,

    #[serde(default = "default_failsafe")]
    pub failsafe: bool,

    #[serde(default)]
    pub failsafe_x: i32,

    #[serde(default)]
    pub failsafe_y: i32,

    #[serde(default)]
    pub failsafe_tolerance: i32,
}

fn default_file() -> PathBuf {
    PathBuf::from(DEFAULT_FILE)
}

fn default_move_threshold() -> i32 {
    RecorderConfig::default().move_threshold
}

fn default_record_stop_key() -> String {
    "escape".to_string()
}

fn default_play_stop_key() -> String {
    "f9".to_string()
}

fn default_failsafe() -> bool {
    true
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            move_threshold: default_move_threshold(),
            stop_key: default_record_stop_key(),
        }
    }
}

impl Default for PlayerSection {
    fn default() -> Self {
        Self {
            stop_key: default_play_stop_key(),
            failsafe: default_failsafe(),
            failsafe_x: 0,
            failsafe_y: 0,
            failsafe_tolerance: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_file: default_file(),
            recorder: RecorderSection::default(),
            player: PlayerSection::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `explicit` if given, else `tinytask.toml` if it exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build the engine configuration.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.recorder.move_threshold < 0 {
            return Err(ConfigError::Invalid(format!(
                "recorder.move_threshold must not be negative (got {})",
                self.recorder.move_threshold
            )));
        }
        if self.player.failsafe_tolerance < 0 {
            return Err(ConfigError::Invalid(format!(
                "player.failsafe_tolerance must not be negative (got {})",
                self.player.failsafe_tolerance
            )));
        }

        let failsafe = self.player.failsafe.then_some(FailsafeZone {
            x: self.player.failsafe_x,
            y: self.player.failsafe_y,
            tolerance: self.player.failsafe_tolerance,
        });

        Ok(SessionConfig {
            recorder: RecorderConfig {
                move_threshold: self.recorder.move_threshold,
                stop_key: parse_key("recorder.stop_key", &self.recorder.stop_key)?,
            },
            player: PlayerConfig {
                failsafe,
                stop_key: parse_key("player.stop_key", &self.player.stop_key)?,
            },
        })
    }
}

fn parse_key(field: &str, value: &str) -> Result<Option<KeySymbol>, ConfigError> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
