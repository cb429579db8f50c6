//! Configuration for livewatch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "livewatch";

/// Main configuration.
///
/// Missing fields fall back to their defaults, so a config file only needs
/// the credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Twitch application client id
    pub twitch_client_id: String,

    /// Twitch application client secret
    pub twitch_secret: String,

    /// Discord bot token
    pub discord_token: String,

    /// Twitch game whose streams are tracked
    pub game_id: String,

    /// Time between two polls of the streaming service
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Report database location
    pub db_path: PathBuf,

    /// How many fetched batches may wait for the tracker
    pub channel_buffer: usize,

    /// Port for the local status server; disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            twitch_client_id: String::new(),
            twitch_secret: String::new(),
            discord_token: String::new(),
            game_id: "65360".to_string(),
            poll_interval: Duration::from_secs(30),
            db_path: Self::data_dir().join("livewatch.db"),
            channel_buffer: 16,
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults if there is
    /// no file yet.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from `path`. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;

        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Default directory for the report database.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Ensure the database directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Check that the values are usable for `livewatch run`.
    ///
    /// `require_discord` is false for dry runs, which never talk to Discord.
    pub fn validate(&self, require_discord: bool) -> Result<(), ConfigError> {
        if self.twitch_client_id.trim().is_empty() {
            return Err(ConfigError::Missing("twitch_client_id"));
        }
        if self.twitch_secret.trim().is_empty() {
            return Err(ConfigError::Missing("twitch_secret"));
        }
        if require_discord && self.discord_token.trim().is_empty() {
            return Err(ConfigError::Missing("discord_token"));
        }
        if self.game_id.trim().is_empty() {
            return Err(ConfigError::Missing("game_id"));
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                field: "poll_interval",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with secrets blanked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        };
        Self {
            twitch_secret: mask(&self.twitch_secret),
            discord_token: mask(&self.discord_token),
            ..self.clone()
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
