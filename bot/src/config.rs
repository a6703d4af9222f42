//! Bot configuration: a TOML file plus environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use penny_sdk::{GatewayConfig, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file used when `PENNY_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "penny.toml";

/// Token file used when neither the config nor `PENNY_TOKEN_FILE` names one.
pub const DEFAULT_TOKEN_FILE: &str = "token.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No bot token: set PENNY_TOKEN or put it in {0}")]
    MissingToken(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub api_base: String,
    pub token_file: String,
    /// Guild the slash commands are registered in at start-up.
    pub registration_guild: Option<String>,
    pub gateway: GatewayConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_file: DEFAULT_TOKEN_FILE.to_string(),
            registration_guild: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load from `path`, writing a default config there when the file is
    /// missing or cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file not found, creating default at {:?}", path);
            return Self::create_default_and_save(path);
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Config file cannot be parsed and will be recreated with defaults, error: {}",
                    e
                );
                Self::create_default_and_save(path)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn create_default_and_save(path: &Path) -> Result<Self, ConfigError> {
        let default_config = Self::default();
        default_config.save(path)?;
        Ok(default_config)
    }

    /// Token file from `PENNY_TOKEN_FILE`, or the configured one.
    pub fn token_path(&self) -> PathBuf {
        env::var("PENNY_TOKEN_FILE")
            .map_or_else(|_| PathBuf::from(&self.token_file), PathBuf::from)
    }
}

/// Config file path from `PENNY_CONFIG` or the default.
#[must_use]
pub fn config_path() -> PathBuf {
    env::var("PENNY_CONFIG").map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Bot token from `PENNY_TOKEN`, falling back to the first line of the token file.
pub fn read_token(config: &BotConfig) -> Result<String, ConfigError> {
    if let Ok(token) = env::var("PENNY_TOKEN") {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let path = config.token_path();
    token_from_file(&path)
}

fn token_from_file(path: &Path) -> Result<String, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    contents
        .lines()
        .next()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingToken(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("penny-{}-{}", std::process::id(), name))
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = scratch_path("created.toml");
        let _ = fs::remove_file(&path);

        let config = BotConfig::load(&path).expect("load");
        assert!(path.exists());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(config.gateway.command("summon").is_some());

        let reloaded = BotConfig::load(&path).expect("reload");
        assert_eq!(reloaded.gateway.commands, config.gateway.commands);
        fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let path = scratch_path("partial.toml");
        fs::write(
            &path,
            "registration_guild = \"727908432753066190\"\n\n[gateway.summon_target]\nguild_id = \"1\"\nchannel_id = \"2\"\n",
        )
        .expect("write");

        let config = BotConfig::load(&path).expect("load");
        assert_eq!(config.registration_guild.as_deref(), Some("727908432753066190"));
        assert_eq!(config.gateway.summon_target.expect("target").channel_id, "2");
        assert_eq!(config.gateway.intents, penny_sdk::config::DEFAULT_INTENTS);
        fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn token_is_first_trimmed_line() {
        let path = scratch_path("token.txt");
        fs::write(&path, "  abc.def  \nignored\n").expect("write");

        assert_eq!(token_from_file(&path).expect("token"), "abc.def");
        fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn empty_token_file_is_an_error() {
        let path = scratch_path("empty-token.txt");
        fs::write(&path, "\n").expect("write");

        assert!(matches!(token_from_file(&path), Err(ConfigError::MissingToken(_))));
        fs::remove_file(&path).expect("cleanup");
    }
}
