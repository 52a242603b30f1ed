//! Config Loader.
//!
//! Parses the YAML config file into a typed, validated [`Config`], filling
//! in defaults for everything that doesn't require an explicit value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse config file {path} as YAML")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("couldn't write config file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("player.kara_folder must not be empty")]
    EmptyKaraFolder,
}

fn default_fullscreen() -> bool {
    false
}

fn default_transition_duration() -> u64 {
    2
}

fn default_rewind_fast_forward_duration() -> u64 {
    10
}

fn default_transition_background_name() -> String {
    "transition.png".to_string()
}

fn default_idle_background_name() -> String {
    "idle.png".to_string()
}

fn default_transition_template_name() -> String {
    "transition.ass".to_string()
}

fn default_idle_template_name() -> String {
    "idle.ass".to_string()
}

fn default_reconnect_interval() -> u64 {
    10
}

fn default_loglevel() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Critical => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Durations {
    #[serde(default = "default_transition_duration")]
    pub transition_duration: u64,
    #[serde(default = "default_rewind_fast_forward_duration")]
    pub rewind_fast_forward_duration: u64,
}

impl Default for Durations {
    fn default() -> Self {
        Self {
            transition_duration: default_transition_duration(),
            rewind_fast_forward_duration: default_rewind_fast_forward_duration(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Backgrounds {
    pub directory: Option<PathBuf>,
    #[serde(default = "default_transition_background_name")]
    pub transition_background_name: String,
    #[serde(default = "default_idle_background_name")]
    pub idle_background_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Templates {
    pub directory: Option<PathBuf>,
    #[serde(default = "default_transition_template_name")]
    pub transition_template_name: String,
    #[serde(default = "default_idle_template_name")]
    pub idle_template_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub kara_folder: PathBuf,
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
    #[serde(default)]
    pub durations: Durations,
    #[serde(default)]
    pub backgrounds: Backgrounds,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub engine: EngineChoice,
    #[serde(default)]
    pub vlc: VlcConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    #[default]
    Vlc,
    Mpv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VlcConfig {
    #[serde(default)]
    pub instance_parameters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default)]
    pub options: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    #[serde(default)]
    pub ssl: bool,
    pub login: String,
    pub password: String,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub player: PlayerConfig,
    pub server: ServerConfig,
    #[serde(default = "default_loglevel")]
    pub loglevel: LogLevel,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.player.kara_folder.as_os_str().is_empty() {
            return Err(ConfigError::EmptyKaraFolder);
        }
        Ok(())
    }

    /// Scaffolds a commented example config, for `--create-config`.
    pub async fn write_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = r#"# dakara-player configuration

player:
  # Root directory containing the playable media files. Required.
  kara_folder: /path/to/kara/folder

  # Open the video window in fullscreen.
  fullscreen: false

  durations:
    transition_duration: 2
    rewind_fast_forward_duration: 10

  backgrounds:
    # directory: /path/to/custom/backgrounds
    transition_background_name: transition.png
    idle_background_name: idle.png

  templates:
    # directory: /path/to/custom/templates
    transition_template_name: transition.ass
    idle_template_name: idle.ass

  # engine: vlc  # or mpv

  vlc:
    instance_parameters: []

  mpv:
    options: {}

server:
  address: localhost:8000
  ssl: false
  login: user
  password: pass
  reconnect_interval: 10

loglevel: info
"#;

        tokio::fs::write(path, contents)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn http_base_url(&self) -> String {
        let scheme = if self.server.ssl { "https" } else { "http" };
        format!("{scheme}://{}/api/", self.server.address)
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.server.ssl { "wss" } else { "ws" };
        format!("{scheme}://{}/ws/playlist/device/", self.server.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_kara_folder() {
        let config = Config {
            player: PlayerConfig {
                kara_folder: PathBuf::new(),
                ..Default::default()
            },
            server: ServerConfig::default(),
            loglevel: LogLevel::Info,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyKaraFolder)
        ));
    }

    #[test]
    fn urls_follow_ssl_flag() {
        let mut config = Config {
            player: PlayerConfig {
                kara_folder: PathBuf::from("/kara"),
                ..Default::default()
            },
            server: ServerConfig {
                address: "example.com".into(),
                ssl: false,
                login: "a".into(),
                password: "b".into(),
                reconnect_interval: 10,
            },
            loglevel: LogLevel::Info,
        };
        assert_eq!(config.http_base_url(), "http://example.com/api/");
        assert_eq!(config.ws_url(), "ws://example.com/ws/playlist/device/");

        config.server.ssl = true;
        assert_eq!(config.http_base_url(), "https://example.com/api/");
        assert_eq!(config.ws_url(), "wss://example.com/ws/playlist/device/");
    }

    #[test]
    fn parses_minimal_yaml_with_defaults() {
        let yaml = r#"
player:
  kara_folder: /kara
server:
  address: localhost:8000
  login: u
  password: p
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.player.durations.transition_duration, 2);
        assert_eq!(config.server.reconnect_interval, 10);
        assert_eq!(config.loglevel, LogLevel::Info);
        assert_eq!(config.player.engine, EngineChoice::Vlc);
    }
}
