//! Configuration management for Kitsunari
//!
//! Handles config file loading/saving and the playback preferences derived
//! from it. Config is stored at ~/.config/kitsunari/config.toml. Every field
//! is optional; accessors supply the defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Language;
use crate::playback::PlaybackSettings;
use crate::stream::PlayerConfig;

pub const DEFAULT_QUALITY: u32 = 1080;
pub const DEFAULT_PLAYER: &str = "mpv";
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Keys accepted by `config set`
pub const KEYS: &[&str] = &[
    "quality",
    "language",
    "player_path",
    "mpv_args",
    "fullscreen",
    "progress_interval_secs",
    "history_limit",
];

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Preferred vertical resolution (e.g. 1080, 720)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Sub or dub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    /// Player command, e.g. `mpv` or `flatpak run io.mpv.Mpv`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_path: Option<String>,
    /// Extra flags passed to the player
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpv_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullscreen: Option<bool>,
    /// Seconds between progress saves while playing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_interval_secs: Option<u64>,
    /// Entries shown by `continue`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

impl Config {
    /// Get config file path (~/.config/kitsunari/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kitsunari").join("config.toml"))
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    /// Load config from `path`; missing or invalid files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
            Self::default()
        })
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    pub fn quality(&self) -> u32 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    pub fn language(&self) -> Language {
        self.language.unwrap_or_default()
    }

    pub fn player_path(&self) -> &str {
        self.player_path.as_deref().unwrap_or(DEFAULT_PLAYER)
    }

    pub fn mpv_args(&self) -> &[String] {
        self.mpv_args.as_deref().unwrap_or(&[])
    }

    pub fn fullscreen(&self) -> bool {
        self.fullscreen.unwrap_or(true)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(
            self.progress_interval_secs
                .unwrap_or(DEFAULT_PROGRESS_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    /// Player launch settings derived from this config
    pub fn player_config(&self) -> PlayerConfig {
        let mut player = PlayerConfig::from_command_line(self.player_path());
        player.fullscreen = self.fullscreen();
        player.extra_args = self.mpv_args().to_vec();
        player
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            language: self.language(),
            progress_interval: self.progress_interval(),
        }
    }

    /// Set one key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "quality" => {
                let quality = value.trim_end_matches('p');
                self.quality = Some(
                    quality
                        .parse()
                        .with_context(|| format!("Invalid quality '{}'", value))?,
                );
            }
            "language" => {
                self.language = Some(value.parse().map_err(anyhow::Error::msg)?);
            }
            "player_path" => {
                if value.is_empty() {
                    bail!("player_path cannot be empty");
                }
                self.player_path = Some(value.to_string());
            }
            "mpv_args" => {
                self.mpv_args = Some(value.split_whitespace().map(str::to_string).collect());
            }
            "fullscreen" => {
                self.fullscreen = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid boolean '{}'", value))?,
                );
            }
            "progress_interval_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid interval '{}'", value))?;
                if secs == 0 {
                    bail!("progress_interval_secs must be at least 1");
                }
                self.progress_interval_secs = Some(secs);
            }
            "history_limit" => {
                self.history_limit = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid limit '{}'", value))?,
                );
            }
            other => bail!("Unknown config key '{}' (expected one of: {})", other, KEYS.join(", ")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.quality(), 1080);
        assert_eq!(config.language(), Language::Sub);
        assert_eq!(config.player_path(), "mpv");
        assert!(config.mpv_args().is_empty());
        assert!(config.fullscreen());
        assert_eq!(config.progress_interval(), Duration::from_secs(10));
        assert_eq!(config.history_limit(), 10);
    }

    #[test]
    fn test_set_values() {
        let mut config = Config::default();
        config.set("quality", "720p").unwrap();
        config.set("language", "dub").unwrap();
        config.set("mpv_args", "--volume=50 --mute=no").unwrap();
        config.set("fullscreen", "false").unwrap();

        assert_eq!(config.quality(), 720);
        assert_eq!(config.language(), Language::Dub);
        assert_eq!(config.mpv_args(), ["--volume=50", "--mute=no"]);
        assert!(!config.fullscreen());
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.set("quality", "high").is_err());
        assert!(config.set("progress_interval_secs", "0").is_err());
        assert!(config.set("device", "tv").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_player_config_from_settings() {
        let mut config = Config::default();
        config.set("player_path", "flatpak run io.mpv.Mpv").unwrap();
        config.set("fullscreen", "false").unwrap();

        let player = config.player_config();
        assert_eq!(player.binary, "flatpak");
        assert_eq!(player.launcher_args, vec!["run", "io.mpv.Mpv"]);
        assert!(!player.fullscreen);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.set("quality", "480").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "quality = \"lots\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
