//! Application context
//!
//! Everything a command needs: the loaded config (and where it lives), the
//! catalog provider, and the shared progress store. Built once per run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{AllAnimeClient, Provider};
use crate::config::Config;
use crate::history::{ProgressStore, SharedStore};
use crate::playback::PlaybackCoordinator;

pub struct App {
    pub config: Config,
    /// Where `config` is saved by `config set` / `config reset`
    pub config_path: Option<PathBuf>,
    pub provider: Arc<dyn Provider>,
    pub store: SharedStore,
}

impl App {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        provider: Arc<dyn Provider>,
        store: SharedStore,
    ) -> Self {
        Self {
            config,
            config_path,
            provider,
            store,
        }
    }

    /// Default wiring: config from `config_path` (or the standard location),
    /// the AllAnime catalog, and the progress file in the data directory
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.or_else(Config::path);
        let config = config_path
            .as_deref()
            .map(Config::load_from)
            .unwrap_or_default();

        let store_path =
            ProgressStore::default_path().context("Could not determine data directory")?;
        let store = ProgressStore::open_shared(store_path);

        Ok(Self::new(
            config,
            config_path,
            Arc::new(AllAnimeClient::new()),
            store,
        ))
    }

    /// A coordinator using this context's provider, store, and settings
    pub fn coordinator(&self) -> PlaybackCoordinator {
        PlaybackCoordinator::new(
            self.provider.clone(),
            self.store.clone(),
            self.config.player_config(),
            self.config.playback_settings(),
        )
    }

    pub fn save_config(&self) -> Result<()> {
        match &self.config_path {
            Some(path) => self.config.save_to(path),
            None => self.config.save(),
        }
    }
}
