//! Playback coordinator
//!
//! Wires the provider, stream selector, player session, progress tracker and
//! progress store together. At most one playback is active: starting another
//! tears the current one down and waits for its final progress write first.
//!
//! Per playback a finalizer task waits for the session to exit, stops the
//! tracker, then writes progress exactly once from the last known position.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::TitleCache;
use crate::api::Provider;
use crate::history::{lock_store, SharedStore};
use crate::models::{Episode, Language, ProgressRecord, Title};
use crate::stream::{
    choose, ExitReason, LaunchRequest, PlayerConfig, PlayerError, PlayerSession, ProgressTick,
    ProgressTracker,
};

/// Errors reported to the caller of playback operations
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("No streams available for {title} episode {episode}")]
    NoStreamsAvailable { title: String, episode: Episode },
    #[error("Failed to launch player: {0}")]
    PlayerLaunchFailed(#[source] PlayerError),
    #[error("No watch history for '{0}'")]
    NoHistoryFound(String),
    #[error("Could not find title '{0}' on the provider")]
    TitleUnresolvable(String),
}

/// Playback preferences
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub language: Language,
    /// How often progress is polled and saved while playing
    pub progress_interval: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            language: Language::Sub,
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// What is currently playing
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub session_id: Uuid,
    pub title_id: String,
    pub title_name: String,
    pub episode: Episode,
    pub url: String,
    pub resolution: u32,
    pub start_seconds: u64,
}

struct ActivePlayback {
    session: Arc<PlayerSession>,
    finalizer: JoinHandle<ExitReason>,
    now_playing: NowPlaying,
}

pub struct PlaybackCoordinator {
    provider: Arc<dyn Provider>,
    store: SharedStore,
    player: PlayerConfig,
    settings: PlaybackSettings,
    cache: TitleCache,
    active: Option<ActivePlayback>,
}

impl PlaybackCoordinator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: SharedStore,
        player: PlayerConfig,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            provider,
            store,
            player,
            settings,
            cache: TitleCache::default(),
            active: None,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Search the provider; results are cached for later resolution
    pub async fn search(&mut self, query: &str) -> Vec<Title> {
        let titles = self.provider.search(query).await;
        debug!(query = %query, results = titles.len(), "search finished");
        self.cache.extend(titles.iter().cloned());
        titles
    }

    /// Episode list for a title in the configured language
    pub async fn episodes(&mut self, title: &Title) -> Vec<Episode> {
        let language = self.settings.language;
        if let Some(cached) = self.cache.episodes(&title.id, language) {
            return cached.to_vec();
        }

        let episodes = self.provider.episodes(title, language).await;
        self.cache.insert(title.clone());
        if !episodes.is_empty() {
            self.cache.set_episodes(&title.id, language, episodes.clone());
        }
        episodes
    }

    /// Find a title by id: cache, then direct lookup, then a search by the
    /// name recorded in watch history filtered to the same id
    pub async fn resolve_title(&mut self, title_id: &str) -> Option<Title> {
        if let Some(title) = self.cache.get(title_id) {
            return Some(title.clone());
        }

        if let Some(title) = self.provider.title(title_id).await {
            self.cache.insert(title.clone());
            return Some(title);
        }

        let name = lock_store(&self.store)
            .get(title_id)
            .map(|r| r.title_name.clone())?;
        let found = self
            .search(&name)
            .await
            .into_iter()
            .find(|t| t.id == title_id);
        if found.is_none() {
            debug!(title = %title_id, name = %name, "title not found by name search");
        }
        found
    }

    // =========================================================================
    // Playback
    // =========================================================================

    /// Play an episode from the beginning
    pub async fn play(
        &mut self,
        title: &Title,
        episode: Episode,
        quality: u32,
    ) -> Result<NowPlaying, PlaybackError> {
        self.play_from(title, episode, quality, 0).await
    }

    /// Play an episode starting at `start_seconds`
    pub async fn play_from(
        &mut self,
        title: &Title,
        episode: Episode,
        quality: u32,
        start_seconds: u64,
    ) -> Result<NowPlaying, PlaybackError> {
        self.stop().await;
        self.cache.insert(title.clone());

        let streams = self
            .provider
            .streams(title, episode, self.settings.language, quality)
            .await;
        let stream = choose(&streams, quality)
            .map_err(|_| {
                warn!(title = %title.id, episode = %episode, "no streams available");
                PlaybackError::NoStreamsAvailable {
                    title: title.name.clone(),
                    episode,
                }
            })?
            .clone();
        info!(
            title = %title.id,
            episode = %episode,
            resolution = stream.resolution,
            target = quality,
            offered = streams.len(),
            "selected stream"
        );

        let mut request = LaunchRequest::new(stream.url.clone()).starting_at(start_seconds);
        request.referrer = stream.referrer.clone();
        request.media_title = Some(format!("{} - Episode {}", title.name, episode));

        let session = PlayerSession::launch(&self.player, request)
            .await
            .map_err(PlaybackError::PlayerLaunchFailed)?;
        let session = Arc::new(session);

        let tracker = {
            let store = self.store.clone();
            let title_id = title.id.clone();
            let title_name = title.name.clone();
            ProgressTracker::start(
                session.clone(),
                self.settings.progress_interval,
                move |tick| {
                    lock_store(&store).update(
                        &title_id,
                        &title_name,
                        episode,
                        tick.position_seconds,
                        tick.duration_seconds,
                    );
                },
            )
        };

        let finalizer = tokio::spawn(finalize(
            session.clone(),
            tracker,
            self.store.clone(),
            title.clone(),
            episode,
        ));

        let now_playing = NowPlaying {
            session_id: session.id(),
            title_id: title.id.clone(),
            title_name: title.name.clone(),
            episode,
            url: stream.url,
            resolution: stream.resolution,
            start_seconds,
        };
        self.active = Some(ActivePlayback {
            session,
            finalizer,
            now_playing: now_playing.clone(),
        });
        Ok(now_playing)
    }

    /// Continue a title from its saved episode and position
    pub async fn resume(
        &mut self,
        title_id: &str,
        quality: u32,
    ) -> Result<NowPlaying, PlaybackError> {
        let record = lock_store(&self.store)
            .get(title_id)
            .cloned()
            .ok_or_else(|| PlaybackError::NoHistoryFound(title_id.to_string()))?;

        let title = self
            .resolve_title(title_id)
            .await
            .ok_or_else(|| PlaybackError::TitleUnresolvable(record.title_name.clone()))?;

        info!(
            title = %title_id,
            episode = %record.episode,
            position = record.position_seconds,
            "resuming"
        );
        self.play_from(&title, record.episode, quality, record.position_seconds)
            .await
    }

    /// Stop the current playback (if any) and wait for its final progress write
    pub async fn stop(&mut self) -> Option<ExitReason> {
        let active = self.active.take()?;
        active.session.terminate().await;
        join_finalizer(active.finalizer).await
    }

    /// Wait for the current playback to end on its own
    pub async fn wait(&mut self) -> Option<ExitReason> {
        let session = self.current_session()?;
        session.exited().await;
        let active = self.active.take()?;
        join_finalizer(active.finalizer).await
    }

    /// Handle to the running session, e.g. to await its exit
    pub fn current_session(&self) -> Option<Arc<PlayerSession>> {
        self.active.as_ref().map(|a| a.session.clone())
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.active.as_ref().map(|a| &a.now_playing)
    }

    pub fn is_playing(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.session.is_running())
    }

    // =========================================================================
    // History
    // =========================================================================

    pub fn continue_watching(&self, limit: usize) -> Vec<ProgressRecord> {
        lock_store(&self.store).continue_watching(limit)
    }

    /// Every record, most recently watched first
    pub fn history(&self) -> Vec<ProgressRecord> {
        let mut records: Vec<ProgressRecord> = lock_store(&self.store).records().cloned().collect();
        records.sort_by(|a, b| b.last_watched.cmp(&a.last_watched));
        records
    }

    pub fn forget(&mut self, title_id: &str) -> bool {
        lock_store(&self.store).remove(title_id)
    }
}

async fn join_finalizer(finalizer: JoinHandle<ExitReason>) -> Option<ExitReason> {
    match finalizer.await {
        Ok(reason) => Some(reason),
        Err(e) => {
            warn!(error = %e, "playback finalizer did not complete");
            None
        }
    }
}

/// Runs once per playback: waits for exit, then saves the final position
async fn finalize(
    session: Arc<PlayerSession>,
    tracker: ProgressTracker,
    store: SharedStore,
    title: Title,
    episode: Episode,
) -> ExitReason {
    let reason = session.exited().await;
    // No tick may land after the final write
    tracker.stop().await;

    let tick = ProgressTick::final_for(&session);
    let record = lock_store(&store).update(
        &title.id,
        &title.name,
        episode,
        tick.position_seconds,
        tick.duration_seconds,
    );
    info!(
        title = %title.id,
        episode = %episode,
        position = record.position_seconds,
        percent = record.percent_complete,
        estimated = tick.estimated,
        ?reason,
        "playback ended"
    );

    session.terminate().await;
    reason
}
