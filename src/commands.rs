//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the playback coordinator and the
//! progress store. Each handler takes CLI args, the app context, and Output,
//! and returns an ExitCode.

use serde::Serialize;
use tracing::error;

use crate::app::App;
use crate::cli::{
    ConfigAction, ConfigCmd, ContinueCmd, EpisodesCmd, ExitCode, ForgetCmd, HistoryCmd, Output,
    PlayCmd, ResumeCmd, SearchCmd, StreamsCmd,
};
use crate::config::Config;
use crate::history::lock_store;
use crate::models::{Episode, ProgressRecord, StreamDescriptor, Title};
use crate::playback::{NowPlaying, PlaybackCoordinator, PlaybackError};
use crate::stream::{choose, ExitReason};

// =============================================================================
// Search Command
// =============================================================================

pub async fn search_cmd(cmd: SearchCmd, app: &App, output: &Output) -> ExitCode {
    output.info(format!("Searching for: {}", cmd.query));

    let mut results = app.provider.search(&cmd.query).await;
    if results.is_empty() {
        return output.error(
            format!("No results for '{}'", cmd.query),
            ExitCode::NotFound,
        );
    }
    results.truncate(cmd.limit);

    let lines: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{:>2}. {}  [{}]", i + 1, t, t.id))
        .collect();
    print_or_fail(output, &results, &lines)
}

// =============================================================================
// Episodes Command
// =============================================================================

pub async fn episodes_cmd(cmd: EpisodesCmd, app: &App, output: &Output) -> ExitCode {
    let mut coordinator = app.coordinator();
    let Some(title) = coordinator.resolve_title(&cmd.title_id).await else {
        return output.error(
            format!("Title '{}' not found", cmd.title_id),
            ExitCode::NotFound,
        );
    };

    let episodes = coordinator.episodes(&title).await;
    if episodes.is_empty() {
        return output.error(
            format!("No {} episodes for {}", app.config.language(), title.name),
            ExitCode::NotFound,
        );
    }

    #[derive(Serialize)]
    struct EpisodeList<'a> {
        title: &'a Title,
        episodes: &'a [Episode],
    }

    let joined = episodes
        .iter()
        .map(Episode::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let lines = vec![
        format!("{} ({} episodes)", title.name, episodes.len()),
        joined,
    ];
    print_or_fail(
        output,
        EpisodeList {
            title: &title,
            episodes: &episodes,
        },
        &lines,
    )
}

// =============================================================================
// Streams Command
// =============================================================================

pub async fn streams_cmd(cmd: StreamsCmd, app: &App, output: &Output) -> ExitCode {
    let mut coordinator = app.coordinator();
    let Some(title) = coordinator.resolve_title(&cmd.title_id).await else {
        return output.error(
            format!("Title '{}' not found", cmd.title_id),
            ExitCode::NotFound,
        );
    };

    let quality = app.config.quality();
    output.info(format!("Finding streams for {} episode {}", title.name, cmd.episode));
    let streams = app
        .provider
        .streams(&title, cmd.episode, app.config.language(), quality)
        .await;

    let Ok(selected) = choose(&streams, quality) else {
        return output.error("No streams found", ExitCode::NoStreams);
    };

    #[derive(Serialize)]
    struct StreamList<'a> {
        selected: &'a StreamDescriptor,
        streams: &'a [StreamDescriptor],
    }

    let lines: Vec<String> = streams
        .iter()
        .map(|s| {
            let marker = if std::ptr::eq(s, selected) { "*" } else { " " };
            format!("{} {}", marker, s)
        })
        .collect();
    print_or_fail(
        output,
        StreamList {
            selected,
            streams: &streams,
        },
        &lines,
    )
}

// =============================================================================
// Playback Commands
// =============================================================================

/// Outcome of a finished playback
#[derive(Debug, Serialize)]
struct PlaybackSummary {
    now_playing: NowPlaying,
    exit: Option<String>,
    progress: Option<ProgressRecord>,
}

pub async fn play_cmd(cmd: PlayCmd, app: &App, output: &Output) -> ExitCode {
    let mut coordinator = app.coordinator();
    let Some(title) = coordinator.resolve_title(&cmd.title_id).await else {
        return output.error(
            format!("Title '{}' not found", cmd.title_id),
            ExitCode::NotFound,
        );
    };

    if let Err(code) = ensure_player(app, output).await {
        return code;
    }

    let quality = cmd.quality.unwrap_or_else(|| app.config.quality());
    let start = cmd.start.unwrap_or(0);
    output.info(format!("Loading {} episode {}...", title.name, cmd.episode));

    match coordinator
        .play_from(&title, cmd.episode, quality, start)
        .await
    {
        Ok(now_playing) => watch(&mut coordinator, now_playing, output).await,
        Err(e) => playback_error(e, output),
    }
}

pub async fn resume_cmd(cmd: ResumeCmd, app: &App, output: &Output) -> ExitCode {
    if lock_store(&app.store).get(&cmd.title_id).is_none() {
        return output.error(
            format!("No watch history for '{}'", cmd.title_id),
            ExitCode::NotFound,
        );
    }
    if let Err(code) = ensure_player(app, output).await {
        return code;
    }

    let mut coordinator = app.coordinator();
    let quality = cmd.quality.unwrap_or_else(|| app.config.quality());

    match coordinator.resume(&cmd.title_id, quality).await {
        Ok(now_playing) => watch(&mut coordinator, now_playing, output).await,
        Err(e) => playback_error(e, output),
    }
}

/// Block until the player exits or Ctrl-C, then report the saved progress
async fn watch(
    coordinator: &mut PlaybackCoordinator,
    now_playing: NowPlaying,
    output: &Output,
) -> ExitCode {
    output.info(format!(
        "Playing {} episode {} ({}p){}",
        now_playing.title_name,
        now_playing.episode,
        now_playing.resolution,
        if now_playing.start_seconds > 0 {
            format!(" from {}", crate::models::format_seconds(now_playing.start_seconds))
        } else {
            String::new()
        }
    ));

    let exit = match coordinator.current_session() {
        Some(session) => {
            tokio::select! {
                _ = session.exited() => coordinator.wait().await,
                _ = tokio::signal::ctrl_c() => {
                    output.info("Stopping player...");
                    coordinator.stop().await
                }
            }
        }
        None => coordinator.stop().await,
    };

    let progress = lock_store(coordinator.store())
        .get(&now_playing.title_id)
        .cloned();

    let mut lines = vec![format!(
        "Playback ended: {}",
        exit.map(|r| r.to_string()).unwrap_or_else(|| "unknown".into())
    )];
    if let Some(record) = &progress {
        lines.push(format!("Saved: {}", record));
    }

    print_or_fail(
        output,
        PlaybackSummary {
            now_playing,
            exit: exit.as_ref().map(ExitReason::to_string),
            progress,
        },
        &lines,
    )
}

/// Fail early when the configured player binary is missing
async fn ensure_player(app: &App, output: &Output) -> Result<(), ExitCode> {
    let player = app.config.player_config();
    if player.is_available().await {
        return Ok(());
    }
    Err(output.error(
        format!(
            "{} not found. Install it or set player_path with `kitsunari config set`",
            player.display_name()
        ),
        ExitCode::PlayerFailed,
    ))
}

fn playback_error(e: PlaybackError, output: &Output) -> ExitCode {
    if let PlaybackError::PlayerLaunchFailed(source) = &e {
        error!(error = %source, "player launch failed");
    }
    let code = match &e {
        PlaybackError::NoStreamsAvailable { .. } => ExitCode::NoStreams,
        PlaybackError::PlayerLaunchFailed(_) => ExitCode::PlayerFailed,
        PlaybackError::NoHistoryFound(_) | PlaybackError::TitleUnresolvable(_) => {
            ExitCode::NotFound
        }
    };
    output.error(e.to_string(), code)
}

// =============================================================================
// History Commands
// =============================================================================

pub async fn continue_cmd(cmd: ContinueCmd, app: &App, output: &Output) -> ExitCode {
    let limit = cmd.limit.unwrap_or_else(|| app.config.history_limit());
    let records = lock_store(&app.store).continue_watching(limit);

    let lines = if records.is_empty() {
        vec!["Nothing to continue. Play something first.".to_string()]
    } else {
        records
            .iter()
            .map(|r| format!("{}  [{}]", r, r.title_id))
            .collect()
    };
    print_or_fail(output, &records, &lines)
}

pub async fn history_cmd(_cmd: HistoryCmd, app: &App, output: &Output) -> ExitCode {
    let records = app.coordinator().history();

    let lines = if records.is_empty() {
        vec!["No watch history".to_string()]
    } else {
        records
            .iter()
            .map(|r| {
                format!(
                    "{}  [{}]  {}",
                    r,
                    r.title_id,
                    r.last_watched.format("%Y-%m-%d %H:%M")
                )
            })
            .collect()
    };
    print_or_fail(output, &records, &lines)
}

pub async fn forget_cmd(cmd: ForgetCmd, app: &App, output: &Output) -> ExitCode {
    if !lock_store(&app.store).remove(&cmd.title_id) {
        return output.error(
            format!("No watch history for '{}'", cmd.title_id),
            ExitCode::NotFound,
        );
    }

    #[derive(Serialize)]
    struct Forgotten<'a> {
        title_id: &'a str,
    }
    print_or_fail(
        output,
        Forgotten {
            title_id: &cmd.title_id,
        },
        &[format!("Forgot {}", cmd.title_id)],
    )
}

// =============================================================================
// Config Command
// =============================================================================

/// Settings with defaults applied
#[derive(Debug, Serialize)]
struct EffectiveConfig {
    path: Option<String>,
    quality: u32,
    language: String,
    player_path: String,
    mpv_args: Vec<String>,
    fullscreen: bool,
    progress_interval_secs: u64,
    history_limit: usize,
}

impl EffectiveConfig {
    fn new(app: &App) -> Self {
        let config = &app.config;
        Self {
            path: app.config_path.as_ref().map(|p| p.display().to_string()),
            quality: config.quality(),
            language: config.language().to_string(),
            player_path: config.player_path().to_string(),
            mpv_args: config.mpv_args().to_vec(),
            fullscreen: config.fullscreen(),
            progress_interval_secs: config.progress_interval().as_secs(),
            history_limit: config.history_limit(),
        }
    }

    fn lines(&self) -> Vec<String> {
        vec![
            format!("quality                = {}", self.quality),
            format!("language               = {}", self.language),
            format!("player_path            = {}", self.player_path),
            format!("mpv_args               = {}", self.mpv_args.join(" ")),
            format!("fullscreen             = {}", self.fullscreen),
            format!("progress_interval_secs = {}", self.progress_interval_secs),
            format!("history_limit          = {}", self.history_limit),
        ]
    }
}

pub async fn config_cmd(cmd: ConfigCmd, app: &mut App, output: &Output) -> ExitCode {
    match cmd.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {}
        ConfigAction::Set { key, value } => {
            if let Err(e) = app.config.set(&key, &value) {
                return output.error(e.to_string(), ExitCode::InvalidArgs);
            }
            if let Err(e) = app.save_config() {
                return output.error(format!("Failed to save config: {}", e), ExitCode::Error);
            }
            output.info(format!("Set {} = {}", key, value));
        }
        ConfigAction::Reset => {
            app.config = Config::default();
            if let Err(e) = app.save_config() {
                return output.error(format!("Failed to save config: {}", e), ExitCode::Error);
            }
            output.info("Config reset to defaults");
        }
    }

    let effective = EffectiveConfig::new(app);
    let lines = effective.lines();
    print_or_fail(output, effective, &lines)
}

// =============================================================================
// Helpers
// =============================================================================

fn print_or_fail<T: Serialize>(output: &Output, data: T, lines: &[String]) -> ExitCode {
    if let Err(e) = output.print(data, lines) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}
