//! Local Player - mpv launch configuration
//!
//! Builds the mpv command line for a stream: start offset, IPC endpoint,
//! window flags, and the flags that keep mpv's own resume feature out of the
//! way so progress is tracked in one place only.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use super::ipc::IpcEndpoint;

/// Errors from local player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    LaunchFailed(#[source] std::io::Error),
    #[error("Player control channel unavailable")]
    ChannelUnavailable,
    #[error("Control channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sent as the user agent for stream requests
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// How to launch and talk to the player
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Player binary (name on PATH or absolute path)
    pub binary: String,
    /// Arguments placed before all generated ones (e.g. `run io.mpv.Mpv` for flatpak)
    pub launcher_args: Vec<String>,
    /// Start fullscreen
    pub fullscreen: bool,
    /// User-supplied player flags, appended after the generated ones
    pub extra_args: Vec<String>,
    /// Directory holding per-session IPC sockets
    pub ipc_dir: PathBuf,
    /// Total time allowed for the control channel to come up
    pub connect_timeout: Duration,
    /// Delay between connection attempts
    pub connect_interval: Duration,
    /// Wait for each reply to a state query
    pub query_timeout: Duration,
    /// Wait for a graceful exit before force-killing
    pub grace_period: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: "mpv".to_string(),
            launcher_args: Vec::new(),
            fullscreen: true,
            extra_args: Vec::new(),
            ipc_dir: IpcEndpoint::default_dir(),
            connect_timeout: Duration::from_secs(5),
            connect_interval: Duration::from_millis(50),
            query_timeout: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl PlayerConfig {
    /// Parse a player command such as `mpv` or `flatpak run io.mpv.Mpv`
    pub fn from_command_line(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let binary = parts.next().unwrap_or_else(|| "mpv".to_string());
        Self {
            binary,
            launcher_args: parts.collect(),
            ..Self::default()
        }
    }

    /// Display name for messages
    pub fn display_name(&self) -> &str {
        Path::new(&self.binary)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.binary)
    }

    /// Check if the player is available on the system
    pub async fn is_available(&self) -> bool {
        // Absolute or relative path: check it directly
        if self.binary.contains(std::path::MAIN_SEPARATOR) {
            return Path::new(&self.binary).exists();
        }

        // Otherwise use 'which' to find in PATH
        Command::new("which")
            .arg(&self.binary)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Player arguments for one launch, excluding `launcher_args`
    pub fn build_args(&self, request: &LaunchRequest, ipc_path: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--start={}", request.start_seconds),
            format!("--input-ipc-server={}", ipc_path.display()),
            "--force-window=immediate".to_string(),
            "--no-terminal".to_string(),
            "--idle=no".to_string(),
            "--keep-open=no".to_string(),
            // Progress is tracked here, not by mpv's watch-later files
            "--no-resume-playback".to_string(),
            "--save-position-on-quit=no".to_string(),
        ];

        if self.fullscreen {
            args.push("--fs".to_string());
        }
        if let Some(referrer) = &request.referrer {
            args.push(format!("--referrer={}", referrer));
        }
        args.push(format!("--user-agent={}", USER_AGENT));
        if let Some(title) = &request.media_title {
            args.push(format!("--force-media-title={}", title));
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(request.extra_args.iter().cloned());
        // Ends option parsing so the URL is never read as a flag
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

/// What to play
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub url: String,
    /// Offset to start from, in seconds
    pub start_seconds: u64,
    pub referrer: Option<String>,
    /// Window title shown by the player
    pub media_title: Option<String>,
    /// Per-launch player flags
    pub extra_args: Vec<String>,
}

impl LaunchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn starting_at(mut self, seconds: u64) -> Self {
        self.start_seconds = seconds;
        self
    }
}
