//! CLI - Command Line Interface for Kitsunari
//!
//! Every action is scriptable and all output is JSON-parseable with `--json`.
//!
//! # Examples
//!
//! ```bash
//! # Find a show and its episodes
//! kitsunari search "frieren" --json
//! kitsunari episodes ReooPAxPMsHM4KPMY
//!
//! # Watch, then pick up where you left off
//! kitsunari play ReooPAxPMsHM4KPMY 3 -Q 720
//! kitsunari continue
//! kitsunari resume ReooPAxPMsHM4KPMY
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::Episode;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Title or history entry not found
    NotFound = 4,
    /// No streams available
    NoStreams = 5,
    /// Player failed to start
    PlayerFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Kitsunari - watch anime in mpv and pick up where you left off
///
/// Run without arguments to list titles you can continue.
#[derive(Parser, Debug)]
#[command(
    name = "kitsunari",
    version,
    about = "Watch anime in mpv and pick up where you left off",
    long_about = "Searches the AllAnime catalog, plays episodes in mpv, and \
                  records watch progress so any title can be resumed.\n\n\
                  Run without arguments to list titles you can continue.",
    after_help = "EXAMPLES:\n\
                  kitsunari                            List titles to continue\n\
                  kitsunari search \"frieren\"           Search for a title\n\
                  kitsunari play <ID> 3 -Q 720         Play episode 3 at 720p\n\
                  kitsunari resume <ID>                Resume from saved position"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log to stderr at debug level instead of the log file
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run (omit to list titles to continue)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the catalog by title
    #[command(visible_alias = "s")]
    Search(SearchCmd),

    /// List episodes of a title
    #[command(visible_alias = "ep")]
    Episodes(EpisodesCmd),

    /// List available streams for an episode
    #[command(visible_alias = "st")]
    Streams(StreamsCmd),

    /// Play an episode in the local player
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Resume a title from its saved position
    #[command(visible_alias = "r")]
    Resume(ResumeCmd),

    /// List started but unfinished titles
    #[command(name = "continue", visible_alias = "c")]
    Continue(ContinueCmd),

    /// Show all saved watch progress
    #[command(visible_alias = "h")]
    History(HistoryCmd),

    /// Delete the saved progress of a title
    Forget(ForgetCmd),

    /// Show or change settings
    Config(ConfigCmd),
}

// =============================================================================
// Catalog Commands
// =============================================================================

/// Search the catalog by title
#[derive(Args, Debug)]
pub struct SearchCmd {
    /// Search query (title, keywords)
    #[arg(required = true)]
    pub query: String,

    /// Maximum number of results
    #[arg(long, short = 'l', default_value = "20")]
    pub limit: usize,
}

/// List episodes of a title
#[derive(Args, Debug)]
pub struct EpisodesCmd {
    /// Title ID from `search` output
    #[arg(required = true)]
    pub title_id: String,
}

/// List streams for one episode
#[derive(Args, Debug)]
pub struct StreamsCmd {
    /// Title ID from `search` output
    #[arg(required = true)]
    pub title_id: String,

    /// Episode number (e.g. 3 or 6.5)
    #[arg(required = true)]
    pub episode: Episode,
}

// =============================================================================
// Playback Commands
// =============================================================================

/// Play an episode in the local player
#[derive(Args, Debug)]
pub struct PlayCmd {
    /// Title ID from `search` output
    #[arg(required = true)]
    pub title_id: String,

    /// Episode number (e.g. 3 or 6.5)
    #[arg(required = true)]
    pub episode: Episode,

    /// Target quality (e.g. 1080, 720p); defaults to the configured quality
    #[arg(long, short = 'Q', value_parser = parse_quality)]
    pub quality: Option<u32>,

    /// Start position in seconds or as MM:SS / HH:MM:SS
    #[arg(long, value_parser = parse_start)]
    pub start: Option<u64>,
}

/// Resume a title from its saved episode and position
#[derive(Args, Debug)]
pub struct ResumeCmd {
    /// Title ID (see `continue` or `history`)
    #[arg(required = true)]
    pub title_id: String,

    /// Target quality (e.g. 1080, 720p); defaults to the configured quality
    #[arg(long, short = 'Q', value_parser = parse_quality)]
    pub quality: Option<u32>,
}

// =============================================================================
// History Commands
// =============================================================================

/// List started but unfinished titles
#[derive(Args, Debug, Default)]
pub struct ContinueCmd {
    /// Maximum number of entries (defaults to the configured history limit)
    #[arg(long, short = 'l')]
    pub limit: Option<usize>,
}

/// Show all saved watch progress
#[derive(Args, Debug)]
pub struct HistoryCmd {}

/// Delete the saved progress of a title
#[derive(Args, Debug)]
pub struct ForgetCmd {
    /// Title ID
    #[arg(required = true)]
    pub title_id: String,
}

// =============================================================================
// Config Command
// =============================================================================

/// Show or change settings
#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective settings (default)
    Show,
    /// Set one key
    Set {
        /// Setting name (quality, language, player_path, mpv_args, fullscreen,
        /// progress_interval_secs, history_limit)
        key: String,
        /// New value
        value: String,
    },
    /// Restore all defaults
    Reset,
}

// =============================================================================
// Argument Parsing
// =============================================================================

/// Parse a quality like `1080`, `720p`, or `480P`
pub fn parse_quality(s: &str) -> Result<u32, String> {
    let trimmed = s.trim().trim_end_matches(['p', 'P']);
    match trimmed.parse::<u32>() {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(format!("Invalid quality '{}' (expected e.g. 1080 or 720p)", s)),
    }
}

/// Parse a start position: plain seconds or a timestamp
pub fn parse_start(s: &str) -> Result<u64, String> {
    let s = s.trim();
    s.parse::<u64>()
        .ok()
        .or_else(|| parse_timestamp(s))
        .ok_or_else(|| format!("Invalid start position '{}'", s))
}

/// Parse timestamp string (HH:MM:SS or MM:SS) to seconds
fn parse_timestamp(s: &str) -> Option<u64> {
    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            mins.checked_mul(60)?.checked_add(secs)
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            hours
                .checked_mul(3600)?
                .checked_add(mins.checked_mul(60)?)?
                .checked_add(secs)
        }
        _ => None,
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print data as a JSON envelope, or as lines of text for a terminal
    pub fn print<T: Serialize>(&self, data: T, lines: &[String]) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            for line in lines {
                println!("{}", line);
            }
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_args_has_no_command() {
        let cli = Cli::parse_from(["kitsunari"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_quality() {
        assert_eq!(parse_quality("1080"), Ok(1080));
        assert_eq!(parse_quality("720p"), Ok(720));
        assert_eq!(parse_quality("480P"), Ok(480));
        assert!(parse_quality("hd").is_err());
        assert!(parse_quality("0").is_err());
    }

    #[test]
    fn test_parse_start() {
        assert_eq!(parse_start("90"), Ok(90));
        assert_eq!(parse_start("5:30"), Ok(330));
        assert_eq!(parse_start("1:30:00"), Ok(5400));
        assert!(parse_start("soon").is_err());
    }

    #[test]
    fn test_parse_start_rejects_overflow() {
        assert!(parse_start("999999999999999999:00").is_err());
        assert!(parse_start("9999999999999999:00:00").is_err());
        assert!(parse_start("0:999999999999999999:00").is_err());
        assert!(parse_start("1:0:18446744073709551615").is_err());
        assert_eq!(parse_start("0:0:59"), Ok(59));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::Error), 1);
        assert_eq!(i32::from(ExitCode::InvalidArgs), 2);
        assert_eq!(i32::from(ExitCode::NetworkError), 3);
        assert_eq!(i32::from(ExitCode::NotFound), 4);
        assert_eq!(i32::from(ExitCode::NoStreams), 5);
        assert_eq!(i32::from(ExitCode::PlayerFailed), 6);
    }

    #[test]
    fn test_json_error_envelope() {
        let output = JsonOutput::<()>::error_msg("No streams", ExitCode::NoStreams);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["error"], "No streams");
        assert_eq!(value["exit_code"], 5);
        assert!(value.get("data").is_none());
    }
}
