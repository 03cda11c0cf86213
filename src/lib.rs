//! Kitsunari - watch anime in mpv and pick up where you left off
//!
//! Launches mpv against a provider stream, follows playback over mpv's JSON
//! IPC socket, and keeps resumable watch progress per title.
//!
//! # Modules
//!
//! - `models` - Titles, episodes, stream descriptors, progress records
//! - `api` - Provider trait and the AllAnime client
//! - `stream` - Stream selection, player sessions, progress tracking
//! - `history` - Persistent watch-progress store
//! - `playback` - Coordinator tying the pieces together
//! - `app`, `cli`, `commands`, `config`, `logging` - The command-line front end

pub mod api;
pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod history;
pub mod logging;
pub mod models;
pub mod playback;
pub mod stream;

// Re-export commonly used types
pub use models::{Episode, Language, ProgressRecord, StreamDescriptor, Title};

pub use api::{AllAnimeClient, Provider};
pub use history::{ProgressStore, SharedStore, StoreError};
pub use playback::{PlaybackCoordinator, PlaybackError, PlaybackSettings};
pub use stream::{PlayerConfig, PlayerSession, ProgressTracker};
