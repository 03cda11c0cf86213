//! Player control
//!
//! - Selector: picks one stream for a target quality
//! - IPC: mpv JSON IPC wire format and socket endpoints
//! - Player: launch configuration and command line
//! - Session: one running player process and its control channel
//! - Tracker: periodic progress polling

pub mod ipc;
pub mod player;
pub mod selector;
pub mod session;
pub mod tracker;

pub use player::{LaunchRequest, PlayerConfig, PlayerError, USER_AGENT};
pub use selector::{choose, SelectError};
pub use session::{ExitReason, PlaybackSnapshot, PlayerSession, SessionState};
pub use tracker::{ProgressTick, ProgressTracker};
